//! Arithmetic/assignment opcodes. Their operands are opaque u16 variable
//! slots, so they dump like undefined opcodes but keep their names and
//! stay out of the undefined tracker.

use std::collections::HashMap;

use super::{table, ParamKind};
use ParamKind::*;

pub fn layouts() -> HashMap<String, Vec<ParamKind>> {
    table(&[
        ("EQU", &[Dump]),
        ("EQUN", &[Dump]),
        ("EQUV", &[Dump]),
        ("ADD", &[Dump]),
        ("SUB", &[Dump]),
        ("RANDOM", &[Dump]),
        ("MOVE", &[Dump]),
    ])
}
