//! Text-bearing opcodes of the *Summer Pockets* dialect. Dialogue lines
//! are all-string: one quoted argument per language column.

use std::collections::HashMap;

use super::{table, ParamKind};
use ParamKind::*;

pub fn layouts() -> HashMap<String, Vec<ParamKind>> {
    table(&[
        ("MESSAGE", &[Str, Str]),
        ("SELECT", &[Str, Str]),
        ("LOG_BEGIN", &[Str]),
        ("MESSAGE_CLEAR", &[]),
    ])
}
