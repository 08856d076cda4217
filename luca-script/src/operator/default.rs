//! Control-flow opcodes shared by every game dialect.

use std::collections::HashMap;

use super::{table, ParamKind};
use ParamKind::*;

pub fn layouts() -> HashMap<String, Vec<ParamKind>> {
    table(&[
        ("END", &[]),
        ("RETURN", &[]),
        ("GOTO", &[Jump]),
        ("GOSUB", &[U16, Jump]),
        ("JUMP", &[FileJump]),
        ("FARCALL", &[U16, FileJump]),
        ("IFY", &[Str, Jump]),
        ("IFN", &[Str, Jump]),
    ])
}
