//! Text-bearing opcodes of the *Little Busters! English Edition* dialect.
//! Dialogue lines are voice-prefixed: a u16 voice id, then one string
//! per language.

use std::collections::HashMap;

use super::{table, ParamKind};
use ParamKind::*;

pub fn layouts() -> HashMap<String, Vec<ParamKind>> {
    table(&[
        ("MESSAGE", &[U16, Str, Str]),
        ("SELECT", &[U16, Str, Str]),
        ("BATTLE", &[U16, Str, Str]),
        ("LOG_BEGIN", &[U16, Str, Str]),
    ])
}
