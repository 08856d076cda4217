//! Opcode parameter layouts and the handler fallback chain.
//!
//! The engine source shared handlers through embedded structs; here a
//! dialect is a flat name→layout table assembled per game, with the
//! lookup chain game-specific → expr → default → undefined. The
//! undefined handler has no layout: its params round-trip as a u16 dump.

pub mod default;
pub mod expr;
pub mod lb_en;
pub mod sp;
pub mod undefined;

use std::collections::HashMap;

use anyhow::{bail, Result};

/// One parameter slot of an opcode layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    U8,
    U16,
    U32,
    /// NUL-terminated string in the configured charset.
    Str,
    /// u32 byte offset into this script; decompiles to a label.
    Jump,
    /// NUL-terminated script name followed by a u32 offset into that
    /// script; decompiles to a name/label pair.
    FileJump,
    /// Remaining params as u16s (plus a trailing u8 when odd). Only
    /// valid as the sole entry of a layout.
    Dump,
}

/// Parse a plugin layout string such as `"u16, str, jump"`.
pub fn parse_layout(spec: &str) -> Result<Vec<ParamKind>> {
    let mut layout = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        layout.push(match token.to_ascii_lowercase().as_str() {
            "u8" => ParamKind::U8,
            "u16" => ParamKind::U16,
            "u32" => ParamKind::U32,
            "str" | "string" => ParamKind::Str,
            "jump" | "label" => ParamKind::Jump,
            "filejump" | "file_jump" => ParamKind::FileJump,
            "dump" => ParamKind::Dump,
            other => bail!("unknown param kind {:?} in layout {:?}", other, spec),
        });
    }
    if layout.contains(&ParamKind::Dump) && layout.len() != 1 {
        bail!("`dump` must be the only entry of a layout: {:?}", spec);
    }
    Ok(layout)
}

pub(crate) fn table(entries: &[(&str, &[ParamKind])]) -> HashMap<String, Vec<ParamKind>> {
    entries
        .iter()
        .map(|(name, layout)| (name.to_string(), layout.to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_layout_strings() {
        assert_eq!(
            parse_layout("u16, str, str").unwrap(),
            vec![ParamKind::U16, ParamKind::Str, ParamKind::Str]
        );
        assert_eq!(parse_layout("dump").unwrap(), vec![ParamKind::Dump]);
        assert!(parse_layout("u16, dump").is_err());
        assert!(parse_layout("float").is_err());
    }
}
