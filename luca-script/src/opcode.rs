//! Opcode naming and layout resolution.
//!
//! The byte→name table comes from a plain-text opcode file (line N names
//! opcode N) or a YAML plugin; the name→layout table comes from the game
//! profile, overlaid by plugin entries. A name with no layout anywhere
//! falls through to the undefined handler.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::operator::{self, parse_layout, ParamKind};

pub const KNOWN_GAMES: [&str; 2] = ["LB_EN", "SP"];

/// Built-in game dialects; `Custom` has only the shared fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameProfile {
    LbEn,
    Sp,
    Custom,
}

impl GameProfile {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "LB_EN" => GameProfile::LbEn,
            "SP" => GameProfile::Sp,
            _ => GameProfile::Custom,
        }
    }

    /// Full layout table: game text ops over expr ops over default ops.
    fn layouts(&self) -> HashMap<String, Vec<ParamKind>> {
        let mut layouts = operator::default::layouts();
        layouts.extend(operator::expr::layouts());
        match self {
            GameProfile::LbEn => layouts.extend(operator::lb_en::layouts()),
            GameProfile::Sp => layouts.extend(operator::sp::layouts()),
            GameProfile::Custom => {}
        }
        layouts
    }
}

/// Infer the game name from the opcode file path: first an exact
/// (case-insensitive) match on the parent directory, then a substring
/// match anywhere in the path. Both Windows and POSIX separators count.
pub fn detect_game_name(opcode_path: &str) -> String {
    if opcode_path.is_empty() {
        return "Custom".to_string();
    }
    let normalized = opcode_path.replace('\\', "/");
    let components: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();

    if components.len() >= 2 {
        let parent = components[components.len() - 2];
        for game in KNOWN_GAMES {
            if parent.eq_ignore_ascii_case(game) {
                return game.to_string();
            }
        }
    }

    let upper = normalized.to_ascii_uppercase();
    for game in KNOWN_GAMES {
        if upper.contains(&game.to_ascii_uppercase()) {
            return game.to_string();
        }
    }
    "Custom".to_string()
}

/// Game name priority: explicit option, then inference from the opcode
/// file path (only when no plugin overrides the dialect), then `Custom`.
pub fn resolve_game_name(
    explicit: Option<&str>,
    plugin_file: Option<&Path>,
    opcode_file: Option<&Path>,
) -> String {
    if let Some(name) = explicit {
        if !name.is_empty() {
            println!("[INFO] Using game: {} (from --game)", name);
            return name.to_string();
        }
    }
    if plugin_file.is_none() {
        if let Some(path) = opcode_file {
            let name = detect_game_name(&path.to_string_lossy());
            if name != "Custom" {
                println!("[INFO] Auto-detected game: {} (from opcode path)", name);
                return name;
            }
        }
    }
    "Custom".to_string()
}

/// Byte → mnemonic mapping for one game build.
#[derive(Debug, Clone, Default)]
pub struct OpcodeTable {
    names: HashMap<u8, String>,
    by_name: HashMap<String, u8>,
}

impl OpcodeTable {
    /// Plain-text opcode file: line N is the name of opcode byte N;
    /// blank lines leave a hole.
    pub fn load_opcode_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("unable to read opcode file {:?}", path.as_ref()))?;
        let mut table = Self::default();
        for (i, line) in text.lines().enumerate() {
            if i > u8::MAX as usize {
                bail!("opcode file has more than 256 lines");
            }
            let name = line.trim();
            if !name.is_empty() {
                table.insert(i as u8, name);
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, opcode: u8, name: &str) {
        self.names.insert(opcode, name.to_string());
        self.by_name.insert(name.to_string(), opcode);
    }

    /// Mnemonic for a byte; unnamed opcodes render as `UNDEF_XX`.
    pub fn name_of(&self, opcode: u8) -> String {
        self.names
            .get(&opcode)
            .cloned()
            .unwrap_or_else(|| format!("UNDEF_{:02X}", opcode))
    }

    /// Reverse lookup, accepting the `UNDEF_XX` spelling.
    pub fn opcode_of(&self, name: &str) -> Result<u8> {
        if let Some(&op) = self.by_name.get(name) {
            return Ok(op);
        }
        if let Some(hex) = name.strip_prefix("UNDEF_") {
            return u8::from_str_radix(hex, 16)
                .with_context(|| format!("bad undefined opcode name {:?}", name));
        }
        bail!("unknown opcode mnemonic {:?}", name)
    }
}

#[derive(Debug, Deserialize)]
struct PluginOpcode {
    opcode: u8,
    name: String,
    #[serde(default)]
    params: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PluginFile {
    opcodes: Vec<PluginOpcode>,
}

/// A fully resolved dialect: profile layouts, plugin overrides, and the
/// opcode naming table.
#[derive(Debug, Clone)]
pub struct Dialect {
    pub profile: GameProfile,
    pub table: OpcodeTable,
    layouts: HashMap<String, Vec<ParamKind>>,
}

impl Dialect {
    pub fn new(profile: GameProfile, table: OpcodeTable) -> Self {
        Self {
            layouts: profile.layouts(),
            profile,
            table,
        }
    }

    /// Load a YAML plugin defining per-opcode names and layouts.
    pub fn with_plugin(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("unable to read plugin {:?}", path.as_ref()))?;
        let plugin: PluginFile =
            serde_yaml::from_str(&text).context("plugin file is not valid YAML")?;
        for entry in plugin.opcodes {
            self.table.insert(entry.opcode, &entry.name);
            if let Some(spec) = entry.params {
                self.layouts.insert(entry.name.clone(), parse_layout(&spec)?);
            }
        }
        Ok(self)
    }

    /// Layout chain: plugin/profile table, else undefined (None).
    pub fn layout(&self, name: &str) -> Option<&[ParamKind]> {
        self.layouts.get(name).map(|l| l.as_slice())
    }
}
