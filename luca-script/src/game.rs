//! Batch driver: walks SCRIPT.PAK, scans every loadable entry, and runs
//! the decompile or import pass over the whole set so cross-script
//! labels resolve against one merged map.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use luca_core::format::io;
use luca_core::format::pak::Pak;
use luca_core::CancelToken;
use luca_nls::{Charset, Decoder};

use crate::opcode::{resolve_game_name, Dialect, GameProfile, OpcodeTable};
use crate::operator::undefined;
use crate::script::{assign_labels, merge_labels, ImportedScript, Script};

pub const SCRIPT_PAK: &str = "SCRIPT.PAK";
pub const SCRIPT_EXT: &str = ".txt";

/// Entries that are engine bookkeeping, not translatable scripts.
pub const SCRIPT_BLACKLIST: [&str; 11] = [
    "TEST",
    "_VOICEOTHER",
    "_VARNAME",
    "_VARNUM",
    "_CGMODE",
    "_SCR_LABEL",
    "_VOICE_PARAM",
    "_BUILD_COUNT",
    "_TASK",
    "_BUILD_TIME",
    "_VARSTRNAME",
];

pub fn can_load(name: &str, extra: &[String]) -> bool {
    !SCRIPT_BLACKLIST.contains(&name) && !extra.iter().any(|e| e == name)
}

/// Accept a script directory with or without a trailing `SCRIPT.PAK`
/// component and normalise exactly once.
pub fn normalize_script_dir(dir: &Path) -> PathBuf {
    let base = dir
        .file_name()
        .map(|s| s.to_string_lossy().to_ascii_uppercase());
    if base.as_deref() == Some(SCRIPT_PAK) {
        dir.to_path_buf()
    } else {
        dir.join(SCRIPT_PAK)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GameOptions {
    pub game_name: Option<String>,
    pub opcode_file: Option<PathBuf>,
    pub plugin_file: Option<PathBuf>,
    pub charset: Charset,
    pub extra_blacklist: Vec<String>,
}

pub struct Game {
    dialect: Dialect,
    decoder: Decoder,
    pak: Pak,
    scripts: Vec<Script>,
}

impl Game {
    pub fn load(pak_path: impl AsRef<Path>, options: &GameOptions) -> Result<Self> {
        let game_name = resolve_game_name(
            options.game_name.as_deref(),
            options.plugin_file.as_deref(),
            options.opcode_file.as_deref(),
        );
        let profile = GameProfile::from_name(&game_name);

        let table = match &options.opcode_file {
            Some(path) => OpcodeTable::load_opcode_file(path)?,
            None => OpcodeTable::default(),
        };
        let mut dialect = Dialect::new(profile, table);
        if let Some(plugin) = &options.plugin_file {
            dialect = dialect.with_plugin(plugin)?;
        }

        let decoder = Decoder::new(options.charset);
        let pak = Pak::open(pak_path.as_ref(), options.charset)?;

        let mut scripts = Vec::new();
        for entry in pak.entries() {
            let name = entry.display_name();
            if !can_load(&name, &options.extra_blacklist) {
                log::debug!("pass {}", name);
                continue;
            }
            match Script::scan(&name, &entry.data, &dialect, &decoder) {
                Ok(Some(script)) => scripts.push(script),
                Ok(None) => {
                    log::warn!("skipping entry {:?}: data table, not a script", name)
                }
                Err(e) => log::warn!("skipping script {:?}: {:#}", name, e),
            }
        }
        println!("Loaded {} scripts from {}", scripts.len(), pak.name);

        Ok(Self {
            dialect,
            decoder,
            pak,
            scripts,
        })
    }

    pub fn script_names(&self) -> Vec<String> {
        self.scripts.iter().map(|s| s.name.clone()).collect()
    }

    /// Decompile every loaded script into `out_dir/SCRIPT.PAK/<name>.txt`,
    /// then print the one-shot undefined-opcode summary.
    pub fn decompile(&self, out_dir: impl AsRef<Path>, cancel: &CancelToken) -> Result<()> {
        let dir = normalize_script_dir(out_dir.as_ref());
        fs::create_dir_all(&dir).with_context(|| format!("unable to create {:?}", dir))?;

        let labels = assign_labels(&self.scripts);
        for script in &self.scripts {
            cancel.check()?;
            let text = script.render(&labels);
            io::atomic_write(dir.join(format!("{}{}", script.name, SCRIPT_EXT)), text.as_bytes())?;
            println!("{} -> {} statements", script.name, script.statements.len());
        }

        if let Some(summary) = undefined::summary() {
            println!("{}", summary);
        }
        undefined::reset();
        Ok(())
    }

    /// Re-import edited text files and write a rebuilt archive. Scripts
    /// whose text is missing or fails to re-encode keep their original
    /// bytes and are reported as warnings.
    pub fn import(
        &mut self,
        in_dir: impl AsRef<Path>,
        out_pak: impl AsRef<Path>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let dir = normalize_script_dir(in_dir.as_ref());

        let mut imported: Vec<ImportedScript> = Vec::new();
        for script in &self.scripts {
            cancel.check()?;
            let path = dir.join(format!("{}{}", script.name, SCRIPT_EXT));
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) => {
                    log::warn!("{}: keeping original bytes ({}: {})", script.name, path.display(), e);
                    continue;
                }
            };
            match ImportedScript::parse(&script.name, &source, &self.dialect, &self.decoder) {
                Ok(parsed) => imported.push(parsed),
                Err(e) => log::warn!("{}: keeping original bytes: {:#}", script.name, e),
            }
        }

        let merged = merge_labels(&imported);
        let mut written = 0usize;
        for mut script in imported {
            cancel.check()?;
            let name = script.name.clone();
            match script.resolve(&merged) {
                Ok(()) => {
                    let bytes = script.to_bytes();
                    // Scripts from unnamed archives carry their entry id
                    // as the display name.
                    if self.pak.get_by_name(&name).is_some() {
                        self.pak.set_by_name(&name, bytes)?;
                    } else if let Ok(id) = name.parse::<u32>() {
                        self.pak.set_by_id(id, bytes)?;
                    } else {
                        bail!("no PAK entry for script {:?}", name);
                    }
                    written += 1;
                }
                Err(e) => log::warn!("{}: keeping original bytes: {:#}", name, e),
            }
        }

        self.pak.write_file(out_pak.as_ref())?;
        println!("Rebuilt {} scripts -> {:?}", written, out_pak.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_is_exact_match() {
        assert!(!can_load("TEST", &[]));
        assert!(!can_load("_VARNUM", &[]));
        assert!(can_load("TESTING", &[]));
        assert!(can_load("SEEN1001", &[]));
        assert!(!can_load("SEEN1001", &["SEEN1001".to_string()]));
    }

    #[test]
    fn script_dir_normalises_once() {
        assert_eq!(
            normalize_script_dir(Path::new("out")),
            PathBuf::from("out/SCRIPT.PAK")
        );
        assert_eq!(
            normalize_script_dir(Path::new("out/SCRIPT.PAK")),
            PathBuf::from("out/SCRIPT.PAK")
        );
        assert_eq!(
            normalize_script_dir(Path::new("out/script.pak")),
            PathBuf::from("out/script.pak")
        );
    }
}
