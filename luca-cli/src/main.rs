//! lucatool: PAK archives, CZ images, fonts, and script round-trips
//! from one binary.
//!
//! Exit codes: 0 success, 1 usage error, 2 runtime error. Progress goes
//! to stdout; diagnostics go through the logger to stderr (`RUST_LOG`).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use luca_core::format::cz::CzFile;
use luca_core::format::font::{EditMode, FontAtlas};
use luca_core::format::io;
use luca_core::format::pak::Pak;
use luca_core::CancelToken;
use luca_nls::Charset;
use luca_script::{dialogue, Game, GameOptions};

#[derive(Parser, Debug)]
#[command(name = "lucatool", version, about = "LucaSystem modding toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// PAK archive operations
    Pak {
        #[command(subcommand)]
        command: PakCommand,
    },
    /// CZ image operations
    Image {
        #[command(subcommand)]
        command: ImageCommand,
    },
    /// Bitmap font operations
    Font {
        #[command(subcommand)]
        command: FontCommand,
    },
    /// Script decompile/recompile
    Script {
        #[command(subcommand)]
        command: ScriptCommand,
    },
    /// Dialogue TSV extract/inject over decompiled scripts
    Dialogue {
        #[command(subcommand)]
        command: DialogueCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PakCommand {
    /// Unpack every entry and write an index list
    Extract {
        /// Source .PAK file
        #[arg(short = 'i', long)]
        input: PathBuf,
        /// Index list output (id<TAB>name<TAB>length)
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Directory to extract entries into
        #[arg(long = "all")]
        all: PathBuf,
        /// Name table charset
        #[arg(short = 'c', long, default_value = "UTF-8")]
        charset: Charset,
    },
    /// Rebuild an archive with replacement entries
    Replace {
        /// Source .PAK file
        #[arg(short = 's', long)]
        source: PathBuf,
        /// Replacement directory, or a list file with --list
        #[arg(short = 'i', long)]
        input: PathBuf,
        /// Treat input as an id<TAB>[name<TAB>]path list file
        #[arg(short = 'l', long)]
        list: bool,
        /// Output .PAK file
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Name table charset
        #[arg(short = 'c', long, default_value = "UTF-8")]
        charset: Charset,
    },
}

#[derive(Subcommand, Debug)]
enum ImageCommand {
    /// Decode a CZ file to PNG
    Export {
        #[arg(short = 'i', long)]
        input: PathBuf,
        #[arg(short = 'o', long)]
        output: PathBuf,
    },
    /// Re-encode a PNG into the layout of a source CZ file
    Import {
        /// Source CZ the header/palette/block layout comes from
        #[arg(short = 's', long)]
        source: PathBuf,
        #[arg(short = 'i', long)]
        input: PathBuf,
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Pad an undersized PNG up to the source dimensions
        #[arg(short = 'f', long)]
        fill: bool,
    },
    /// Decode every CZ file in a directory
    BatchExport {
        #[arg(short = 'i', long)]
        input: PathBuf,
        #[arg(short = 'o', long)]
        output: PathBuf,
    },
    /// Re-encode every PNG in a directory against its source CZ
    BatchImport {
        /// Directory holding the original CZ files
        #[arg(short = 's', long)]
        source: PathBuf,
        #[arg(short = 'i', long)]
        input: PathBuf,
        #[arg(short = 'o', long)]
        output: PathBuf,
        #[arg(short = 'f', long)]
        fill: bool,
    },
}

#[derive(Subcommand, Debug)]
enum FontCommand {
    /// Export the glyph atlas as PNG (and optionally the codepoint list)
    Extract {
        /// Font atlas CZ file
        #[arg(short = 's', long)]
        source: PathBuf,
        /// Companion glyph info file
        #[arg(short = 'S', long)]
        info: PathBuf,
        /// Atlas PNG output
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Codepoint list output, one glyph per line
        #[arg(short = 'O', long)]
        charset_out: Option<PathBuf>,
        /// Glyph cell size in pixels
        #[arg(short = 'z', long, default_value_t = 24)]
        size: u32,
    },
    /// Rasterise glyphs from a vector font into the atlas
    Edit {
        /// Font atlas CZ file
        #[arg(short = 's', long)]
        source: PathBuf,
        /// Companion glyph info file
        #[arg(short = 'S', long)]
        info: PathBuf,
        /// TTF/OTF to rasterise from
        #[arg(short = 'f', long)]
        font: PathBuf,
        /// Edited atlas CZ output
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Edited info output (defaults to overwriting alongside output)
        #[arg(short = 'O', long)]
        info_out: Option<PathBuf>,
        /// Re-render every glyph, keeping codepoints
        #[arg(short = 'r', long)]
        redraw: bool,
        /// Append the charset glyphs after the last record
        #[arg(short = 'a', long)]
        append: bool,
        /// Overwrite glyphs starting at this index
        #[arg(short = 'i', long, default_value_t = 0)]
        index: usize,
        /// Text file listing the characters to draw
        #[arg(short = 'c', long)]
        charset_file: Option<PathBuf>,
        /// Glyph cell size in pixels
        #[arg(short = 'z', long, default_value_t = 24)]
        size: u32,
    },
}

#[derive(Args, Debug)]
struct ScriptArgs {
    /// SCRIPT.PAK file
    #[arg(short = 's', long)]
    source: PathBuf,
    /// Script text charset
    #[arg(short = 'c', long, default_value = "UTF-8")]
    charset: Charset,
    /// Opcode name table (line N = opcode N)
    #[arg(short = 'O', long)]
    opcode: Option<PathBuf>,
    /// YAML opcode plugin
    #[arg(short = 'p', long)]
    plugin: Option<PathBuf>,
    /// Game dialect override (LB_EN, SP)
    #[arg(long)]
    game: Option<String>,
    /// Extra blacklist entries, comma separated
    #[arg(short = 'b', long)]
    blacklist: Option<String>,
}

impl ScriptArgs {
    fn options(&self) -> GameOptions {
        GameOptions {
            game_name: self.game.clone(),
            opcode_file: self.opcode.clone(),
            plugin_file: self.plugin.clone(),
            charset: self.charset,
            extra_blacklist: self
                .blacklist
                .as_deref()
                .unwrap_or("")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum ScriptCommand {
    /// Decompile every script entry to text
    Decompile {
        #[command(flatten)]
        script: ScriptArgs,
        /// Output directory
        #[arg(short = 'o', long)]
        output: PathBuf,
    },
    /// Re-assemble edited text into a new SCRIPT.PAK
    Import {
        #[command(flatten)]
        script: ScriptArgs,
        /// Directory of edited .txt files
        #[arg(short = 'i', long)]
        input: PathBuf,
        /// Output .PAK file
        #[arg(short = 'o', long)]
        output: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum DialogueCommand {
    /// Extract MESSAGE/LOG_BEGIN lines into a TSV
    Extract {
        /// Decompiled script .txt
        #[arg(short = 'i', long)]
        input: PathBuf,
        /// TSV output
        #[arg(short = 'o', long)]
        output: PathBuf,
    },
    /// Inject translated TSV cells back into a script .txt
    Import {
        /// Decompiled script .txt
        #[arg(short = 'i', long)]
        input: PathBuf,
        /// Translated TSV
        #[arg(short = 't', long)]
        tsv: PathBuf,
        /// 0-based language column to inject
        #[arg(short = 'n', long)]
        lang: usize,
        /// Rewritten script output
        #[arg(short = 'o', long)]
        output: PathBuf,
    },
}

fn read_cz(path: &Path) -> Result<CzFile> {
    let bytes = fs::read(path).with_context(|| format!("unable to read {:?}", path))?;
    CzFile::parse(&bytes).with_context(|| format!("{:?} is not a CZ image", path))
}

fn image_export(input: &Path, output: &Path, cancel: &CancelToken) -> Result<()> {
    let mut cz = read_cz(input)?;
    let png = cz.export_png(cancel)?;
    io::atomic_write(output, &png)?;
    println!(
        "{} -> {} ({}x{}, CZ{})",
        input.display(),
        output.display(),
        cz.header().width,
        cz.header().height,
        cz.header().version()
    );
    Ok(())
}

fn image_import(
    source: &Path,
    input: &Path,
    output: &Path,
    fill: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let mut cz = read_cz(source)?;
    let png = fs::read(input).with_context(|| format!("unable to read {:?}", input))?;
    let img = luca_core::format::cz::png_to_rgba(&png)?;
    cz.import(img, fill, cancel)?;
    io::atomic_write(output, &cz.to_bytes()?)?;
    println!("{} -> {}", input.display(), output.display());
    Ok(())
}

/// Extensions that are never CZ payloads in a working directory.
const SKIP_EXTS: [&str; 4] = ["png", "txt", "json", "xml"];

fn image_batch_export(input: &Path, output: &Path, cancel: &CancelToken) -> Result<()> {
    fs::create_dir_all(output)?;
    let mut count = 0usize;
    let mut errors = 0usize;
    let mut paths: Vec<_> = fs::read_dir(input)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    for path in paths {
        cancel.check()?;
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if SKIP_EXTS.contains(&ext.as_str()) {
            continue;
        }
        let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let out = output.join(format!("{}.png", name));
        match image_export(&path, &out, cancel) {
            Ok(()) => count += 1,
            Err(e) => {
                log::warn!("{}: {:#}", path.display(), e);
                errors += 1;
            }
        }
    }
    println!("{} images exported, {} errors", count, errors);
    Ok(())
}

fn image_batch_import(
    source: &Path,
    input: &Path,
    output: &Path,
    fill: bool,
    cancel: &CancelToken,
) -> Result<()> {
    fs::create_dir_all(output)?;
    let mut count = 0usize;
    let mut errors = 0usize;
    let mut paths: Vec<_> = fs::read_dir(input)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|e| e.to_string_lossy().eq_ignore_ascii_case("png"))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();
    for path in paths {
        cancel.check()?;
        let cz_name = path.file_stem().unwrap_or_default().to_string_lossy().into_owned();
        let source_cz = source.join(&cz_name);
        if !source_cz.exists() {
            println!("  [SKIP] {} (no matching CZ: {})", path.display(), cz_name);
            continue;
        }
        match image_import(&source_cz, &path, &output.join(&cz_name), fill, cancel) {
            Ok(()) => count += 1,
            Err(e) => {
                log::warn!("{}: {:#}", path.display(), e);
                errors += 1;
            }
        }
    }
    println!("{} images imported, {} errors", count, errors);
    Ok(())
}

fn load_atlas(source: &Path, info: &Path, size: u32) -> Result<FontAtlas> {
    let cz_bytes = fs::read(source).with_context(|| format!("unable to read {:?}", source))?;
    let info_bytes = fs::read(info).with_context(|| format!("unable to read {:?}", info))?;
    FontAtlas::load(&cz_bytes, &info_bytes, size)
}

fn run(cli: Cli) -> Result<()> {
    let cancel = CancelToken::new();
    match cli.command {
        Command::Pak { command } => match command {
            PakCommand::Extract {
                input,
                output,
                all,
                charset,
            } => {
                let pak = Pak::open(&input, charset)?;
                pak.extract_all(&all, &output, &cancel)?;
                println!("{} -> {}", input.display(), all.display());
            }
            PakCommand::Replace {
                source,
                input,
                list,
                output,
                charset,
            } => {
                let mut pak = Pak::open(&source, charset)?;
                let replaced = if list {
                    pak.replace_from_list(&input, &cancel)?
                } else {
                    pak.replace_from_dir(&input, &cancel)?
                };
                pak.write_file(&output)?;
                println!("{} entries replaced -> {}", replaced, output.display());
            }
        },
        Command::Image { command } => match command {
            ImageCommand::Export { input, output } => image_export(&input, &output, &cancel)?,
            ImageCommand::Import {
                source,
                input,
                output,
                fill,
            } => image_import(&source, &input, &output, fill, &cancel)?,
            ImageCommand::BatchExport { input, output } => {
                image_batch_export(&input, &output, &cancel)?
            }
            ImageCommand::BatchImport {
                source,
                input,
                output,
                fill,
            } => image_batch_import(&source, &input, &output, fill, &cancel)?,
        },
        Command::Font { command } => match command {
            FontCommand::Extract {
                source,
                info,
                output,
                charset_out,
                size,
            } => {
                let mut atlas = load_atlas(&source, &info, size)?;
                let png = atlas.export_png(&cancel)?;
                io::atomic_write(&output, &png)?;
                if let Some(path) = charset_out {
                    io::atomic_write(&path, atlas.charset_text().as_bytes())?;
                }
                println!(
                    "{} glyphs -> {}",
                    atlas.info.glyphs.len(),
                    output.display()
                );
            }
            FontCommand::Edit {
                source,
                info,
                font,
                output,
                info_out,
                redraw,
                append,
                index,
                charset_file,
                size,
            } => {
                let mode = if redraw {
                    EditMode::Redraw
                } else if append {
                    EditMode::Append
                } else {
                    EditMode::Replace(index)
                };
                let chars: Vec<char> = match (&mode, &charset_file) {
                    (EditMode::Redraw, _) => Vec::new(),
                    (_, Some(path)) => fs::read_to_string(path)
                        .with_context(|| format!("unable to read {:?}", path))?
                        .chars()
                        .filter(|c| *c != '\n' && *c != '\r')
                        .collect(),
                    (_, None) => bail!("--charset-file is required unless --redraw is set"),
                };
                let font_bytes =
                    fs::read(&font).with_context(|| format!("unable to read {:?}", font))?;
                let mut atlas = load_atlas(&source, &info, size)?;
                atlas.edit(&font_bytes, &chars, mode, &cancel)?;
                io::atomic_write(&output, &atlas.cz.to_bytes()?)?;
                let info_path = info_out.unwrap_or_else(|| info.clone());
                io::atomic_write(&info_path, &atlas.info.to_bytes())?;
                println!(
                    "{} glyphs -> {} + {}",
                    atlas.info.glyphs.len(),
                    output.display(),
                    info_path.display()
                );
            }
        },
        Command::Script { command } => match command {
            ScriptCommand::Decompile { script, output } => {
                let game = Game::load(&script.source, &script.options())?;
                game.decompile(&output, &cancel)?;
            }
            ScriptCommand::Import {
                script,
                input,
                output,
            } => {
                let mut game = Game::load(&script.source, &script.options())?;
                game.import(&input, &output, &cancel)?;
            }
        },
        Command::Dialogue { command } => match command {
            DialogueCommand::Extract { input, output } => {
                let script = fs::read_to_string(&input)
                    .with_context(|| format!("unable to read {:?}", input))?;
                let tsv = dialogue::extract(&script)?;
                io::atomic_write(&output, tsv.as_bytes())?;
                println!("{} -> {}", input.display(), output.display());
            }
            DialogueCommand::Import {
                input,
                tsv,
                lang,
                output,
            } => {
                let script = fs::read_to_string(&input)
                    .with_context(|| format!("unable to read {:?}", input))?;
                let table =
                    fs::read_to_string(&tsv).with_context(|| format!("unable to read {:?}", tsv))?;
                let (rewritten, changed) = dialogue::import(&script, &table, lang)?;
                io::atomic_write(&output, rewritten.as_bytes())?;
                println!("{} lines updated -> {}", changed, output.display());
            }
        },
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap prints help/version through the error path too.
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(1),
            };
        }
    };
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
