//! Decompile and re-import passes over one script's CodeLine stream.
//!
//! Decompilation is two-phase across the whole script set: first every
//! script is scanned, collecting the byte offsets that jumps reference
//! (locally and from other scripts); then labels are assigned in offset
//! order and the text is rendered. Re-import mirrors it: every text file
//! is re-encoded with jump placeholders, each script publishes its label
//! offsets, the per-script maps merge into one global map, and finally
//! the placeholders are patched against the merged map.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Context, Result};
use luca_nls::{Chunk, Decoder};

use crate::codeline::{parse_entry, write_lines, CodeLine, ParsedEntry};
use crate::opcode::Dialect;
use crate::operator::{undefined, ParamKind};
use crate::text::{self, ParsedLine, RawArg};
use luca_core::format::io;

/// A decoded argument of a scanned statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    U8(u8),
    U16(u16),
    U32(u32),
    Str(Vec<Chunk>),
    /// Byte offset into this script.
    Jump(u32),
    /// Script name and byte offset into that script.
    FileJump(Vec<Chunk>, u32),
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub name: String,
    pub flag: u8,
    pub args: Vec<Arg>,
    pub offset: u32,
}

/// A scanned script, ready for label assignment and rendering.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub statements: Vec<Statement>,
    /// Offsets referenced by this script's local jumps.
    pub local_targets: BTreeSet<u32>,
    /// Outgoing references into other scripts.
    pub cross_refs: Vec<(String, u32)>,
    line_offsets: BTreeSet<u32>,
}

/// Join the text runs of a chunk sequence (raw bytes are dropped); used
/// for script-name lookups, which are plain ASCII in practice.
fn chunks_to_name(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for c in chunks {
        if let Chunk::Text(s) = c {
            out.push_str(s);
        }
    }
    out
}

fn read_cstr_chunks(params: &[u8], off: &mut usize, decoder: &Decoder) -> Result<Vec<Chunk>> {
    let rest = &params[*off..];
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| anyhow::anyhow!("unterminated string at param offset {}", off))?;
    let chunks = decoder.decode_chunks(&rest[..nul]);
    *off += nul + 1;
    Ok(chunks)
}

/// Decode params against a layout; fails when the layout does not
/// consume the params exactly, in which case the caller dumps instead.
fn decode_args(params: &[u8], layout: &[ParamKind], decoder: &Decoder) -> Result<Vec<Arg>> {
    let mut args = Vec::new();
    let mut off = 0usize;
    for kind in layout {
        match kind {
            ParamKind::U8 => args.push(Arg::U8(io::read_u8(params, &mut off)?)),
            ParamKind::U16 => args.push(Arg::U16(io::read_u16_le(params, &mut off)?)),
            ParamKind::U32 => args.push(Arg::U32(io::read_u32_le(params, &mut off)?)),
            ParamKind::Str => args.push(Arg::Str(read_cstr_chunks(params, &mut off, decoder)?)),
            ParamKind::Jump => args.push(Arg::Jump(io::read_u32_le(params, &mut off)?)),
            ParamKind::FileJump => {
                let name = read_cstr_chunks(params, &mut off, decoder)?;
                let target = io::read_u32_le(params, &mut off)?;
                args.push(Arg::FileJump(name, target));
            }
            ParamKind::Dump => {
                args.extend(dump_args(&params[off..]));
                off = params.len();
            }
        }
    }
    if off != params.len() {
        bail!("layout consumed {} of {} param bytes", off, params.len());
    }
    Ok(args)
}

/// The undefined rendering: params as u16s, plus the odd trailing byte.
fn dump_args(params: &[u8]) -> Vec<Arg> {
    let mut args = Vec::new();
    let mut chunks = params.chunks_exact(2);
    for pair in &mut chunks {
        args.push(Arg::U16(u16::from_le_bytes([pair[0], pair[1]])));
    }
    if let [tail] = chunks.remainder() {
        args.push(Arg::U8(*tail));
    }
    args
}

impl Script {
    /// Scan a PAK entry. Returns `None` when the entry is a data table.
    pub fn scan(
        name: &str,
        data: &[u8],
        dialect: &Dialect,
        decoder: &Decoder,
    ) -> Result<Option<Self>> {
        let lines = match parse_entry(data)
            .with_context(|| format!("failed to parse script {:?}", name))?
        {
            ParsedEntry::DataTable => return Ok(None),
            ParsedEntry::Code(lines) => lines,
        };

        let mut statements = Vec::with_capacity(lines.len());
        let mut local_targets = BTreeSet::new();
        let mut cross_refs = Vec::new();
        let mut line_offsets = BTreeSet::new();

        for line in &lines {
            line_offsets.insert(line.offset);
            let op_name = dialect.table.name_of(line.opcode);
            let args = match dialect.layout(&op_name) {
                Some(layout) => match decode_args(&line.params, layout, decoder) {
                    Ok(args) => args,
                    Err(e) => {
                        log::warn!(
                            "{}: {} at offset {} does not match its layout ({}), dumping raw",
                            name,
                            op_name,
                            line.offset,
                            e
                        );
                        dump_args(&line.params)
                    }
                },
                None => {
                    undefined::track(&op_name);
                    dump_args(&line.params)
                }
            };
            for arg in &args {
                match arg {
                    Arg::Jump(target) => {
                        local_targets.insert(*target);
                    }
                    Arg::FileJump(script, target) => {
                        cross_refs.push((chunks_to_name(script), *target));
                    }
                    _ => {}
                }
            }
            statements.push(Statement {
                name: op_name,
                flag: line.fixed_flag,
                args,
                offset: line.offset,
            });
        }
        Ok(Some(Self {
            name: name.to_string(),
            statements,
            local_targets,
            cross_refs,
            line_offsets,
        }))
    }

    /// Render to text. `labels` maps, per script, a target offset to its
    /// label id; unresolvable targets degrade to plain numbers.
    pub fn render(&self, labels: &HashMap<String, HashMap<u32, u32>>) -> String {
        let empty = HashMap::new();
        let own = labels.get(&self.name).unwrap_or(&empty);
        let mut out = String::new();

        for stmt in &self.statements {
            if let Some(id) = own.get(&stmt.offset) {
                out.push_str(&format!("LABEL_{}:\n", id));
            }
            out.push_str(&stmt.name);
            if stmt.flag != 0 {
                out.push_str(&format!(".{}", stmt.flag));
            }
            out.push_str(" (");
            let mut first = true;
            for arg in &stmt.args {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                match arg {
                    Arg::U8(v) => out.push_str(&format!("b{}", v)),
                    Arg::U16(v) => out.push_str(&v.to_string()),
                    Arg::U32(v) => out.push_str(&v.to_string()),
                    Arg::Str(chunks) => out.push_str(&text::quote(chunks)),
                    Arg::Jump(target) => match own.get(target) {
                        Some(id) => out.push_str(&format!("LABEL_{}", id)),
                        None => out.push_str(&target.to_string()),
                    },
                    Arg::FileJump(script, target) => {
                        out.push_str(&text::quote(script));
                        out.push_str(", ");
                        let resolved = labels
                            .get(&chunks_to_name(script))
                            .and_then(|m| m.get(target));
                        match resolved {
                            Some(id) => out.push_str(&format!("LABEL_{}", id)),
                            None => out.push_str(&target.to_string()),
                        }
                    }
                }
            }
            out.push_str(")\n");
        }
        out
    }
}

/// Assign label ids across a scanned script set: each script's labels
/// are its locally referenced offsets plus the offsets other scripts
/// jump to, numbered in ascending offset order from 1.
pub fn assign_labels(scripts: &[Script]) -> HashMap<String, HashMap<u32, u32>> {
    let mut targets: HashMap<&str, BTreeSet<u32>> = HashMap::new();
    for script in scripts {
        targets
            .entry(&script.name)
            .or_default()
            .extend(&script.local_targets);
    }
    let known: BTreeSet<&str> = scripts.iter().map(|s| s.name.as_str()).collect();
    for script in scripts {
        for (target_script, offset) in &script.cross_refs {
            match known.get(target_script.as_str()) {
                Some(&name) => {
                    targets.entry(name).or_default().insert(*offset);
                }
                None => log::warn!(
                    "{}: reference into unknown script {:?}, keeping the raw offset",
                    script.name,
                    target_script
                ),
            }
        }
    }

    let line_offsets: HashMap<&str, &BTreeSet<u32>> = scripts
        .iter()
        .map(|s| (s.name.as_str(), &s.line_offsets))
        .collect();

    let mut labels = HashMap::new();
    for (name, offsets) in targets {
        let lines = line_offsets[name];
        let mut map = HashMap::new();
        let mut next_id = 1u32;
        for offset in offsets {
            if lines.contains(&offset) {
                map.insert(offset, next_id);
                next_id += 1;
            } else {
                log::warn!(
                    "{}: jump target {} is not a line start, keeping the raw offset",
                    name,
                    offset
                );
            }
        }
        labels.insert(name.to_string(), map);
    }
    labels
}

/// A jump reference waiting for the merged label map.
#[derive(Debug, Clone)]
struct CrossFixup {
    line: usize,
    param_pos: usize,
    script: String,
    label: u32,
}

/// A script re-encoded from text, with jump placeholders patched locally
/// and cross-script references pending [`ImportedScript::resolve`].
#[derive(Debug, Clone)]
pub struct ImportedScript {
    pub name: String,
    lines: Vec<CodeLine>,
    /// Label id → byte offset, this script's contribution to the
    /// merged global map.
    pub labels: HashMap<u32, u32>,
    cross_fixups: Vec<CrossFixup>,
}

struct Encoded {
    params: Vec<u8>,
    local_refs: Vec<(usize, u32)>,
    cross_refs: Vec<(usize, String, u32)>,
}

fn encode_dump(args: &[RawArg]) -> Result<Vec<u8>> {
    let mut params = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        match arg {
            RawArg::Number(v) => {
                if *v > u16::MAX as u32 {
                    bail!("dump value {} exceeds u16", v);
                }
                io::put_u16_le(*v as u16, &mut params);
            }
            RawArg::Byte(v) => {
                if i + 1 != args.len() {
                    bail!("byte argument is only valid in the last position");
                }
                io::put_u8(*v, &mut params);
            }
            other => bail!("argument {:?} is not valid in a raw dump", other),
        }
    }
    Ok(params)
}

fn encode_args(
    args: &[RawArg],
    layout: Option<&[ParamKind]>,
    decoder: &Decoder,
) -> Result<Encoded> {
    let Some(layout) = layout else {
        return Ok(Encoded {
            params: encode_dump(args)?,
            local_refs: Vec::new(),
            cross_refs: Vec::new(),
        });
    };

    let mut params = Vec::new();
    let mut local_refs = Vec::new();
    let mut cross_refs = Vec::new();
    let mut it = args.iter();

    let result: Result<()> = (|| {
        for kind in layout {
            match kind {
                ParamKind::U8 => match it.next() {
                    Some(RawArg::Byte(v)) => io::put_u8(*v, &mut params),
                    Some(RawArg::Number(v)) if *v <= u8::MAX as u32 => {
                        io::put_u8(*v as u8, &mut params)
                    }
                    other => bail!("expected u8, got {:?}", other),
                },
                ParamKind::U16 => match it.next() {
                    Some(RawArg::Number(v)) if *v <= u16::MAX as u32 => {
                        io::put_u16_le(*v as u16, &mut params)
                    }
                    other => bail!("expected u16, got {:?}", other),
                },
                ParamKind::U32 => match it.next() {
                    Some(RawArg::Number(v)) => io::put_u32_le(*v, &mut params),
                    other => bail!("expected u32, got {:?}", other),
                },
                ParamKind::Str => match it.next() {
                    Some(RawArg::Str(chunks)) => {
                        params.extend_from_slice(&decoder.encode_chunks(chunks));
                        params.push(0);
                    }
                    other => bail!("expected string, got {:?}", other),
                },
                ParamKind::Jump => match it.next() {
                    Some(RawArg::Label(id)) => {
                        local_refs.push((params.len(), *id));
                        io::put_u32_le(0, &mut params);
                    }
                    Some(RawArg::Number(v)) => io::put_u32_le(*v, &mut params),
                    other => bail!("expected label, got {:?}", other),
                },
                ParamKind::FileJump => {
                    let script = match it.next() {
                        Some(RawArg::Str(chunks)) => chunks,
                        other => bail!("expected script name, got {:?}", other),
                    };
                    params.extend_from_slice(&decoder.encode_chunks(script));
                    params.push(0);
                    match it.next() {
                        Some(RawArg::Label(id)) => {
                            cross_refs.push((params.len(), chunks_to_name(script), *id));
                            io::put_u32_le(0, &mut params);
                        }
                        Some(RawArg::Number(v)) => io::put_u32_le(*v, &mut params),
                        other => bail!("expected label, got {:?}", other),
                    }
                }
                ParamKind::Dump => {
                    params.extend_from_slice(&encode_dump(it.as_slice())?);
                    return Ok(());
                }
            }
        }
        if it.next().is_some() {
            bail!("too many arguments for layout");
        }
        Ok(())
    })();

    match result {
        Ok(()) => Ok(Encoded {
            params,
            local_refs,
            cross_refs,
        }),
        // A statement that was dumped at decompile time (layout mismatch
        // in the source) re-encodes as a dump.
        Err(e) => match encode_dump(args) {
            Ok(params) => Ok(Encoded {
                params,
                local_refs: Vec::new(),
                cross_refs: Vec::new(),
            }),
            Err(_) => Err(e),
        },
    }
}

impl ImportedScript {
    /// Re-encode a decompiled text file into CodeLines, resolving local
    /// label references against the new byte offsets.
    pub fn parse(name: &str, source: &str, dialect: &Dialect, decoder: &Decoder) -> Result<Self> {
        let mut lines: Vec<CodeLine> = Vec::new();
        let mut labels: HashMap<u32, u32> = HashMap::new();
        let mut local_fixups: Vec<(usize, usize, u32)> = Vec::new();
        let mut cross_fixups: Vec<CrossFixup> = Vec::new();
        let mut offset = 0u32;

        for (lineno, raw_line) in source.lines().enumerate() {
            let parsed = text::parse_line(raw_line)
                .with_context(|| format!("{}: line {}", name, lineno + 1))?;
            match parsed {
                ParsedLine::Empty => {}
                ParsedLine::Label(id) => {
                    if labels.insert(id, offset).is_some() {
                        bail!("{}: line {}: duplicate LABEL_{}", name, lineno + 1, id);
                    }
                }
                ParsedLine::Statement(stmt) => {
                    let opcode = dialect
                        .table
                        .opcode_of(&stmt.name)
                        .with_context(|| format!("{}: line {}", name, lineno + 1))?;
                    let encoded = encode_args(&stmt.args, dialect.layout(&stmt.name), decoder)
                        .with_context(|| format!("{}: line {}", name, lineno + 1))?;
                    let index = lines.len();
                    for (pos, id) in encoded.local_refs {
                        local_fixups.push((index, pos, id));
                    }
                    for (pos, script, label) in encoded.cross_refs {
                        cross_fixups.push(CrossFixup {
                            line: index,
                            param_pos: pos,
                            script,
                            label,
                        });
                    }
                    let line = CodeLine {
                        opcode,
                        fixed_flag: stmt.flag,
                        params: encoded.params,
                        offset,
                    };
                    offset += u32::from(line.len());
                    lines.push(line);
                }
            }
        }

        for (index, pos, id) in local_fixups {
            let target = labels
                .get(&id)
                .ok_or_else(|| anyhow::anyhow!("{}: LABEL_{} is referenced but never defined", name, id))?;
            lines[index].params[pos..pos + 4].copy_from_slice(&target.to_le_bytes());
        }

        Ok(Self {
            name: name.to_string(),
            lines,
            labels,
            cross_fixups,
        })
    }

    /// Patch cross-script references against the merged label map.
    pub fn resolve(&mut self, global: &HashMap<String, HashMap<u32, u32>>) -> Result<()> {
        for fixup in &self.cross_fixups {
            let target = global
                .get(&fixup.script)
                .and_then(|m| m.get(&fixup.label))
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "{}: unresolved reference to {}::LABEL_{}",
                        self.name,
                        fixup.script,
                        fixup.label
                    )
                })?;
            self.lines[fixup.line].params[fixup.param_pos..fixup.param_pos + 4]
                .copy_from_slice(&target.to_le_bytes());
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        write_lines(&self.lines)
    }
}

/// Merge every script's label contributions into one map.
pub fn merge_labels(scripts: &[ImportedScript]) -> HashMap<String, HashMap<u32, u32>> {
    scripts
        .iter()
        .map(|s| (s.name.clone(), s.labels.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{GameProfile, OpcodeTable};
    use luca_nls::Charset;

    fn dialect() -> Dialect {
        let mut table = OpcodeTable::default();
        table.insert(0x01, "MESSAGE");
        table.insert(0x02, "GOTO");
        table.insert(0x03, "JUMP");
        table.insert(0x04, "END");
        table.insert(0x05, "IFN");
        Dialect::new(GameProfile::LbEn, table)
    }

    fn decoder() -> Decoder {
        Decoder::new(Charset::Utf8)
    }

    /// Hand-assemble a small two-script set with a local loop and a
    /// cross-script jump.
    fn build_scripts() -> Vec<(String, Vec<u8>)> {
        // SEEN1: MESSAGE, GOTO -> offset 0, JUMP -> SEEN2 offset 0
        let mut a = Vec::new();
        let msg_params = {
            let mut p = Vec::new();
            io::put_u16_le(2735, &mut p);
            p.extend_from_slice("こんにちは\0hello\0".as_bytes());
            p
        };
        let msg = CodeLine {
            opcode: 0x01,
            fixed_flag: 1,
            params: msg_params,
            offset: 0,
        };
        msg.write(&mut a);
        let goto_params = 0u32.to_le_bytes().to_vec();
        CodeLine {
            opcode: 0x02,
            fixed_flag: 0,
            params: goto_params,
            offset: 0,
        }
        .write(&mut a);
        let mut jump_params = b"SEEN2\0".to_vec();
        jump_params.extend_from_slice(&0u32.to_le_bytes());
        CodeLine {
            opcode: 0x03,
            fixed_flag: 0,
            params: jump_params,
            offset: 0,
        }
        .write(&mut a);

        // SEEN2: END, plus an unknown opcode with an odd param count.
        let mut b = Vec::new();
        CodeLine {
            opcode: 0x04,
            fixed_flag: 0,
            params: vec![],
            offset: 0,
        }
        .write(&mut b);
        CodeLine {
            opcode: 0x3A,
            fixed_flag: 1,
            params: vec![0x0A, 0x00, 0x14, 0x00, 0x07],
            offset: 0,
        }
        .write(&mut b);

        vec![("SEEN1".to_string(), a), ("SEEN2".to_string(), b)]
    }

    fn decompile(set: &[(String, Vec<u8>)]) -> Vec<(String, String)> {
        let dialect = dialect();
        let decoder = decoder();
        let scripts: Vec<Script> = set
            .iter()
            .map(|(name, bytes)| Script::scan(name, bytes, &dialect, &decoder).unwrap().unwrap())
            .collect();
        let labels = assign_labels(&scripts);
        scripts
            .iter()
            .map(|s| (s.name.clone(), s.render(&labels)))
            .collect()
    }

    fn import(texts: &[(String, String)]) -> Vec<(String, Vec<u8>)> {
        let dialect = dialect();
        let decoder = decoder();
        let mut imported: Vec<ImportedScript> = texts
            .iter()
            .map(|(name, text)| ImportedScript::parse(name, text, &dialect, &decoder).unwrap())
            .collect();
        let merged = merge_labels(&imported);
        imported
            .iter_mut()
            .map(|s| {
                s.resolve(&merged).unwrap();
                (s.name.clone(), s.to_bytes())
            })
            .collect()
    }

    #[test]
    fn decompile_emits_labels_and_text() {
        let set = build_scripts();
        let texts = decompile(&set);
        let seen1 = &texts[0].1;
        assert!(seen1.contains("LABEL_1:\n"), "{}", seen1);
        assert!(seen1.contains("MESSAGE.1 (2735, \"こんにちは\", \"hello\")"), "{}", seen1);
        assert!(seen1.contains("GOTO (LABEL_1)"), "{}", seen1);
        assert!(seen1.contains("JUMP (\"SEEN2\", LABEL_1)"), "{}", seen1);
        let seen2 = &texts[1].1;
        assert!(seen2.contains("UNDEF_3A.1 (10, 20, b7)"), "{}", seen2);
    }

    #[test]
    fn roundtrip_is_byte_identical() {
        let set = build_scripts();
        let texts = decompile(&set);
        let rebuilt = import(&texts);
        assert_eq!(rebuilt, set);
    }

    #[test]
    fn reflowed_text_moves_jump_targets() {
        let set = build_scripts();
        let texts = decompile(&set);
        // Translate the message: the first line gets longer, so every
        // following offset shifts and the labels must follow.
        let edited: Vec<(String, String)> = texts
            .iter()
            .map(|(name, text)| {
                (
                    name.clone(),
                    text.replace("\"hello\"", "\"a noticeably longer translation\""),
                )
            })
            .collect();
        let rebuilt = import(&edited);

        let dialect = dialect();
        let decoder = decoder();
        let scripts: Vec<Script> = rebuilt
            .iter()
            .map(|(name, bytes)| Script::scan(name, bytes, &dialect, &decoder).unwrap().unwrap())
            .collect();
        // GOTO still points at the MESSAGE line (offset 0), and the
        // cross-script jump still lands on SEEN2's first line.
        assert!(scripts[0].local_targets.contains(&0));
        assert_eq!(scripts[0].cross_refs, vec![("SEEN2".to_string(), 0)]);
        // And the second round-trip is stable.
        let labels = assign_labels(&scripts);
        let texts2: Vec<(String, String)> = scripts
            .iter()
            .map(|s| (s.name.clone(), s.render(&labels)))
            .collect();
        assert_eq!(import(&texts2), rebuilt);
    }

    #[test]
    fn data_table_is_skipped() {
        let dialect = dialect();
        let decoder = decoder();
        let data = [0x00, 0x00, 0xAA, 0xBB, 0xCC, 0xDD];
        assert!(Script::scan("TABLE", &data, &dialect, &decoder)
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_label_definition_fails() {
        let dialect = dialect();
        let decoder = decoder();
        let text = "GOTO (LABEL_9)\n";
        assert!(ImportedScript::parse("X", text, &dialect, &decoder).is_err());
    }

    #[test]
    fn unresolved_cross_reference_fails() {
        let dialect = dialect();
        let decoder = decoder();
        let text = "JUMP (\"NOWHERE\", LABEL_1)\n";
        let mut imported = ImportedScript::parse("X", text, &dialect, &decoder).unwrap();
        let merged = merge_labels(&[imported.clone()]);
        assert!(imported.resolve(&merged).is_err());
    }

    #[test]
    fn ifn_condition_with_unmappable_bytes_roundtrips() {
        let dialect = dialect();
        let decoder = decoder();
        // Condition bytes that are not valid UTF-8 must survive as \xNN.
        let mut params = vec![b'A', 0x80, 0x02, b'>', 0x00];
        params.extend_from_slice(&0u32.to_le_bytes());
        let mut data = Vec::new();
        CodeLine {
            opcode: 0x05,
            fixed_flag: 0,
            params,
            offset: 0,
        }
        .write(&mut data);

        let script = Script::scan("COND", &data, &dialect, &decoder).unwrap().unwrap();
        let labels = assign_labels(std::slice::from_ref(&script));
        let text = script.render(&labels);
        assert!(text.contains("\\x80"), "{}", text);
        let mut imported = ImportedScript::parse("COND", &text, &dialect, &decoder).unwrap();
        let merged = merge_labels(std::slice::from_ref(&imported));
        imported.resolve(&merged).unwrap();
        assert_eq!(imported.to_bytes(), data);
    }
}
