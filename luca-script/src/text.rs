//! The decompiled text grammar: one statement per line,
//! `NAME (arg, arg, ...) // comment`, labels as `LABEL_n:` lines.
//!
//! A non-zero fixed flag rides as a dotted suffix on the mnemonic
//! (`MESSAGE.1 (...)`) so the header byte survives the round trip.
//! String escapes are `\\ \" \n \r \t` plus `\xNN` for bytes the charset
//! could not map; an unknown escape on import is a format error.

use anyhow::{bail, Result};
use luca_nls::Chunk;

/// Quote a chunk sequence for emission.
pub fn quote(chunks: &[Chunk]) -> String {
    let mut out = String::from("\"");
    for chunk in chunks {
        match chunk {
            Chunk::Text(s) => {
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '"' => out.push_str("\\\""),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        c => out.push(c),
                    }
                }
            }
            Chunk::Raw(b) => out.push_str(&format!("\\x{:02X}", b)),
        }
    }
    out.push('"');
    out
}

/// Parse the body of a quoted token back into chunks.
pub fn unquote(token: &str) -> Result<Vec<Chunk>> {
    let inner = token
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| anyhow::anyhow!("expected a quoted string, got {:?}", token))?;

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut text = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => text.push('\\'),
            Some('"') => text.push('"'),
            Some('n') => text.push('\n'),
            Some('r') => text.push('\r'),
            Some('t') => text.push('\t'),
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                let (Some(hi), Some(lo)) = (hi, lo) else {
                    bail!("truncated \\x escape in {:?}", token);
                };
                let byte = u8::from_str_radix(&format!("{}{}", hi, lo), 16)
                    .map_err(|_| anyhow::anyhow!("bad \\x escape in {:?}", token))?;
                if !text.is_empty() {
                    chunks.push(Chunk::Text(std::mem::take(&mut text)));
                }
                chunks.push(Chunk::Raw(byte));
            }
            Some(other) => bail!("unknown escape \\{} in {:?}", other, token),
            None => bail!("dangling backslash in {:?}", token),
        }
    }
    if !text.is_empty() {
        chunks.push(Chunk::Text(text));
    }
    Ok(chunks)
}

/// One argument token of a parsed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawArg {
    Number(u32),
    /// `bN`: the odd trailing byte of a u16 dump.
    Byte(u8),
    /// `LABEL_n` reference.
    Label(u32),
    Str(Vec<Chunk>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatement {
    pub name: String,
    pub flag: u8,
    pub args: Vec<RawArg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Empty,
    /// `LABEL_n:` definition.
    Label(u32),
    Statement(RawStatement),
}

/// Strip a trailing `// comment` that is not inside a string.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut in_str = false;
    let mut esc = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if esc {
            esc = false;
        } else if b == b'\\' {
            esc = true;
        } else if b == b'"' {
            in_str = !in_str;
        } else if !in_str && b == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            return &line[..i];
        }
        i += 1;
    }
    line
}

/// Split an argument list on commas that sit outside quotes.
fn split_args(inside: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut buf = String::new();
    let mut in_str = false;
    let mut esc = false;
    for c in inside.chars() {
        if esc {
            buf.push(c);
            esc = false;
            continue;
        }
        match c {
            '\\' => {
                buf.push(c);
                esc = true;
            }
            '"' => {
                buf.push(c);
                in_str = !in_str;
            }
            ',' if !in_str => {
                let part = buf.trim().to_string();
                if !part.is_empty() {
                    args.push(part);
                }
                buf.clear();
            }
            c => buf.push(c),
        }
    }
    let tail = buf.trim().to_string();
    if !tail.is_empty() {
        args.push(tail);
    }
    args
}

fn parse_arg(token: &str) -> Result<RawArg> {
    if token.starts_with('"') {
        return Ok(RawArg::Str(unquote(token)?));
    }
    if let Some(id) = token.strip_prefix("LABEL_") {
        return Ok(RawArg::Label(
            id.parse()
                .map_err(|_| anyhow::anyhow!("bad label reference {:?}", token))?,
        ));
    }
    if let Some(n) = token.strip_prefix('b') {
        if let Ok(byte) = n.parse::<u8>() {
            return Ok(RawArg::Byte(byte));
        }
    }
    token
        .parse::<u32>()
        .map(RawArg::Number)
        .map_err(|_| anyhow::anyhow!("unrecognised argument {:?}", token))
}

/// Parse one line of decompiled script text.
pub fn parse_line(line: &str) -> Result<ParsedLine> {
    let line = strip_comment(line).trim();
    if line.is_empty() {
        return Ok(ParsedLine::Empty);
    }

    if let Some(def) = line.strip_suffix(':') {
        if let Some(id) = def.strip_prefix("LABEL_") {
            let id = id
                .parse()
                .map_err(|_| anyhow::anyhow!("bad label definition {:?}", line))?;
            return Ok(ParsedLine::Label(id));
        }
    }

    let Some(lp) = line.find('(') else {
        bail!("statement without argument list: {:?}", line);
    };
    let Some(rp) = line.rfind(')') else {
        bail!("unterminated argument list: {:?}", line);
    };
    if rp < lp {
        bail!("malformed argument list: {:?}", line);
    }

    let head = line[..lp].trim();
    let (name, flag) = match head.split_once('.') {
        Some((name, flag)) => (
            name,
            flag.parse::<u8>()
                .map_err(|_| anyhow::anyhow!("bad fixed flag in {:?}", head))?,
        ),
        None => (head, 0),
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("bad mnemonic {:?}", head);
    }

    let mut args = Vec::new();
    for token in split_args(&line[lp + 1..rp]) {
        args.push(parse_arg(&token)?);
    }
    Ok(ParsedLine::Statement(RawStatement {
        name: name.to_string(),
        flag,
        args,
    }))
}
