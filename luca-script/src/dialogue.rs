//! Dialogue TSV helper: a textual layer over decompiled script output
//! for translators who work in spreadsheets.
//!
//! Two line tags are recognised, `MESSAGE(...)` and `LOG_BEGIN(...)`,
//! in two structural dialects: all-string (every argument quoted, one
//! per language) and voice-prefixed (a numeric voice id first). Cells
//! carry the escaped string bodies verbatim, so `\n \t \" \\` round-trip
//! exactly and a literal tab can never break the TSV framing.

use anyhow::{bail, Context, Result};

use crate::text;

pub const TAGS: [&str; 2] = ["MESSAGE", "LOG_BEGIN"];

/// Lines sampled before settling on a column count.
const DETECT_SAMPLE: usize = 50;
/// Upper bound on language columns.
const MAX_LANGS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueDialect {
    /// Every argument is a quoted string; argument index = language.
    AllString,
    /// First argument is a numeric voice id, strings follow.
    VoicePrefixed,
}

impl std::fmt::Display for DialogueDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogueDialect::AllString => f.write_str("all-string"),
            DialogueDialect::VoicePrefixed => f.write_str("voice-prefixed"),
        }
    }
}

struct TaggedLine<'a> {
    tag: &'static str,
    /// Everything up to and including the opening parenthesis.
    prefix: &'a str,
    args: Vec<String>,
    /// The closing parenthesis and everything after it.
    suffix: &'a str,
}

/// Split an argument list on commas outside quotes, keeping tokens raw.
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

fn parse_tagged(line: &str) -> Option<TaggedLine<'_>> {
    let (tag, at) = TAGS
        .iter()
        .find_map(|&t| line.find(t).map(|i| (t, i)))?;
    let lp = line[at..].find('(')? + at;
    let rp = line.rfind(')')?;
    if rp <= lp {
        return None;
    }
    let args = split_args(&line[lp + 1..rp]);
    if args.is_empty() {
        return None;
    }
    Some(TaggedLine {
        tag,
        prefix: &line[..lp + 1],
        args,
        suffix: &line[rp..],
    })
}

fn is_quoted(token: &str) -> bool {
    token.len() >= 2 && token.starts_with('"') && token.ends_with('"')
}

fn dialect_of(first_arg: &str) -> Option<DialogueDialect> {
    let first = first_arg.trim();
    if first.starts_with('"') {
        return Some(DialogueDialect::AllString);
    }
    if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit() || c == '-') {
        return Some(DialogueDialect::VoicePrefixed);
    }
    None
}

/// Sample the script and report the structural dialect plus the number
/// of language columns (the most quoted strings seen, capped).
pub fn detect(script: &str) -> Option<(DialogueDialect, usize)> {
    let mut dialect = None;
    let mut columns = 0usize;
    let mut sampled = 0usize;
    for line in script.lines() {
        if sampled >= DETECT_SAMPLE {
            break;
        }
        let Some(tagged) = parse_tagged(line) else {
            continue;
        };
        sampled += 1;
        if dialect.is_none() {
            dialect = dialect_of(&tagged.args[0]);
        }
        let quoted = tagged.args.iter().filter(|a| is_quoted(a)).count();
        columns = columns.max(quoted.min(MAX_LANGS));
    }
    dialect.map(|d| (d, columns))
}

/// Extract tagged lines as TSV: `ID\tTAG\tLang 1…`, one row per line,
/// IDs sequential from 1. Cells hold the escaped string bodies.
pub fn extract(script: &str) -> Result<String> {
    let Some((dialect, columns)) = detect(script) else {
        bail!("no MESSAGE/LOG_BEGIN lines found");
    };
    log::info!("dialogue format: {} with {} language column(s)", dialect, columns);

    let mut out = String::from("ID\tTAG");
    for i in 1..=columns {
        out.push_str(&format!("\tLang {}", i));
    }
    out.push('\n');

    let mut id = 0usize;
    for line in script.lines() {
        let Some(tagged) = parse_tagged(line) else {
            continue;
        };
        id += 1;
        out.push_str(&format!("{}\t{}", id, tagged.tag));
        let mut cells = 0usize;
        for arg in tagged.args.iter().filter(|a| is_quoted(a)) {
            if cells == columns {
                break;
            }
            out.push('\t');
            out.push_str(&arg[1..arg.len() - 1]);
            cells += 1;
        }
        for _ in cells..columns {
            out.push('\t');
        }
        out.push('\n');
    }
    if id == 0 {
        bail!("no MESSAGE/LOG_BEGIN lines found");
    }
    Ok(out)
}

/// Replace the `lang`-th (0-based) quoted string of each tagged line
/// with the TSV cell addressed by the line's sequential ID. Returns the
/// rewritten script and the number of lines changed.
pub fn import(script: &str, tsv: &str, lang: usize) -> Result<(String, usize)> {
    let mut rows = std::collections::HashMap::new();
    for (lineno, row) in tsv.lines().enumerate() {
        if lineno == 0 {
            continue;
        }
        let row = row.trim_end_matches('\r');
        if row.is_empty() {
            continue;
        }
        let cells: Vec<&str> = row.split('\t').collect();
        let id: usize = cells[0]
            .trim()
            .parse()
            .with_context(|| format!("TSV row {}: bad ID {:?}", lineno + 1, cells[0]))?;
        if let Some(cell) = cells.get(2 + lang) {
            if !cell.is_empty() {
                rows.insert(id, cell.to_string());
            }
        }
    }

    let mut out = String::with_capacity(script.len());
    let mut id = 0usize;
    let mut changed = 0usize;
    for line in script.lines() {
        let Some(tagged) = parse_tagged(line) else {
            out.push_str(line);
            out.push('\n');
            continue;
        };
        id += 1;
        let Some(cell) = rows.get(&id) else {
            out.push_str(line);
            out.push('\n');
            continue;
        };
        // Validate the replacement's escapes before splicing it in.
        text::unquote(&format!("\"{}\"", cell))
            .with_context(|| format!("TSV ID {}: bad escape in replacement", id))?;

        let mut args = tagged.args.clone();
        let mut quoted_seen = 0usize;
        let mut replaced = false;
        for arg in args.iter_mut() {
            if is_quoted(arg) {
                if quoted_seen == lang {
                    let current = &arg[1..arg.len() - 1];
                    if current != cell {
                        *arg = format!("\"{}\"", cell);
                        replaced = true;
                    }
                    break;
                }
                quoted_seen += 1;
            }
        }
        if replaced {
            changed += 1;
            out.push_str(tagged.prefix);
            out.push_str(&args.join(", "));
            out.push_str(tagged.suffix);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    Ok((out, changed))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "\
LABEL_1:
MESSAGE.1 (2735, \"こんにちは\\n世界\", \"hello\\nworld\")
EQU (1, 2)
MESSAGE.1 (2736, \"さよなら\", \"goodbye\")
LOG_BEGIN (100, \"ログ\", \"log \\\"quoted\\\"\")
GOTO (LABEL_1)
";

    #[test]
    fn detects_voice_prefixed_two_columns() {
        let (dialect, columns) = detect(SCRIPT).unwrap();
        assert_eq!(dialect, DialogueDialect::VoicePrefixed);
        assert_eq!(columns, 2);
    }

    #[test]
    fn detects_all_string() {
        let script = "MESSAGE (\"a\", \"b\", \"c\")\n";
        let (dialect, columns) = detect(script).unwrap();
        assert_eq!(dialect, DialogueDialect::AllString);
        assert_eq!(columns, 3);
    }

    #[test]
    fn extract_emits_header_and_sequential_ids() {
        let tsv = extract(SCRIPT).unwrap();
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines[0], "ID\tTAG\tLang 1\tLang 2");
        assert_eq!(lines[1], "1\tMESSAGE\tこんにちは\\n世界\thello\\nworld");
        assert_eq!(lines[2], "2\tMESSAGE\tさよなら\tgoodbye");
        assert_eq!(lines[3], "3\tLOG_BEGIN\tログ\tlog \\\"quoted\\\"");
    }

    #[test]
    fn import_replaces_selected_language() {
        let tsv = "ID\tTAG\tLang 1\tLang 2\n1\tMESSAGE\t\tbonjour\\nmonde\n3\tLOG_BEGIN\t\tjournal\n";
        let (rewritten, changed) = import(SCRIPT, tsv, 1).unwrap();
        assert_eq!(changed, 2);
        assert!(rewritten.contains("MESSAGE.1 (2735, \"こんにちは\\n世界\", \"bonjour\\nmonde\")"));
        assert!(rewritten.contains("\"journal\""));
        assert!(rewritten.contains("\"goodbye\""), "row 2 untouched");
        assert!(rewritten.contains("GOTO (LABEL_1)"));
    }

    #[test]
    fn extract_import_roundtrip_is_identity() {
        let tsv = extract(SCRIPT).unwrap();
        let (rewritten, changed) = import(SCRIPT, &tsv, 0).unwrap();
        assert_eq!(changed, 0, "unchanged cells must not rewrite lines");
        assert_eq!(rewritten, SCRIPT);
    }

    #[test]
    fn bad_escape_in_cell_is_an_error() {
        let tsv = "ID\tTAG\tLang 1\tLang 2\n1\tMESSAGE\tbad \\q escape\t\n";
        assert!(import(SCRIPT, tsv, 0).is_err());
    }
}
