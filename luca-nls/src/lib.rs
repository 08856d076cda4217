use std::borrow::Cow;
use std::str::FromStr;

use anyhow::{bail, Result};
use encoding_rs::{Encoding as RsEncoding, GB18030, SHIFT_JIS, UTF_16LE, UTF_8};

/// On-disk text encodings used by LucaSystem assets.
///
/// `Unicode` is UTF-16LE, the encoding the engine uses for western releases
/// (e.g. *Little Busters! English Edition*). `Gbk` is treated as GB18030,
/// a superset, which is robust for legacy CN assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    ShiftJis,
    Gbk,
    Unicode,
}

impl Charset {
    #[inline]
    pub fn as_encoding_rs(self) -> &'static RsEncoding {
        match self {
            Charset::Utf8 => UTF_8,
            Charset::ShiftJis => SHIFT_JIS,
            Charset::Gbk => GB18030,
            Charset::Unicode => UTF_16LE,
        }
    }

    /// Widest byte length of a single encoded character.
    fn max_char_len(self) -> usize {
        match self {
            Charset::Utf8 => 4,
            Charset::ShiftJis | Charset::Gbk => 2,
            Charset::Unicode => 4,
        }
    }
}

impl FromStr for Charset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(Charset::Utf8),
            "SJIS" | "SHIFTJIS" | "SHIFT-JIS" | "SHIFT_JIS" => Ok(Charset::ShiftJis),
            "GBK" | "GB18030" => Ok(Charset::Gbk),
            "UNICODE" | "UTF-16" | "UTF-16LE" | "UTF16" => Ok(Charset::Unicode),
            other => bail!("unknown charset: {}", other),
        }
    }
}

impl std::fmt::Display for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Charset::Utf8 => "UTF-8",
            Charset::ShiftJis => "ShiftJIS",
            Charset::Gbk => "GBK",
            Charset::Unicode => "Unicode",
        };
        f.write_str(name)
    }
}

/// A run of decoded text or a byte the charset could not map.
///
/// Callers that need lossless round-trips (the script decompiler) render
/// `Raw` bytes as `\xNN` escapes and feed them back through
/// [`Decoder::encode_chunks`] untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Text(String),
    Raw(u8),
}

/// A decoder/encoder bound to one charset.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    charset: Charset,
}

impl Decoder {
    #[inline]
    pub fn new(charset: Charset) -> Self {
        Self { charset }
    }

    #[inline]
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Decode a full buffer, replacing unmappable sequences.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self.charset {
            Charset::Utf8 => match std::str::from_utf8(bytes) {
                Ok(s) => Cow::Borrowed(s),
                Err(_) => Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
            },
            _ => {
                let (cow, _had_errors, _) = self.charset.as_encoding_rs().decode(bytes);
                cow
            }
        }
    }

    /// Decode a C-style string: stop at the first NUL.
    pub fn decode_cstr<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        let end = match self.charset {
            // NUL in UTF-16LE is the two-byte pair 00 00 at an even offset.
            Charset::Unicode => bytes
                .chunks_exact(2)
                .position(|p| p == [0, 0])
                .map(|i| i * 2)
                .unwrap_or(bytes.len() & !1),
            _ => bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len()),
        };
        self.decode(&bytes[..end])
    }

    /// Decode into text runs and raw bytes, never losing input.
    ///
    /// Unmappable bytes come back as [`Chunk::Raw`] instead of U+FFFD so the
    /// caller can reproduce the original byte stream exactly.
    pub fn decode_chunks(&self, bytes: &[u8]) -> Vec<Chunk> {
        let mut out: Vec<Chunk> = Vec::new();
        let enc = self.charset.as_encoding_rs();

        // Fast path: the whole buffer decodes cleanly.
        let (s, _, had_errors) = enc.decode(bytes);
        if !had_errors {
            if !s.is_empty() {
                out.push(Chunk::Text(s.into_owned()));
            }
            return out;
        }

        let step = if self.charset == Charset::Unicode { 2 } else { 1 };
        let mut text = String::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let mut matched = 0;
            for len in (step..=self.charset.max_char_len()).step_by(step) {
                if pos + len > bytes.len() {
                    break;
                }
                let (s, _, errors) = enc.decode(&bytes[pos..pos + len]);
                if !errors && s.chars().count() == 1 {
                    text.push_str(&s);
                    matched = len;
                    break;
                }
            }
            if matched > 0 {
                pos += matched;
            } else {
                if !text.is_empty() {
                    out.push(Chunk::Text(std::mem::take(&mut text)));
                }
                out.push(Chunk::Raw(bytes[pos]));
                pos += 1;
            }
        }
        if !text.is_empty() {
            out.push(Chunk::Text(text));
        }
        out
    }

    /// Encode a string. Best effort: unrepresentable chars are replaced
    /// with the encoding's substitute.
    pub fn encode<'a>(&self, s: &'a str) -> Cow<'a, [u8]> {
        match self.charset {
            Charset::Utf8 => Cow::Borrowed(s.as_bytes()),
            // encoding_rs has no UTF-16 encoder; do it by hand.
            Charset::Unicode => {
                let mut buf = Vec::with_capacity(s.len() * 2);
                for unit in s.encode_utf16() {
                    buf.extend_from_slice(&unit.to_le_bytes());
                }
                Cow::Owned(buf)
            }
            _ => {
                let (cow, _, _) = self.charset.as_encoding_rs().encode(s);
                cow
            }
        }
    }

    pub fn encode_owned(&self, s: &str) -> Vec<u8> {
        self.encode(s).into_owned()
    }

    /// Re-encode a chunk sequence produced by [`decode_chunks`].
    pub fn encode_chunks(&self, chunks: &[Chunk]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            match chunk {
                Chunk::Text(s) => out.extend_from_slice(&self.encode(s)),
                Chunk::Raw(b) => out.push(*b),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_decode_cstr() {
        let d = Decoder::new(Charset::Utf8);
        assert_eq!(d.decode_cstr(b"hello\0world"), "hello");
    }

    #[test]
    fn unicode_cstr_stops_at_wide_nul() {
        let d = Decoder::new(Charset::Unicode);
        let bytes = [b'A', 0, b'B', 0, 0, 0, b'C', 0];
        assert_eq!(d.decode_cstr(&bytes), "AB");
    }

    #[test]
    fn encode_roundtrip_shiftjis() {
        let d = Decoder::new(Charset::ShiftJis);
        let s = "こんにちは123";
        let b = d.encode_owned(s);
        assert_eq!(d.decode(&b), s);
    }

    #[test]
    fn unicode_encode_roundtrip() {
        let d = Decoder::new(Charset::Unicode);
        let s = "理樹くん";
        let b = d.encode_owned(s);
        assert_eq!(d.decode(&b), s);
    }

    #[test]
    fn chunks_preserve_bad_bytes() {
        let d = Decoder::new(Charset::Utf8);
        let bytes = [b'o', b'k', 0xFE, b'!', 0xFF];
        let chunks = d.decode_chunks(&bytes);
        assert_eq!(
            chunks,
            vec![
                Chunk::Text("ok".into()),
                Chunk::Raw(0xFE),
                Chunk::Text("!".into()),
                Chunk::Raw(0xFF),
            ]
        );
        assert_eq!(d.encode_chunks(&chunks), bytes);
    }

    #[test]
    fn charset_parses_aliases() {
        assert_eq!(Charset::from_str("utf-8").unwrap(), Charset::Utf8);
        assert_eq!(Charset::from_str("SJIS").unwrap(), Charset::ShiftJis);
        assert_eq!(Charset::from_str("gb18030").unwrap(), Charset::Gbk);
        assert_eq!(Charset::from_str("UTF-16LE").unwrap(), Charset::Unicode);
        assert!(Charset::from_str("latin1").is_err());
    }
}
