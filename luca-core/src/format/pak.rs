//! PAK archive container: a u32 count, a data offset, an id/offset/length
//! index, an optional name table, then the entry payloads.
//!
//! Replacing entries keeps the header and name-table region byte for byte
//! and re-packs payloads in index order, preserving the original
//! inter-entry padding, so an untouched archive round-trips identically.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use luca_nls::{Charset, Decoder};

use crate::cancel::CancelToken;
use crate::format::io;

#[derive(Debug, Clone)]
pub struct PakEntry {
    pub id: u32,
    pub offset: u32,
    pub length: u32,
    pub name: Option<String>,
    pub data: Vec<u8>,
    /// Padding bytes that followed this entry's payload in the source.
    gap: Vec<u8>,
}

impl PakEntry {
    /// Display name: the table name when present, the id otherwise.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{:04}", self.id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pak {
    /// Archive stem, e.g. `SCRIPT` for `SCRIPT.PAK`.
    pub name: String,
    pub file_count: u32,
    data_offset: u32,
    /// Verbatim bytes between the index and `data_offset`.
    name_region: Vec<u8>,
    entries: Vec<PakEntry>,
}

impl Pak {
    pub fn open(path: impl AsRef<Path>, charset: Charset) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("unable to read {:?}", path))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(&bytes, &name, charset)
    }

    pub fn parse(bytes: &[u8], name: &str, charset: Charset) -> Result<Self> {
        let mut off = 0usize;
        let file_count = io::read_u32_le(bytes, &mut off)?;
        let data_offset = io::read_u32_le(bytes, &mut off)?;

        let index_end = 8 + file_count as usize * 12;
        if index_end > bytes.len() || (data_offset as usize) < index_end {
            bail!(
                "PAK index inconsistent: {} entries, data offset {}, file is {} bytes",
                file_count,
                data_offset,
                bytes.len()
            );
        }

        let mut entries = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            let id = io::read_u32_le(bytes, &mut off)?;
            let offset = io::read_u32_le(bytes, &mut off)?;
            let length = io::read_u32_le(bytes, &mut off)?;
            if offset as usize + length as usize > bytes.len() {
                bail!(
                    "PAK entry {} out of range: offset {} length {} (file {})",
                    id,
                    offset,
                    length,
                    bytes.len()
                );
            }
            entries.push(PakEntry {
                id,
                offset,
                length,
                name: None,
                data: bytes[offset as usize..(offset + length) as usize].to_vec(),
                gap: Vec::new(),
            });
        }

        let name_region = bytes[index_end..data_offset as usize].to_vec();
        if !name_region.is_empty() {
            let decoder = Decoder::new(charset);
            let mut pos = 0usize;
            for entry in entries.iter_mut() {
                let Some(nul) = name_region[pos..].iter().position(|&b| b == 0) else {
                    log::warn!("PAK name table ends after {} of {} names", entry.id, file_count);
                    break;
                };
                entry.name = Some(decoder.decode(&name_region[pos..pos + nul]).into_owned());
                pos += nul + 1;
            }
        }

        // Padding between consecutive payloads (and up to EOF after the
        // last one) is preserved so a no-op rewrite is byte-identical.
        for i in 0..entries.len() {
            let end = (entries[i].offset + entries[i].length) as usize;
            let next = if i + 1 < entries.len() {
                entries[i + 1].offset as usize
            } else {
                bytes.len()
            };
            if next > end {
                entries[i].gap = bytes[end..next].to_vec();
            }
        }

        Ok(Self {
            name: name.to_string(),
            file_count,
            data_offset,
            name_region,
            entries,
        })
    }

    pub fn entries(&self) -> &[PakEntry] {
        &self.entries
    }

    /// Entries are 1-indexed externally; id 0 is reserved.
    pub fn get_by_id(&self, id: u32) -> Result<&PakEntry> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow::anyhow!("no PAK entry with id {}", id))
    }

    pub fn get_by_name(&self, name: &str) -> Option<&PakEntry> {
        self.entries.iter().find(|e| e.name.as_deref() == Some(name))
    }

    fn set_data(entry: &mut PakEntry, data: Vec<u8>) -> Result<()> {
        if data.is_empty() {
            bail!("refusing zero-length replacement for entry {}", entry.display_name());
        }
        entry.length = data.len() as u32;
        entry.data = data;
        Ok(())
    }

    pub fn set_by_name(&mut self, name: &str, data: Vec<u8>) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name.as_deref() == Some(name))
            .ok_or_else(|| anyhow::anyhow!("no PAK entry named {}", name))?;
        Self::set_data(entry, data)
    }

    pub fn set_by_id(&mut self, id: u32, data: Vec<u8>) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow::anyhow!("no PAK entry with id {}", id))?;
        Self::set_data(entry, data)
    }

    /// Extract every entry into `out_dir` and write an
    /// `id<TAB>name<TAB>length` index beside them.
    pub fn extract_all(
        &self,
        out_dir: impl AsRef<Path>,
        list_path: impl AsRef<Path>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let out_dir = out_dir.as_ref();
        fs::create_dir_all(out_dir)?;
        println!("Extracting {} entries", self.entries.len());

        let mut list = String::new();
        for entry in &self.entries {
            cancel.check()?;
            let name = entry.display_name();
            io::atomic_write(out_dir.join(&name), &entry.data)?;
            list.push_str(&format!("{}\t{}\t{}\n", entry.id, name, entry.length));
        }
        io::atomic_write(list_path, list.as_bytes())?;
        Ok(())
    }

    /// Replace entries from a directory: every regular file whose name
    /// matches an entry overrides it. Unknown names warn and skip.
    pub fn replace_from_dir(&mut self, dir: impl AsRef<Path>, cancel: &CancelToken) -> Result<usize> {
        let mut replaced = 0usize;
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (i, entry) in self.entries.iter().enumerate() {
            by_name.insert(entry.display_name(), i);
        }

        let mut paths: Vec<_> = fs::read_dir(dir.as_ref())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        for path in paths {
            cancel.check()?;
            let name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            match by_name.get(&name) {
                Some(&i) => {
                    let data = fs::read(&path)?;
                    Self::set_data(&mut self.entries[i], data)?;
                    replaced += 1;
                }
                None => log::warn!("no PAK entry matches {:?}, skipping", name),
            }
        }
        Ok(replaced)
    }

    /// Replace entries from a list file: UTF-8, one `id<TAB>path` or
    /// `id<TAB>name<TAB>path` per line, `#` starts a comment.
    pub fn replace_from_list(&mut self, list: impl AsRef<Path>, cancel: &CancelToken) -> Result<usize> {
        let text = fs::read_to_string(list.as_ref())
            .with_context(|| format!("unable to read {:?}", list.as_ref()))?;
        let mut replaced = 0usize;
        for (lineno, line) in text.lines().enumerate() {
            cancel.check()?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 2 {
                bail!("list line {}: expected id<TAB>[name<TAB>]path", lineno + 1);
            }
            let id: u32 = fields[0]
                .trim()
                .parse()
                .with_context(|| format!("list line {}: bad id {:?}", lineno + 1, fields[0]))?;
            let path = fields[fields.len() - 1].trim();
            let data = fs::read(path).with_context(|| format!("unable to read {:?}", path))?;
            self.set_by_id(id, data)?;
            replaced += 1;
        }
        Ok(replaced)
    }

    /// Serialise the archive: offsets are recomputed in index order, the
    /// header and name-table region are preserved verbatim.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        io::put_u32_le(self.file_count, &mut out);
        io::put_u32_le(self.data_offset, &mut out);

        let mut cursor = self.data_offset;
        let mut offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            offsets.push(cursor);
            cursor += entry.data.len() as u32 + entry.gap.len() as u32;
        }

        for (entry, &offset) in self.entries.iter().zip(&offsets) {
            io::put_u32_le(entry.id, &mut out);
            io::put_u32_le(offset, &mut out);
            io::put_u32_le(entry.data.len() as u32, &mut out);
        }
        out.extend_from_slice(&self.name_region);
        for entry in &self.entries {
            out.extend_from_slice(&entry.data);
            out.extend_from_slice(&entry.gap);
        }
        out
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        io::atomic_write(path, &self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pak(names: bool) -> Vec<u8> {
        let payloads: [&[u8]; 3] = [b"first entry", b"second", b"third payload!"];
        let labels = ["ALPHA", "BETA", "GAMMA"];

        let mut name_region = Vec::new();
        if names {
            for label in labels {
                name_region.extend_from_slice(label.as_bytes());
                name_region.push(0);
            }
        }

        let index_end = 8 + 3 * 12;
        let data_offset = (index_end + name_region.len()) as u32;
        let mut out = Vec::new();
        io::put_u32_le(3, &mut out);
        io::put_u32_le(data_offset, &mut out);
        let mut cursor = data_offset;
        for (i, p) in payloads.iter().enumerate() {
            io::put_u32_le(i as u32 + 1, &mut out);
            io::put_u32_le(cursor, &mut out);
            io::put_u32_le(p.len() as u32, &mut out);
            cursor += p.len() as u32;
        }
        out.extend_from_slice(&name_region);
        for p in payloads {
            out.extend_from_slice(p);
        }
        out
    }

    #[test]
    fn parse_reads_index_and_names() {
        let bytes = build_pak(true);
        let pak = Pak::parse(&bytes, "TEST", Charset::Utf8).unwrap();
        assert_eq!(pak.file_count, 3);
        assert_eq!(pak.get_by_id(2).unwrap().name.as_deref(), Some("BETA"));
        assert_eq!(pak.get_by_name("GAMMA").unwrap().data, b"third payload!");
        assert!(pak.get_by_id(0).is_err());
    }

    #[test]
    fn unchanged_archive_roundtrips_byte_identical() {
        for names in [false, true] {
            let bytes = build_pak(names);
            let pak = Pak::parse(&bytes, "TEST", Charset::Utf8).unwrap();
            assert_eq!(pak.to_bytes(), bytes);
        }
    }

    #[test]
    fn longer_replacement_shifts_following_offsets() {
        let bytes = build_pak(true);
        let mut pak = Pak::parse(&bytes, "TEST", Charset::Utf8).unwrap();
        let old_len = pak.get_by_id(2).unwrap().length as usize;
        let replacement = b"a considerably longer second entry".to_vec();
        let delta = replacement.len() - old_len;
        pak.set_by_id(2, replacement.clone()).unwrap();

        let out = pak.to_bytes();
        assert_eq!(out.len(), bytes.len() + delta);

        let reread = Pak::parse(&out, "TEST", Charset::Utf8).unwrap();
        assert_eq!(reread.get_by_id(1).unwrap().data, b"first entry");
        assert_eq!(reread.get_by_id(2).unwrap().data, replacement);
        assert_eq!(reread.get_by_id(3).unwrap().data, b"third payload!");
    }

    #[test]
    fn zero_length_replacement_is_refused() {
        let bytes = build_pak(true);
        let mut pak = Pak::parse(&bytes, "TEST", Charset::Utf8).unwrap();
        assert!(pak.set_by_id(1, Vec::new()).is_err());
        assert!(pak.set_by_name("NOSUCH", b"x".to_vec()).is_err());
    }
}
