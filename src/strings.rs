//! Localized string tables.
//!
//! A plugin marked localized does not carry its display text inline; selected
//! subrecords hold a 32-bit string id instead, resolved against up to three
//! sidecar files next to the plugin:
//!
//! ```text
//! <plugin dir>/Strings/<plugin base>_<Language>.STRINGS
//! <plugin dir>/Strings/<plugin base>_<Language>.DLSTRINGS
//! <plugin dir>/Strings/<plugin base>_<Language>.ILSTRINGS
//! ```
//!
//! Each file starts with a `count`/`data_size` header and a directory of
//! `(string id, offset)` pairs; offsets point into the data block that
//! follows the directory. `.STRINGS` stores bare NUL-terminated byte runs,
//! the other two prefix each entry with a u32 length (NUL included in the
//! count).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use scroll::{LE, Pread};

use crate::codec::Sig;
use crate::encoding;
use crate::error;

/// Subrecord signatures that hold a string id instead of inline text when the
/// plugin is localized. This is the conventional set used by translation
/// tooling; it is configuration, not format.
pub const LOCALIZED_FIELDS: [Sig; 13] = [
    *b"FULL", // display name
    *b"DESC", // description
    *b"RNAM", // response text (INFO)
    *b"NAM1", // prompt (INFO)
    *b"CNAM", // journal entry (QUST)
    *b"NNAM", // stage display name (QUST)
    *b"ITXT", // button text (MESG)
    *b"DNAM", // effect description (MGEF)
    *b"SHRT", // short name (NPC_)
    *b"TNAM", // book text (BOOK/NOTE)
    *b"RDMP", // map name (REGN)
    *b"EPF2", // perk entry text
    *b"EPFD", // perk entry data
];

/// Whether a subrecord signature is one of the designated localized fields.
pub fn is_localized_field(sig: &Sig) -> bool {
    LOCALIZED_FIELDS.contains(sig)
}

/// The three sidecar flavors, differing only in payload framing.
#[derive(Debug, PartialEq, Copy, Clone)]
enum TableKind {
    Strings,
    DlStrings,
    IlStrings,
}

impl TableKind {
    const ALL: [TableKind; 3] = [TableKind::Strings, TableKind::DlStrings, TableKind::IlStrings];

    fn extension(self) -> &'static str {
        match self {
            TableKind::Strings => "STRINGS",
            TableKind::DlStrings => "DLSTRINGS",
            TableKind::IlStrings => "ILSTRINGS",
        }
    }

    fn length_prefixed(self) -> bool {
        !matches!(self, TableKind::Strings)
    }
}

/// An id → text map loaded from a plugin's sidecar string files.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: HashMap<u32, String>,
    language: String,
}

impl StringTable {
    /// Loads every sidecar present for `plugin_path` in `language`.
    ///
    /// Missing files are skipped silently (plugins routinely ship only the
    /// flavors they use); a file that is present but malformed is an error.
    pub fn load<P: AsRef<Path>>(plugin_path: P, language: &str) -> error::Result<StringTable> {
        let plugin_path = plugin_path.as_ref();
        let mut table = StringTable {
            strings: HashMap::new(),
            language: language.to_string(),
        };
        for kind in TableKind::ALL {
            let path = sidecar_path(plugin_path, language, kind);
            if !path.is_file() {
                log::debug!("no strings sidecar at {}", path.display());
                continue;
            }
            let bytes = std::fs::read(&path).map_err(error::Error::StringsIo)?;
            let before = table.strings.len();
            table.load_one(&bytes, kind).map_err(|err| match err {
                error::Error::Scroll(_) => error::Error::StringsFormat(format!(
                    "{}: directory extends past end of file",
                    path.display()
                )),
                other => other,
            })?;
            log::debug!(
                "loaded {} strings from {}",
                table.strings.len() - before,
                path.display()
            );
        }
        Ok(table)
    }

    fn load_one(&mut self, bytes: &[u8], kind: TableKind) -> error::Result<()> {
        let offset = &mut 0usize;
        let count = bytes.gread_with::<u32>(offset, LE)? as usize;
        let data_size = bytes.gread_with::<u32>(offset, LE)? as usize;

        let dir_end = 8 + count
            .checked_mul(8)
            .ok_or_else(|| error::Error::StringsFormat("directory count overflows".into()))?;
        if dir_end + data_size > bytes.len() {
            return Err(error::Error::StringsFormat(format!(
                "header declares {} entries and {} data bytes, file holds {}",
                count,
                data_size,
                bytes.len()
            )));
        }
        let data = &bytes[dir_end..dir_end + data_size];

        for _ in 0..count {
            let id = bytes.gread_with::<u32>(offset, LE)?;
            let start = bytes.gread_with::<u32>(offset, LE)? as usize;
            match read_entry(data, start, kind) {
                Some(raw) => {
                    self.strings.insert(id, encoding::decode_to_utf8(raw));
                }
                None => {
                    log::warn!(
                        "string id {} points outside the data block (offset {} of {})",
                        id,
                        start,
                        data_size
                    );
                }
            }
        }
        Ok(())
    }

    /// Resolves a string id to its translated text.
    pub fn lookup(&self, id: u32) -> Option<&str> {
        self.strings.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

fn read_entry(data: &[u8], start: usize, kind: TableKind) -> Option<&[u8]> {
    if kind.length_prefixed() {
        let len = data.pread_with::<u32>(start, LE).ok()? as usize;
        data.get(start + 4..start + 4 + len)
    } else {
        let tail = data.get(start..)?;
        let nul = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Some(&tail[..nul])
    }
}

fn sidecar_path(plugin_path: &Path, language: &str, kind: TableKind) -> PathBuf {
    let dir = plugin_path.parent().unwrap_or_else(|| Path::new(""));
    let base = plugin_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join("Strings").join(format!(
        "{}_{}.{}",
        base,
        capitalize(language),
        kind.extension()
    ))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Assembles a sidecar file image from `(id, payload)` pairs, where each
    /// payload is already framed for the flavor under test.
    fn table_bytes(entries: &[(u32, &[u8])]) -> Vec<u8> {
        let mut data = Vec::new();
        let mut directory = Vec::new();
        for &(id, payload) in entries {
            directory.push((id, data.len() as u32));
            data.extend_from_slice(payload);
        }
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        for (id, offset) in directory {
            bytes.extend_from_slice(&id.to_le_bytes());
            bytes.extend_from_slice(&offset.to_le_bytes());
        }
        bytes.extend_from_slice(&data);
        bytes
    }

    fn length_prefixed(text: &[u8]) -> Vec<u8> {
        let mut framed = Vec::new();
        framed.extend_from_slice(&((text.len() + 1) as u32).to_le_bytes());
        framed.extend_from_slice(text);
        framed.push(0);
        framed
    }

    #[test]
    fn strings_flavor_is_nul_terminated() {
        let mut table = StringTable::default();
        table
            .load_one(
                &table_bytes(&[(42, b"Guard\0"), (7, b"Iron Sword\0")]),
                TableKind::Strings,
            )
            .unwrap();
        assert_eq!(table.lookup(42), Some("Guard"));
        assert_eq!(table.lookup(7), Some("Iron Sword"));
        assert_eq!(table.lookup(1), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn dlstrings_flavor_is_length_prefixed() {
        let framed = length_prefixed("Bonjour \u{2014} bienvenue".as_bytes());
        let mut table = StringTable::default();
        table
            .load_one(&table_bytes(&[(99, &framed)]), TableKind::DlStrings)
            .unwrap();
        assert_eq!(table.lookup(99), Some("Bonjour \u{2014} bienvenue"));
    }

    #[test]
    fn legacy_encoded_entries_are_normalized() {
        // "Épée" in Windows-1252.
        let mut table = StringTable::default();
        table
            .load_one(
                &table_bytes(&[(1, &[0xC9, 0x70, 0xE9, 0x65, 0x00])]),
                TableKind::Strings,
            )
            .unwrap();
        assert_eq!(table.lookup(1), Some("Épée"));
    }

    #[test]
    fn short_file_is_a_format_error() {
        let mut bytes = table_bytes(&[(42, b"Guard\0")]);
        bytes.truncate(bytes.len() - 3);
        let mut table = StringTable::default();
        match table.load_one(&bytes, TableKind::Strings) {
            Err(error::Error::StringsFormat(_)) => {}
            other => panic!("expected StringsFormat, got {:?}", other),
        }
    }

    #[test]
    fn out_of_range_offset_is_skipped_not_fatal() {
        let mut bytes = table_bytes(&[(42, b"Guard\0")]);
        // Point the lone directory entry past the data block.
        bytes[12..16].copy_from_slice(&100u32.to_le_bytes());
        let mut table = StringTable::default();
        table.load_one(&bytes, TableKind::Strings).unwrap();
        assert_eq!(table.lookup(42), None);
    }

    #[test]
    fn sidecars_resolve_next_to_the_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = dir.path().join("Chatty NPCs.esp");
        fs::write(&plugin, b"").unwrap();
        let strings_dir = dir.path().join("Strings");
        fs::create_dir(&strings_dir).unwrap();
        fs::write(
            strings_dir.join("Chatty NPCs_English.STRINGS"),
            table_bytes(&[(42, b"Guard\0")]),
        )
        .unwrap();
        fs::write(
            strings_dir.join("Chatty NPCs_English.ILSTRINGS"),
            table_bytes(&[(43, &length_prefixed(b"Hello."))]),
        )
        .unwrap();

        let table = StringTable::load(&plugin, "english").unwrap();
        assert_eq!(table.lookup(42), Some("Guard"));
        assert_eq!(table.lookup(43), Some("Hello."));
        assert_eq!(table.language(), "english");
    }

    #[test]
    fn missing_sidecars_yield_an_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = dir.path().join("Lonely.esp");
        fs::write(&plugin, b"").unwrap();
        let table = StringTable::load(&plugin, "english").unwrap();
        assert!(table.is_empty());
    }
}
