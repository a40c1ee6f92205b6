//! Records and subrecords, the leaves of the container tree.
//!
//! A subrecord keeps its payload as raw bytes plus a localized tag; nothing
//! here interprets bytes per signature. Text only materializes in
//! [`SubRecord::get_string`], so the parser stays oblivious to field
//! semantics and the rewriter can splice payloads back without re-encoding
//! anything it did not touch.

use bitflags::bitflags;
use scroll::{LE, Pread};

use crate::codec::{RecordHeader, Sig, sig_name};
use crate::encoding;
use crate::error;
use crate::strings::StringTable;

/// On-wire limit of a subrecord payload, from the 16-bit size field.
pub const MAX_SUBRECORD_LEN: usize = u16::MAX as usize;

bitflags! {
    /// Record flag word. Only two bits change this crate's behavior;
    /// the rest are carried for inspection.
    pub struct RecordFlags: u32 {
        const MASTER_FILE = 0x0000_0001;
        const DELETED_GROUP = 0x0000_0010;
        const DELETED_RECORD = 0x0000_0020;
        const CONSTANT = 0x0000_0040;
        /// Designated subrecords hold a string-table id, not inline text.
        const LOCALIZED = 0x0000_0080;
        const INACCESSIBLE = 0x0000_0100;
        const LIGHT_MASTER_FILE = 0x0000_0200;
        const PERSISTENT_REFR = 0x0000_0400;
        const INITIALLY_DISABLED = 0x0000_0800;
        const IGNORED = 0x0000_1000;
        const VISIBLE_WHEN_DISTANT = 0x0000_8000;
        const RANDOM_ANIM_START = 0x0001_0000;
        const OFF_LIMITS = 0x0002_0000;
        /// Payload is a u32 uncompressed length followed by a zlib stream.
        const COMPRESSED = 0x0004_0000;
        const CANT_WAIT = 0x0008_0000;
        const IGNORE_OBJECT_INTERACTION = 0x0010_0000;
        const IS_MARKER = 0x0080_0000;
        const NO_AI_ACQUIRE = 0x0200_0000;
        const NAVMESH_FILTER = 0x0400_0000;
        const NAVMESH_BOUNDING_BOX = 0x0800_0000;
        const REFLECTED_BY_AUTO_WATER = 0x1000_0000;
        const DONT_HAVOK_SETTLE = 0x2000_0000;
        const NO_RESPAWN = 0x4000_0000;
        const MULTI_BOUND = 0x8000_0000;
    }
}

/// A named payload inside a record.
#[derive(Debug, Clone, PartialEq)]
pub struct SubRecord {
    pub sig: Sig,
    data: Vec<u8>,
    localized: bool,
    string_id: Option<u32>,
    /// Zero-based occurrence index among same-signature siblings, dense in
    /// stream order. The rewriter aligns replacements by it.
    index: usize,
}

impl SubRecord {
    pub(crate) fn new(sig: Sig, data: Vec<u8>, localized: bool, index: usize) -> SubRecord {
        let string_id = if localized {
            data.pread_with::<u32>(0, LE).ok()
        } else {
            None
        };
        SubRecord {
            sig,
            data,
            localized,
            string_id,
            index,
        }
    }

    /// The raw payload as parsed (or as last edited).
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether this subrecord carries a string-table id.
    pub fn is_localized(&self) -> bool {
        self.localized
    }

    /// The string-table id, when localized and the payload holds one.
    pub fn string_id(&self) -> Option<u32> {
        self.string_id
    }

    /// Occurrence index among subrecords of the same signature in this
    /// record.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Projects the payload to UTF-8 text.
    ///
    /// Localized payloads resolve through `table`; an id the table does not
    /// know renders as `"<StringID:N>"`. Everything else goes through the
    /// encoding normalizer.
    pub fn get_string(&self, table: Option<&StringTable>) -> String {
        if self.localized {
            if let Some(id) = self.string_id {
                if let Some(text) = table.and_then(|t| t.lookup(id)) {
                    return text.to_string();
                }
                return format!("<StringID:{}>", id);
            }
            // Degenerate localized payload, shorter than an id; fall through
            // to the byte decode.
        }
        encoding::decode_to_utf8(&self.data)
    }

    fn replace(&mut self, data: Vec<u8>) {
        self.string_id = if self.localized {
            data.pread_with::<u32>(0, LE).ok()
        } else {
            None
        };
        self.data = data;
    }
}

/// A parsed record: header fields plus the retained subrecords, in stream
/// order.
#[derive(Debug, Clone)]
pub struct Record {
    pub sig: Sig,
    pub form_id: u32,
    pub flags: RecordFlags,
    pub version_ctrl: u32,
    pub version: u16,
    subrecords: Vec<SubRecord>,
    modified: bool,
}

impl Record {
    pub(crate) fn from_header(header: &RecordHeader) -> Record {
        Record {
            sig: header.sig,
            form_id: header.form_id,
            flags: RecordFlags::from_bits_truncate(header.flags),
            version_ctrl: header.version_ctrl,
            version: header.version,
            subrecords: Vec::new(),
            modified: false,
        }
    }

    /// Appends a subrecord parsed from the stream, assigning its occurrence
    /// index.
    pub(crate) fn push_subrecord(&mut self, sig: Sig, data: Vec<u8>, localized: bool) {
        let index = self.subrecords.iter().filter(|sub| sub.sig == sig).count();
        self.subrecords.push(SubRecord::new(sig, data, localized, index));
    }

    pub fn subrecords(&self) -> &[SubRecord] {
        &self.subrecords
    }

    /// First subrecord with the given signature.
    pub fn find(&self, sig: Sig) -> Option<&SubRecord> {
        self.subrecords.iter().find(|sub| sub.sig == sig)
    }

    /// The `occurrence`-th subrecord with the given signature.
    pub fn find_nth(&self, sig: Sig, occurrence: usize) -> Option<&SubRecord> {
        self.subrecords
            .iter()
            .find(|sub| sub.sig == sig && sub.index == occurrence)
    }

    pub fn is_cell(&self) -> bool {
        self.sig == *b"CELL"
    }

    pub fn is_compressed(&self) -> bool {
        self.flags.contains(RecordFlags::COMPRESSED)
    }

    pub fn is_localized(&self) -> bool {
        self.flags.contains(RecordFlags::LOCALIZED)
    }

    /// Whether any subrecord has been edited since parse. Only modified
    /// records are re-encoded on save.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// `"SIG:FORMID"` with the form id in uppercase hex, the primary index
    /// key.
    pub fn unique_key(&self) -> String {
        unique_key(&self.sig, self.form_id)
    }

    /// The editor identifier from the first `EDID` subrecord; empty when the
    /// record carries none (some do not).
    pub fn editor_id(&self) -> String {
        self.find(*b"EDID")
            .map(|sub| sub.get_string(None))
            .unwrap_or_default()
    }

    /// The display name from the first `FULL` subrecord, resolved against
    /// `table` when localized.
    pub fn full_name(&self, table: Option<&StringTable>) -> String {
        self.find(*b"FULL")
            .map(|sub| sub.get_string(table))
            .unwrap_or_default()
    }

    /// Replaces the payload of the `occurrence`-th subrecord with signature
    /// `sig` and marks the record modified. Returns `Ok(false)` when no such
    /// occurrence was retained.
    pub fn edit_subrecord(
        &mut self,
        sig: Sig,
        occurrence: usize,
        data: Vec<u8>,
    ) -> error::Result<bool> {
        if data.len() > MAX_SUBRECORD_LEN {
            return Err(error::Error::SubrecordTooLarge {
                sig,
                len: data.len(),
            });
        }
        match self
            .subrecords
            .iter_mut()
            .find(|sub| sub.sig == sig && sub.index == occurrence)
        {
            Some(sub) => {
                sub.replace(data);
                self.modified = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Text edit convenience: encodes UTF-8 with the customary trailing NUL.
    pub fn edit_subrecord_text(
        &mut self,
        sig: Sig,
        occurrence: usize,
        text: &str,
    ) -> error::Result<bool> {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(0);
        self.edit_subrecord(sig, occurrence, data)
    }
}

pub(crate) fn unique_key(sig: &Sig, form_id: u32) -> String {
    format!("{}:{:08X}", sig_name(sig), form_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RecordHeader;

    fn weapon() -> Record {
        let header = RecordHeader {
            sig: *b"WEAP",
            data_size: 0,
            flags: 0,
            form_id: 0x0001_0800,
            version_ctrl: 0,
            version: 44,
            unknown: 0,
        };
        let mut rec = Record::from_header(&header);
        rec.push_subrecord(*b"EDID", b"IronSword\0".to_vec(), false);
        rec.push_subrecord(*b"FULL", b"Iron Sword\0".to_vec(), false);
        rec.push_subrecord(*b"DESC", b"A sword.\0".to_vec(), false);
        rec.push_subrecord(*b"FULL", b"Iron Sword (dup)\0".to_vec(), false);
        rec
    }

    #[test]
    fn occurrence_indices_are_dense_per_signature() {
        let rec = weapon();
        let indices: Vec<(Sig, usize)> = rec
            .subrecords()
            .iter()
            .map(|sub| (sub.sig, sub.index()))
            .collect();
        assert_eq!(
            indices,
            vec![
                (*b"EDID", 0),
                (*b"FULL", 0),
                (*b"DESC", 0),
                (*b"FULL", 1)
            ]
        );
        assert_eq!(
            rec.find_nth(*b"FULL", 1).unwrap().get_string(None),
            "Iron Sword (dup)"
        );
    }

    #[test]
    fn accessors() {
        let rec = weapon();
        assert_eq!(rec.editor_id(), "IronSword");
        assert_eq!(rec.full_name(None), "Iron Sword");
        assert_eq!(rec.unique_key(), "WEAP:00010800");
        assert!(!rec.is_cell());
        assert!(!rec.is_compressed());
        assert!(!rec.is_modified());
    }

    #[test]
    fn missing_edid_reads_as_empty() {
        let header = RecordHeader {
            sig: *b"INFO",
            ..Default::default()
        };
        let rec = Record::from_header(&header);
        assert_eq!(rec.editor_id(), "");
    }

    #[test]
    fn edits_mark_the_record_and_align_by_occurrence() {
        let mut rec = weapon();
        assert!(rec.edit_subrecord_text(*b"FULL", 1, "Renamed").unwrap());
        assert!(rec.is_modified());
        assert_eq!(rec.find_nth(*b"FULL", 0).unwrap().get_string(None), "Iron Sword");
        assert_eq!(rec.find_nth(*b"FULL", 1).unwrap().get_string(None), "Renamed");
        // No third occurrence to edit.
        assert!(!rec.edit_subrecord_text(*b"FULL", 2, "x").unwrap());
    }

    #[test]
    fn oversized_edit_is_rejected() {
        let mut rec = weapon();
        let huge = vec![b'x'; MAX_SUBRECORD_LEN + 1];
        match rec.edit_subrecord(*b"FULL", 0, huge) {
            Err(error::Error::SubrecordTooLarge { sig, len }) => {
                assert_eq!(sig, *b"FULL");
                assert_eq!(len, MAX_SUBRECORD_LEN + 1);
            }
            other => panic!("expected SubrecordTooLarge, got {:?}", other),
        }
        assert!(!rec.is_modified());
    }

    #[test]
    fn localized_subrecord_resolves_or_renders_placeholder() {
        let sub = SubRecord::new(*b"FULL", vec![42, 0, 0, 0], true, 0);
        assert_eq!(sub.string_id(), Some(42));
        assert_eq!(sub.get_string(None), "<StringID:42>");

        // Degenerate payload shorter than an id falls back to byte decode.
        let short = SubRecord::new(*b"FULL", b"ab".to_vec(), true, 0);
        assert_eq!(short.string_id(), None);
        assert_eq!(short.get_string(None), "ab");
    }

    #[test]
    fn flag_word_decodes_known_bits() {
        let flags = RecordFlags::from_bits_truncate(0x0004_0081);
        assert!(flags.contains(RecordFlags::LOCALIZED));
        assert!(flags.contains(RecordFlags::COMPRESSED));
        assert!(flags.contains(RecordFlags::MASTER_FILE));
    }
}
