//! The parsed projection of a plugin and its query surface.
//!
//! A [`Document`] owns the retained records exclusively; every query hands
//! out borrows whose lifetime is tied to it. CELL records live in their own
//! list with their own indices, because exterior cells can collide with
//! interior cells on form id while sitting under different parent groups.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::codec::{Sig, sig_from_str, sig_name};
use crate::error;
use crate::record::{Record, RecordFlags};
use crate::strings::StringTable;

/// Wildcard accepted by [`Document::search`] for either side.
pub const ALL: &str = "ALL";

/// Everything retained from one plugin by a filtered parse.
#[derive(Debug, Default)]
pub struct Document {
    records: Vec<Record>,
    cell_records: Vec<Record>,
    /// `"SIG:FORMID"` → position in `records`; first occurrence wins.
    index: HashMap<String, usize>,
    cell_by_form_id: HashMap<u32, usize>,
    cell_by_editor_id: HashMap<String, usize>,
    seen_form_ids: HashSet<u32>,
    group_count: usize,
    has_tes4: bool,
    localized: bool,
    strings: Option<StringTable>,
    source_path: Option<PathBuf>,
}

impl Document {
    pub(crate) fn new(source_path: Option<PathBuf>) -> Document {
        Document {
            source_path,
            ..Document::default()
        }
    }

    /// Called by the parser for the first record header in the stream,
    /// whether or not the filter retains it. The TES4 flag word decides the
    /// localized interpretation for the whole file.
    pub(crate) fn note_plugin_header(&mut self, flags: u32) {
        self.has_tes4 = true;
        self.localized = RecordFlags::from_bits_truncate(flags).contains(RecordFlags::LOCALIZED);
    }

    pub(crate) fn note_group(&mut self) {
        self.group_count += 1;
    }

    pub(crate) fn add_record(&mut self, record: Record) {
        self.warn_duplicate_form_id(record.form_id, &record.sig);
        if record.is_cell() {
            self.add_cell_record(record);
            return;
        }
        let key = record.unique_key();
        let position = self.records.len();
        if self.index.contains_key(&key) {
            log::warn!("duplicate record key '{}', keeping the first", key);
        } else {
            self.index.insert(key, position);
        }
        self.records.push(record);
    }

    fn add_cell_record(&mut self, record: Record) {
        let position = self.cell_records.len();
        if self.cell_by_form_id.contains_key(&record.form_id) {
            log::warn!(
                "duplicate CELL form id 0x{:08X}, keeping the first",
                record.form_id
            );
        } else {
            self.cell_by_form_id.insert(record.form_id, position);
        }
        let editor_id = record.editor_id();
        if !editor_id.is_empty() {
            if self.cell_by_editor_id.contains_key(&editor_id) {
                log::warn!("duplicate CELL editor id '{}', keeping the first", editor_id);
            } else {
                self.cell_by_editor_id.insert(editor_id, position);
            }
        }
        self.cell_records.push(record);
    }

    fn warn_duplicate_form_id(&mut self, form_id: u32, sig: &Sig) {
        if !self.seen_form_ids.insert(form_id) {
            log::warn!(
                "duplicate form id 0x{:08X} on record {}",
                form_id,
                sig_name(sig)
            );
        }
    }

    /// Retained records, in stream order, CELL family excluded.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Retained CELL-family records, in stream order.
    pub fn cell_records(&self) -> &[Record] {
        &self.cell_records
    }

    /// Whether the stream opened with the mandatory `TES4` plugin header.
    pub fn has_tes4(&self) -> bool {
        self.has_tes4
    }

    /// Whether the plugin header marked the file localized.
    pub fn is_localized(&self) -> bool {
        self.localized
    }

    /// Number of groups the walk passed through.
    pub fn group_count(&self) -> usize {
        self.group_count
    }

    /// Number of retained records, both lists.
    pub fn record_count(&self) -> usize {
        self.records.len() + self.cell_records.len()
    }

    /// Records plus groups, the TES4 header excluded — the figure plugin
    /// editors report as a plugin's record count.
    pub fn total_count(&self) -> usize {
        let mut count = self.record_count() + self.group_count;
        if self.has_tes4 {
            count = count.saturating_sub(1);
        }
        count
    }

    /// Loads the sidecar string tables for this plugin and attaches them to
    /// subsequent lookups.
    pub fn load_strings<P: AsRef<Path>>(
        &mut self,
        plugin_path: P,
        language: &str,
    ) -> error::Result<()> {
        let table = StringTable::load(plugin_path, language)?;
        if table.is_empty() {
            log::warn!("no strings loaded for language '{}'", language);
        }
        self.strings = Some(table);
        Ok(())
    }

    /// Attaches an already-loaded string table.
    pub fn attach_strings(&mut self, table: StringTable) {
        self.strings = Some(table);
    }

    pub fn strings(&self) -> Option<&StringTable> {
        self.strings.as_ref()
    }

    /// Projects one subrecord to text using this document's string table.
    pub fn string_of(&self, sub: &crate::record::SubRecord) -> String {
        sub.get_string(self.strings())
    }

    /// Records of family `parent` that carry a `child` subrecord. `"ALL"`
    /// (or an empty child) is a wildcard on either side. Scans both lists.
    pub fn search(&self, parent: &str, child: Option<&str>) -> Vec<&Record> {
        let any_parent = parent == ALL;
        let parent_sig = sig_from_str(parent);
        let child_sig = match child {
            None | Some("") | Some(ALL) => None,
            Some(name) => Some(sig_from_str(name)),
        };
        self.iter_all()
            .filter(|rec| any_parent || rec.sig == parent_sig)
            .filter(|rec| match child_sig {
                None => true,
                Some(sig) => rec.find(sig).is_some(),
            })
            .collect()
    }

    /// Records with a subrecord whose decoded text matches `query`,
    /// case-insensitively; `exact` compares whole strings instead of
    /// substrings.
    pub fn search_text(&self, query: &str, exact: bool) -> Vec<&Record> {
        let needle = query.to_lowercase();
        self.iter_all()
            .filter(|rec| {
                rec.subrecords().iter().any(|sub| {
                    let text = sub.get_string(self.strings()).to_lowercase();
                    if exact { text == needle } else { text.contains(&needle) }
                })
            })
            .collect()
    }

    /// Primary-index lookup by `"SIG:FORMID"` key (see
    /// [`Record::unique_key`]). CELL records are reached through
    /// [`Document::find_cell`] instead.
    pub fn find_by_unique_key(&self, key: &str) -> Option<&Record> {
        self.index.get(key).map(|&pos| &self.records[pos])
    }

    /// Mutable variant of [`Document::find_by_unique_key`], the editing
    /// entry point.
    pub fn find_by_unique_key_mut(&mut self, key: &str) -> Option<&mut Record> {
        match self.index.get(key) {
            Some(&pos) => self.records.get_mut(pos),
            None => None,
        }
    }

    pub fn find_cell(&self, form_id: u32) -> Option<&Record> {
        self.cell_by_form_id
            .get(&form_id)
            .map(|&pos| &self.cell_records[pos])
    }

    pub fn find_cell_mut(&mut self, form_id: u32) -> Option<&mut Record> {
        match self.cell_by_form_id.get(&form_id) {
            Some(&pos) => self.cell_records.get_mut(pos),
            None => None,
        }
    }

    pub fn find_cell_by_editor_id(&self, editor_id: &str) -> Option<&Record> {
        self.cell_by_editor_id
            .get(editor_id)
            .map(|&pos| &self.cell_records[pos])
    }

    /// The path the document was parsed from, when it came from a file.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    fn iter_all(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().chain(self.cell_records.iter())
    }
}
