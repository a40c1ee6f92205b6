//! Record/subrecord retention rules.
//!
//! The parser consults a [`Filter`] twice: once per record signature, so that
//! uninteresting record families are skipped at the stream level without
//! allocating anything, and once per subrecord signature inside a retained
//! record. A rule maps a record family to the set of subrecord keys worth
//! keeping; an empty set keeps every subrecord of that family.

use std::collections::{HashMap, HashSet};

use crate::codec::{Sig, sig_from_str};

/// The conventional translatable-field selection, family by family. This is
/// configuration: callers with different needs build their own [`Filter`].
pub const DEFAULT_RULES: &[(&str, &[&str])] = &[
    ("ACTI", &["FULL"]),
    ("ALCH", &["FULL"]),
    ("AMMO", &["FULL", "DESC"]),
    ("ARMO", &["FULL", "DESC"]),
    ("AVIF", &["FULL", "DESC"]),
    ("BOOK", &["FULL", "DESC", "CNAM"]),
    ("CELL", &["FULL"]),
    ("CLAS", &["FULL", "DESC"]),
    ("CONT", &["FULL"]),
    ("DIAL", &["FULL"]),
    ("DOOR", &["FULL"]),
    ("ENCH", &["FULL"]),
    ("EXPL", &["FULL"]),
    ("FACT", &["FULL"]),
    ("FLOR", &["FULL", "RNAM"]),
    ("FURN", &["FULL"]),
    ("HAZD", &["FULL"]),
    ("INFO", &["RNAM", "NAM1"]),
    ("INGR", &["FULL"]),
    ("KEYM", &["FULL"]),
    ("LCTN", &["FULL"]),
    ("LIGH", &["FULL"]),
    ("LSCR", &["DESC"]),
    ("MESG", &["FULL", "DESC", "ITXT"]),
    ("MGEF", &["FULL", "DNAM"]),
    ("MISC", &["FULL"]),
    ("NOTE", &["FULL", "TNAM"]),
    ("NPC_", &["FULL", "SHRT"]),
    ("PERK", &["FULL", "DESC", "EPF2", "EPFD"]),
    ("PROJ", &["FULL"]),
    ("QUST", &["FULL", "CNAM", "NNAM"]),
    ("RACE", &["FULL", "DESC"]),
    ("REGN", &["RDMP"]),
    ("SCRL", &["FULL", "DESC"]),
    ("SHOU", &["FULL", "DESC"]),
    ("SLGM", &["FULL"]),
    ("SNCT", &["FULL"]),
    ("SPEL", &["FULL", "DESC"]),
    ("TACT", &["FULL"]),
    ("TREE", &["FULL"]),
    ("WEAP", &["FULL", "DESC"]),
    ("WOOP", &["FULL", "TNAM"]),
    ("WRLD", &["FULL"]),
];

/// Decides which record families and which of their subrecords survive a
/// parse.
#[derive(Debug, Clone)]
pub struct Filter {
    /// `None` means allow-all: every record, every subrecord.
    rules: Option<HashMap<Sig, HashSet<Sig>>>,
}

impl Filter {
    /// A filter that retains everything. Useful for inspection tools; parse
    /// memory grows with the whole plugin.
    pub fn allow_all() -> Filter {
        Filter { rules: None }
    }

    /// Builds a filter from `(record family, subrecord keys)` rules. An
    /// empty key list keeps every subrecord of that family.
    pub fn from_rules<'a, R, S>(rules: R) -> Filter
    where
        R: IntoIterator<Item = (&'a str, S)>,
        S: IntoIterator<Item = &'a str>,
    {
        let mut map = HashMap::new();
        for (record, subs) in rules {
            map.insert(
                sig_from_str(record),
                subs.into_iter().map(sig_from_str).collect::<HashSet<Sig>>(),
            );
        }
        Filter { rules: Some(map) }
    }

    /// Adds or replaces the rule for one record family.
    pub fn insert(&mut self, record: &str, subs: &[&str]) {
        let set = subs.iter().copied().map(sig_from_str).collect();
        self.rules
            .get_or_insert_with(HashMap::new)
            .insert(sig_from_str(record), set);
    }

    /// Whether records of this family should be materialized at all.
    pub fn should_keep_record(&self, sig: &Sig) -> bool {
        match self.rules {
            None => true,
            Some(ref map) => map.contains_key(sig),
        }
    }

    /// Whether a subrecord of a retained record should be materialized.
    pub fn should_keep_subrecord(&self, record_sig: &Sig, sub_sig: &Sig) -> bool {
        match self.rules {
            None => true,
            Some(ref map) => match map.get(record_sig) {
                Some(set) => set.is_empty() || set.contains(sub_sig),
                None => true,
            },
        }
    }
}

impl Default for Filter {
    /// The conventional translatable-field selection ([`DEFAULT_RULES`]).
    fn default() -> Filter {
        Filter::from_rules(DEFAULT_RULES.iter().map(|&(record, subs)| (record, subs.iter().copied())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_select_translatable_fields() {
        let filter = Filter::default();
        assert!(filter.should_keep_record(b"BOOK"));
        assert!(filter.should_keep_subrecord(b"BOOK", b"FULL"));
        assert!(!filter.should_keep_subrecord(b"BOOK", b"MODL"));
        assert!(filter.should_keep_record(b"NPC_"));
        assert!(filter.should_keep_subrecord(b"NPC_", b"SHRT"));
        assert!(!filter.should_keep_record(b"STAT"));
    }

    #[test]
    fn allow_all_keeps_everything() {
        let filter = Filter::allow_all();
        assert!(filter.should_keep_record(b"STAT"));
        assert!(filter.should_keep_subrecord(b"STAT", b"MODL"));
    }

    #[test]
    fn empty_subrecord_set_keeps_all_subrecords() {
        let filter = Filter::from_rules([("WEAP", [])]);
        assert!(filter.should_keep_record(b"WEAP"));
        assert!(filter.should_keep_subrecord(b"WEAP", b"MODL"));
        assert!(filter.should_keep_subrecord(b"WEAP", b"FULL"));
        assert!(!filter.should_keep_record(b"ARMO"));
    }

    #[test]
    fn insert_overrides_a_family() {
        let mut filter = Filter::default();
        filter.insert("BOOK", &["DESC"]);
        assert!(!filter.should_keep_subrecord(b"BOOK", b"FULL"));
        assert!(filter.should_keep_subrecord(b"BOOK", b"DESC"));
    }

    #[test]
    fn short_keys_are_space_padded() {
        assert_eq!(sig_from_str("NPC_"), *b"NPC_");
        assert_eq!(sig_from_str("AB"), *b"AB  ");
        assert_eq!(sig_from_str("TOOLONG"), *b"TOOL");
    }
}
