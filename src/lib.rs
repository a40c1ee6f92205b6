//! # espial
//!
//! An impish Bethesda plugin (`.esp`/`.esm`/`.esl`) parsing and rewriting
//! crate.
//!
//! `espial` walks the group/record container of a plugin with strict bounds
//! accounting, projects out the translatable string fields a [`Filter`]
//! selects, resolves localized string ids against the `.STRINGS` sidecar
//! family, and can write a byte-accurate copy of the source with edited
//! subrecord payloads spliced in. Parsing is tolerant of the malformed
//! plugins the wild is full of; saving is strict, because the output has to
//! be byte-correct.
//!
//! ```no_run
//! use espial::{Filter, parse, save};
//!
//! fn run() -> espial::Result<()> {
//!     let filter = Filter::default();
//!     let mut doc = parse("Chatty NPCs.esp", &filter)?;
//!     doc.load_strings("Chatty NPCs.esp", "english")?;
//!     for rec in doc.search("WEAP", Some("FULL")) {
//!         println!("{}: {}", rec.unique_key(), rec.full_name(doc.strings()));
//!     }
//!     if let Some(rec) = doc.find_by_unique_key_mut("WEAP:00010800") {
//!         rec.edit_subrecord_text(*b"FULL", 0, "Épée de fer")?;
//!     }
//!     save(&doc, "Chatty NPCs (fr).esp")?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod document;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod parser;
pub mod record;
pub mod strings;
pub mod writer;

pub use crate::codec::{GroupHeader, GroupKind, RecordHeader, Sig, SubrecordHeader};
pub use crate::document::Document;
pub use crate::error::{Error, Result};
pub use crate::filter::Filter;
pub use crate::parser::{parse, parse_reader};
pub use crate::record::{Record, RecordFlags, SubRecord};
pub use crate::strings::StringTable;
pub use crate::writer::{save, save_reader};
