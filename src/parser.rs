//! The container walk.
//!
//! Groups nest arbitrarily deep in the wild, so the general walk is iterative
//! with an explicit stack of remaining-byte frames; recursing per group would
//! gamble the call stack on attacker-controlled data. The one exception is
//! the children-of-a-cell subtree (group types 6 through 9), which the format
//! keeps shallow and which a small recursive helper handles without losing
//! track of which records belong to the cell lists.
//!
//! The walk is deliberately forgiving: a declared size that overruns its
//! frame abandons that frame and resumes in the parent, a stream that ends
//! mid-entity ends the parse with whatever was complete, and neither case is
//! an error. Strictness lives in the rewriter, not here.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use scroll::{IOread, LE};

use crate::codec::{
    self, GRUP, GroupHeader, RecordHeader, SIZEOF_GROUP_HEADER, SIZEOF_RECORD_HEADER,
    SIZEOF_SUBRECORD_HEADER, SubrecordHeader, sig_name,
};
use crate::document::Document;
use crate::error::{self, Error};
use crate::filter::Filter;
use crate::record::Record;
use crate::strings::is_localized_field;

/// Cell-children groups are at most a couple of levels deep in well-formed
/// plugins; anything past this is corrupt and gets skipped, not walked.
const MAX_CELL_DEPTH: usize = 16;

/// Parses the plugin at `path`, retaining what `filter` selects. The source
/// path is remembered on the [`Document`] so [`crate::save`] can re-stream it.
pub fn parse<P: AsRef<Path>>(path: P, filter: &Filter) -> error::Result<Document> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    parse_with_source(&mut reader, filter, Some(path.to_path_buf()))
}

/// Parses a plugin from any seekable stream.
pub fn parse_reader<R: Read + Seek>(f: &mut R, filter: &Filter) -> error::Result<Document> {
    parse_with_source(f, filter, None)
}

fn parse_with_source<R: Read + Seek>(
    f: &mut R,
    filter: &Filter,
    source: Option<PathBuf>,
) -> error::Result<Document> {
    let mut parser = Parser {
        filter,
        doc: Document::new(source),
        seen_record: false,
    };
    parser.run(f)?;
    Ok(parser.doc)
}

/// Whether to keep walking or stop because the stream ran out.
enum Flow {
    Continue,
    Eof,
}

struct Parser<'f> {
    filter: &'f Filter,
    doc: Document,
    seen_record: bool,
}

impl Parser<'_> {
    fn run<R: Read + Seek>(&mut self, f: &mut R) -> error::Result<()> {
        // Remaining content bytes per open group, innermost last.
        let mut frames: Vec<u64> = Vec::new();
        loop {
            let Some(remaining) = frames.last().copied() else {
                if let Flow::Eof = self.top_level(f, &mut frames)? {
                    return Ok(());
                }
                continue;
            };
            if remaining == 0 {
                frames.pop();
                continue;
            }
            if remaining < 4 {
                log::debug!("skipping {} slack bytes at the end of a group", remaining);
                skip(f, remaining)?;
                *frames.last_mut().unwrap() = 0;
                continue;
            }
            let sig = match codec::read_sig_opt(f)? {
                Some(sig) => sig,
                None => {
                    log::warn!("stream ends inside a group with {} bytes unaccounted", remaining);
                    return Ok(());
                }
            };
            if remaining < SIZEOF_RECORD_HEADER as u64 {
                log::warn!(
                    "{} header does not fit in the {} bytes left in its group",
                    sig_name(&sig),
                    remaining
                );
                skip(f, remaining - 4)?;
                *frames.last_mut().unwrap() = 0;
                continue;
            }
            if sig == GRUP {
                let Some(header) = eof_check(GroupHeader::read_after_sig(f), "group header")?
                else {
                    return Ok(());
                };
                self.doc.note_group();
                let size = u64::from(header.size);
                if size < SIZEOF_GROUP_HEADER as u64 || size > remaining {
                    log::warn!(
                        "nested group {} declares {} bytes with {} left; abandoning the rest of this group",
                        sig_name(&header.label),
                        size,
                        remaining
                    );
                    skip(f, remaining - SIZEOF_GROUP_HEADER as u64)?;
                    *frames.last_mut().unwrap() = 0;
                    continue;
                }
                *frames.last_mut().unwrap() = remaining - size;
                if header.is_cell_children() {
                    if let Flow::Eof = self.walk_cell_children(f, &header, 0)? {
                        return Ok(());
                    }
                } else {
                    frames.push(size - SIZEOF_GROUP_HEADER as u64);
                }
            } else {
                let Some(header) =
                    eof_check(RecordHeader::read_after_sig(f, sig), "record header")?
                else {
                    return Ok(());
                };
                let need = SIZEOF_RECORD_HEADER as u64 + u64::from(header.data_size);
                if need > remaining {
                    log::warn!(
                        "record {} payload of {} bytes overruns its group ({} left); abandoning the rest of this group",
                        sig_name(&header.sig),
                        header.data_size,
                        remaining
                    );
                    skip(f, remaining - SIZEOF_RECORD_HEADER as u64)?;
                    *frames.last_mut().unwrap() = 0;
                    continue;
                }
                *frames.last_mut().unwrap() = remaining - need;
                if let Flow::Eof = self.parse_record(f, &header)? {
                    return Ok(());
                }
            }
        }
    }

    /// One top-of-stream item: unbounded, ends the parse cleanly at EOF.
    fn top_level<R: Read + Seek>(
        &mut self,
        f: &mut R,
        frames: &mut Vec<u64>,
    ) -> error::Result<Flow> {
        let sig = match codec::read_sig_opt(f)? {
            Some(sig) => sig,
            None => return Ok(Flow::Eof),
        };
        if sig == GRUP {
            let Some(header) = eof_check(GroupHeader::read_after_sig(f), "group header")? else {
                return Ok(Flow::Eof);
            };
            self.doc.note_group();
            if u64::from(header.size) < SIZEOF_GROUP_HEADER as u64 {
                log::warn!(
                    "top-level group {} declares {} bytes, less than its own header",
                    sig_name(&header.label),
                    header.size
                );
                return Ok(Flow::Continue);
            }
            if header.is_cell_children() {
                return self.walk_cell_children(f, &header, 0);
            }
            frames.push(u64::from(header.size) - SIZEOF_GROUP_HEADER as u64);
            Ok(Flow::Continue)
        } else {
            let Some(header) = eof_check(RecordHeader::read_after_sig(f, sig), "record header")?
            else {
                return Ok(Flow::Eof);
            };
            self.parse_record(f, &header)
        }
    }

    /// Recursive walk for the children-of-a-cell subtree. Bytes consumed per
    /// child are measured by stream-position delta, the single source of
    /// truth for the frame accounting here.
    fn walk_cell_children<R: Read + Seek>(
        &mut self,
        f: &mut R,
        group: &GroupHeader,
        depth: usize,
    ) -> error::Result<Flow> {
        let content = u64::from(group.size) - SIZEOF_GROUP_HEADER as u64;
        if depth >= MAX_CELL_DEPTH {
            log::warn!("cell children nested {} levels deep; skipping the subtree", depth);
            skip(f, content)?;
            return Ok(Flow::Continue);
        }
        let mut remaining = content;
        while remaining >= 4 {
            let before = f.stream_position()?;
            let sig = match codec::read_sig_opt(f)? {
                Some(sig) => sig,
                None => {
                    log::warn!(
                        "stream ends inside cell children with {} bytes unaccounted",
                        remaining
                    );
                    return Ok(Flow::Eof);
                }
            };
            if remaining < SIZEOF_RECORD_HEADER as u64 {
                log::warn!(
                    "{} header does not fit in the {} bytes left in cell children",
                    sig_name(&sig),
                    remaining
                );
                skip(f, remaining - 4)?;
                remaining = 0;
                break;
            }
            if sig == GRUP {
                let Some(nested) = eof_check(GroupHeader::read_after_sig(f), "group header")?
                else {
                    return Ok(Flow::Eof);
                };
                self.doc.note_group();
                let size = u64::from(nested.size);
                if size < SIZEOF_GROUP_HEADER as u64 || size > remaining {
                    log::warn!(
                        "nested group {} declares {} bytes with {} left in cell children; abandoning",
                        sig_name(&nested.label),
                        size,
                        remaining
                    );
                    skip(f, remaining - SIZEOF_GROUP_HEADER as u64)?;
                    remaining = 0;
                    break;
                }
                if nested.is_cell_children() {
                    if let Flow::Eof = self.walk_cell_children(f, &nested, depth + 1)? {
                        return Ok(Flow::Eof);
                    }
                } else {
                    log::warn!(
                        "group type {} has no business under a cell; skipping it",
                        nested.group_type
                    );
                    skip(f, size - SIZEOF_GROUP_HEADER as u64)?;
                }
            } else {
                let Some(header) =
                    eof_check(RecordHeader::read_after_sig(f, sig), "record header")?
                else {
                    return Ok(Flow::Eof);
                };
                if SIZEOF_RECORD_HEADER as u64 + u64::from(header.data_size) > remaining {
                    log::warn!(
                        "record {} payload of {} bytes overruns cell children ({} left); abandoning",
                        sig_name(&header.sig),
                        header.data_size,
                        remaining
                    );
                    skip(f, remaining - SIZEOF_RECORD_HEADER as u64)?;
                    remaining = 0;
                    break;
                }
                if let Flow::Eof = self.parse_record(f, &header)? {
                    return Ok(Flow::Eof);
                }
            }
            let consumed = f.stream_position()?.saturating_sub(before);
            remaining = remaining.saturating_sub(consumed);
        }
        if remaining > 0 {
            log::debug!("skipping {} slack bytes at the end of cell children", remaining);
            skip(f, remaining)?;
        }
        Ok(Flow::Continue)
    }

    /// Consumes exactly `data_size` payload bytes (modulo a truncated
    /// stream), materializing the record when the filter wants it.
    fn parse_record<R: Read + Seek>(
        &mut self,
        f: &mut R,
        header: &RecordHeader,
    ) -> error::Result<Flow> {
        if !self.seen_record {
            self.seen_record = true;
            if header.sig == *b"TES4" {
                self.doc.note_plugin_header(header.flags);
            }
        }
        let data_size = u64::from(header.data_size);
        if !self.filter.should_keep_record(&header.sig) {
            skip(f, data_size)?;
            return Ok(Flow::Continue);
        }
        log::debug!(
            "record {} 0x{:08X}, {} payload bytes",
            sig_name(&header.sig),
            header.form_id,
            header.data_size
        );
        let mut record = Record::from_header(header);
        if record.is_compressed() {
            if data_size < 4 {
                // No room for the uncompressed-length prefix.
                skip(f, data_size)?;
                return Ok(Flow::Continue);
            }
            let expected = match f.ioread_with::<u32>(LE).map_err(Error::from) {
                Ok(len) => len as usize,
                Err(err) if is_eof(&err) => {
                    log::warn!("stream ends inside record {}", sig_name(&header.sig));
                    return Ok(Flow::Eof);
                }
                Err(err) => return Err(err),
            };
            let mut packed = vec![0u8; data_size as usize - 4];
            if let Flow::Eof = read_exact_or_eof(f, &mut packed, &header.sig)? {
                return Ok(Flow::Eof);
            }
            let payload = match codec::inflate(&packed, expected) {
                Ok(payload) => payload,
                Err(Error::Decompress { expected, actual }) => {
                    log::warn!(
                        "record {} 0x{:08X} inflated to {} of {} bytes; record dropped",
                        sig_name(&header.sig),
                        header.form_id,
                        actual,
                        expected
                    );
                    return Ok(Flow::Continue);
                }
                Err(err) => return Err(err),
            };
            let total = payload.len() as u64;
            let mut cursor = Cursor::new(payload);
            walk_subrecords(
                self.filter,
                self.doc.is_localized(),
                &mut record,
                &mut cursor,
                total,
            )?;
        } else if let Flow::Eof = walk_subrecords(
            self.filter,
            self.doc.is_localized(),
            &mut record,
            f,
            data_size,
        )? {
            // The record is incomplete; keep only what parsed before it.
            return Ok(Flow::Eof);
        }
        self.doc.add_record(record);
        Ok(Flow::Continue)
    }
}

/// Walks `total` bytes of subrecords, materializing the ones the filter
/// retains. Works against the raw stream for plain records and against a
/// cursor over the inflated payload for compressed ones.
fn walk_subrecords<R: Read + Seek>(
    filter: &Filter,
    plugin_localized: bool,
    record: &mut Record,
    f: &mut R,
    total: u64,
) -> error::Result<Flow> {
    let mut remaining = total;
    while remaining >= SIZEOF_SUBRECORD_HEADER as u64 {
        let header = match SubrecordHeader::read(f) {
            Ok(header) => header,
            Err(err) if is_eof(&err) => {
                log::warn!(
                    "stream ends inside a subrecord header of {}",
                    sig_name(&record.sig)
                );
                return Ok(Flow::Eof);
            }
            Err(err) => return Err(err),
        };
        remaining -= SIZEOF_SUBRECORD_HEADER as u64;
        let size = u64::from(header.size);
        if size > remaining {
            log::warn!(
                "subrecord {} in {} declares {} bytes with {} left; keeping the record as parsed so far",
                sig_name(&header.sig),
                sig_name(&record.sig),
                size,
                remaining
            );
            skip(f, remaining)?;
            remaining = 0;
            break;
        }
        if filter.should_keep_subrecord(&record.sig, &header.sig) {
            let mut data = vec![0u8; usize::from(header.size)];
            if let Flow::Eof = read_exact_or_eof(f, &mut data, &header.sig)? {
                return Ok(Flow::Eof);
            }
            let localized = plugin_localized && is_localized_field(&header.sig);
            record.push_subrecord(header.sig, data, localized);
        } else {
            skip(f, size)?;
        }
        remaining -= size;
    }
    if remaining > 0 {
        log::debug!(
            "{} trailing bytes after the last subrecord of {}",
            remaining,
            sig_name(&record.sig)
        );
        skip(f, remaining)?;
    }
    Ok(Flow::Continue)
}

fn skip<S: Seek>(f: &mut S, n: u64) -> error::Result<()> {
    if n > 0 {
        f.seek(SeekFrom::Current(n as i64))?;
    }
    Ok(())
}

fn read_exact_or_eof<R: Read>(
    f: &mut R,
    buf: &mut [u8],
    sig: &codec::Sig,
) -> error::Result<Flow> {
    match f.read_exact(buf) {
        Ok(()) => Ok(Flow::Continue),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            log::warn!("stream ends inside {} data", sig_name(sig));
            Ok(Flow::Eof)
        }
        Err(err) => Err(err.into()),
    }
}

fn is_eof(err: &Error) -> bool {
    match err {
        Error::Io(io) => io.kind() == io::ErrorKind::UnexpectedEof,
        Error::Scroll(scroll::Error::IO(io)) => io.kind() == io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}

/// Maps a torn header at end of stream to `None` so the walk can stop
/// instead of failing; real I/O errors still propagate.
fn eof_check<T>(res: error::Result<T>, what: &str) -> error::Result<Option<T>> {
    match res {
        Ok(value) => Ok(Some(value)),
        Err(err) if is_eof(&err) => {
            log::warn!("stream ends inside a {}", what);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
