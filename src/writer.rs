//! The rewrite pass.
//!
//! Saving streams the source plugin once, copying every byte verbatim except
//! inside records the caller actually edited. Those are pulled into memory,
//! inflated when compressed, spliced subrecord-by-subrecord against the
//! document's retained payloads, re-deflated, and emitted with a recomputed
//! `data_size`. Group sizes are written as declared first and patched
//! in-place afterwards whenever the content length moved, so size fixups
//! cascade naturally from the innermost change to the root.
//!
//! Unlike the parse, a save is strict: a payload that will not inflate, an
//! edit past the 16-bit size field, or an input that ends inside an edited
//! record each abort the save. Byte correctness of the output is the whole
//! point of this pass.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use scroll::{IOwrite, LE, Pread};

use crate::codec::{
    self, GRUP, GroupHeader, RecordHeader, SIZEOF_GROUP_HEADER, SIZEOF_SUBRECORD_HEADER,
    Sig, sig_name,
};
use crate::document::Document;
use crate::error::{self, Error};
use crate::record::{MAX_SUBRECORD_LEN, Record, RecordFlags};

/// Writes `doc` to `out_path` by re-streaming the file it was parsed from.
pub fn save<P: AsRef<Path>>(doc: &Document, out_path: P) -> error::Result<()> {
    let source = doc.source_path().ok_or_else(|| {
        Error::Malformed("document was not parsed from a file; use save_reader".into())
    })?;
    let mut fin = BufReader::new(File::open(source)?);
    let mut fout = BufWriter::new(File::create(out_path.as_ref())?);
    save_reader(doc, &mut fin, &mut fout)?;
    fout.flush()?;
    Ok(())
}

/// Stream-to-stream core of [`save`]; `fin` must be the bytes the document
/// was parsed from.
pub fn save_reader<R: Read + Seek, W: Write + Seek>(
    doc: &Document,
    fin: &mut R,
    fout: &mut W,
) -> error::Result<()> {
    let rewriter = Rewriter::new(doc);
    rewriter.process_stream(fin, fout, None)?;
    Ok(())
}

enum Flow {
    Continue,
    Eof,
}

struct Rewriter<'a> {
    /// `(signature, form id)` → the edited record to splice in. Unmodified
    /// records stay out of this map and are copied byte-for-byte.
    edits: HashMap<(Sig, u32), &'a Record>,
}

impl<'a> Rewriter<'a> {
    fn new(doc: &'a Document) -> Rewriter<'a> {
        let mut edits = HashMap::new();
        for record in doc
            .records()
            .iter()
            .chain(doc.cell_records().iter())
            .filter(|rec| rec.is_modified())
        {
            if let std::collections::hash_map::Entry::Vacant(slot) =
                edits.entry((record.sig, record.form_id))
            {
                slot.insert(record);
            } else {
                log::warn!(
                    "more than one edited record keyed {}; keeping the first",
                    record.unique_key()
                );
            }
        }
        Rewriter { edits }
    }

    /// Copies either the whole stream (`limit` none) or exactly `limit`
    /// bytes of group content, dispatching on each child's signature.
    fn process_stream<R: Read + Seek, W: Write + Seek>(
        &self,
        fin: &mut R,
        fout: &mut W,
        limit: Option<u64>,
    ) -> error::Result<Flow> {
        let mut consumed = 0u64;
        loop {
            if let Some(limit) = limit {
                if consumed >= limit {
                    if consumed > limit {
                        log::warn!(
                            "group content ran {} bytes past its declared size",
                            consumed - limit
                        );
                    }
                    return Ok(Flow::Continue);
                }
                let left = limit - consumed;
                if left < 4 {
                    // Slack too small for a signature; carry it over as-is.
                    if copy_up_to(fin, fout, left)? < left {
                        log::warn!("input ends inside group slack");
                        return Ok(Flow::Eof);
                    }
                    return Ok(Flow::Continue);
                }
            }
            let before = fin.stream_position()?;
            let sig = match codec::read_sig_opt(fin)? {
                Some(sig) => sig,
                None => {
                    if let Some(limit) = limit {
                        log::warn!(
                            "input ends {} bytes short of its declared group size",
                            limit - consumed
                        );
                        return Ok(Flow::Eof);
                    }
                    return Ok(Flow::Continue);
                }
            };
            let flow = if sig == GRUP {
                self.process_group(fin, fout)?
            } else {
                self.process_record(fin, fout, sig)?
            };
            if let Flow::Eof = flow {
                return Ok(Flow::Eof);
            }
            consumed += fin.stream_position()?.saturating_sub(before);
        }
    }

    /// Re-emits one group: header first, children through
    /// [`Rewriter::process_stream`], then an in-place size patch when the
    /// rewritten content came out a different length.
    fn process_group<R: Read + Seek, W: Write + Seek>(
        &self,
        fin: &mut R,
        fout: &mut W,
    ) -> error::Result<Flow> {
        let header = match GroupHeader::read_after_sig(fin) {
            Ok(header) => header,
            Err(err) if is_eof(&err) => {
                log::warn!("input ends inside a group header");
                return Ok(Flow::Eof);
            }
            Err(err) => return Err(err),
        };
        let header_pos = fout.stream_position()?;
        header.write(fout)?;
        if u64::from(header.size) < SIZEOF_GROUP_HEADER as u64 {
            log::warn!(
                "group {} declares {} bytes, less than its own header; copied with no content",
                sig_name(&header.label),
                header.size
            );
            return Ok(Flow::Continue);
        }
        let declared = u64::from(header.size) - SIZEOF_GROUP_HEADER as u64;
        let content_start = fout.stream_position()?;
        let flow = self.process_stream(fin, fout, Some(declared))?;
        if let Flow::Eof = flow {
            // Truncated input: leave the header as the source had it so the
            // output stays an exact prefix copy.
            return Ok(Flow::Eof);
        }
        let written = fout.stream_position()?.saturating_sub(content_start);
        if written != declared {
            let end = fout.stream_position()?;
            let patched = SIZEOF_GROUP_HEADER as u64 + written;
            log::debug!(
                "patching group {} size {} -> {}",
                sig_name(&header.label),
                header.size,
                patched
            );
            fout.seek(SeekFrom::Start(header_pos + 4))?;
            fout.iowrite_with(patched as u32, LE)?;
            fout.seek(SeekFrom::Start(end))?;
        }
        Ok(Flow::Continue)
    }

    /// Copies an untouched record verbatim; re-encodes an edited one.
    fn process_record<R: Read + Seek, W: Write + Seek>(
        &self,
        fin: &mut R,
        fout: &mut W,
        sig: Sig,
    ) -> error::Result<Flow> {
        let header = match RecordHeader::read_after_sig(fin, sig) {
            Ok(header) => header,
            Err(err) if is_eof(&err) => {
                log::warn!("input ends inside a record header");
                return Ok(Flow::Eof);
            }
            Err(err) => return Err(err),
        };
        let data_size = u64::from(header.data_size);
        let Some(edited) = self.edits.get(&(header.sig, header.form_id)) else {
            header.write(fout)?;
            let copied = copy_up_to(fin, fout, data_size)?;
            if copied < data_size {
                log::warn!(
                    "input ends {} bytes into record {}; output keeps the intact prefix",
                    copied,
                    sig_name(&header.sig)
                );
                return Ok(Flow::Eof);
            }
            return Ok(Flow::Continue);
        };

        let mut payload = vec![0u8; header.data_size as usize];
        fin.read_exact(&mut payload).map_err(|_| {
            Error::Malformed(format!(
                "input ends inside edited record {}",
                edited.unique_key()
            ))
        })?;

        let compressed = RecordFlags::from_bits_truncate(header.flags).contains(RecordFlags::COMPRESSED);
        if compressed && payload.len() < 4 {
            // Degenerate compressed record; nothing in it to splice.
            header.write(fout)?;
            fout.write_all(&payload)?;
            return Ok(Flow::Continue);
        }
        let original = if compressed {
            let expected = payload.pread_with::<u32>(0, LE)? as usize;
            codec::inflate(&payload[4..], expected)?
        } else {
            payload
        };

        let rebuilt = modify_subrecords(&original, edited)?;

        let out_payload = if compressed {
            let packed = codec::deflate(&rebuilt)?;
            let mut framed = Vec::with_capacity(4 + packed.len());
            framed.extend_from_slice(&(rebuilt.len() as u32).to_le_bytes());
            framed.extend_from_slice(&packed);
            framed
        } else {
            rebuilt
        };

        let mut new_header = header;
        new_header.data_size = out_payload.len() as u32;
        new_header.write(fout)?;
        fout.write_all(&out_payload)?;
        Ok(Flow::Continue)
    }
}

/// Walks the original payload in stream order, replacing the Nth occurrence
/// of each signature with the document's Nth retained value and copying
/// everything else untouched. Subrecords the filter dropped at parse time
/// have no retained counterpart and therefore always copy through.
fn modify_subrecords(original: &[u8], edited: &Record) -> error::Result<Vec<u8>> {
    let mut replacements: HashMap<Sig, Vec<&crate::record::SubRecord>> = HashMap::new();
    for sub in edited.subrecords() {
        replacements.entry(sub.sig).or_default().push(sub);
    }

    let mut counters: HashMap<Sig, usize> = HashMap::new();
    let mut out = Vec::with_capacity(original.len());
    let mut offset = 0usize;
    while original.len() - offset >= SIZEOF_SUBRECORD_HEADER {
        let mut sig: Sig = [0; 4];
        sig.copy_from_slice(&original[offset..offset + 4]);
        let size = original.pread_with::<u16>(offset + 4, LE)? as usize;
        let body = offset + SIZEOF_SUBRECORD_HEADER;
        if body + size > original.len() {
            log::warn!(
                "subrecord {} in {} overruns the payload; copying the tail unchanged",
                sig_name(&sig),
                edited.unique_key()
            );
            out.extend_from_slice(&original[offset..]);
            return Ok(out);
        }
        let occurrence = {
            let counter = counters.entry(sig).or_insert(0);
            let n = *counter;
            *counter += 1;
            n
        };
        match replacements.get(&sig).and_then(|subs| subs.get(occurrence)) {
            Some(sub) => {
                let data = sub.bytes();
                if data.len() > MAX_SUBRECORD_LEN {
                    return Err(Error::SubrecordTooLarge {
                        sig,
                        len: data.len(),
                    });
                }
                out.extend_from_slice(&sig);
                out.extend_from_slice(&(data.len() as u16).to_le_bytes());
                out.extend_from_slice(data);
            }
            None => out.extend_from_slice(&original[offset..body + size]),
        }
        offset = body + size;
    }
    if offset < original.len() {
        out.extend_from_slice(&original[offset..]);
    }
    Ok(out)
}

/// Copies up to `n` bytes, returning how many the input actually had.
fn copy_up_to<R: Read, W: Write>(fin: &mut R, fout: &mut W, n: u64) -> error::Result<u64> {
    let mut taken = fin.take(n);
    Ok(io::copy(&mut taken, fout)?)
}

fn is_eof(err: &Error) -> bool {
    match err {
        Error::Io(io) => io.kind() == io::ErrorKind::UnexpectedEof,
        Error::Scroll(scroll::Error::IO(io)) => io.kind() == io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}
