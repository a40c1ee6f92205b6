//! The fixed-layout pieces of the plugin container format.
//!
//! Every integer in a plugin is little-endian and packed; the three header
//! layouts here (record, group, subrecord) are read field-by-field off the
//! stream rather than cast, so a short read surfaces as an error instead of
//! garbage. Compressed record payloads are zlib streams prefixed by their
//! uncompressed length; [`inflate`] and [`deflate`] are the only two places
//! that touch zlib.

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use scroll::{IOread, IOwrite, LE};

use crate::error;

/// A four-byte ASCII signature, the name of every record, group, and
/// subrecord in a plugin.
pub type Sig = [u8; 4];

/// The group container tag.
pub const GRUP: Sig = *b"GRUP";

pub const SIZEOF_RECORD_HEADER: usize = 24;
pub const SIZEOF_GROUP_HEADER: usize = 24;
pub const SIZEOF_SUBRECORD_HEADER: usize = 6;

/// Printable form of a signature; undecodable bytes are replaced, never fatal.
pub fn sig_name(sig: &Sig) -> Cow<'_, str> {
    String::from_utf8_lossy(sig)
}

/// Converts an ASCII name to an on-disk signature. Short names are padded
/// with spaces, long ones truncated; real signatures are exactly four bytes.
pub fn sig_from_str(s: &str) -> Sig {
    let mut sig = [b' '; 4];
    for (slot, byte) in sig.iter_mut().zip(s.bytes()) {
        *slot = byte;
    }
    sig
}

/// Reads a four-byte signature, distinguishing a clean end of stream from a
/// torn one. Returns `None` for both; a torn signature additionally warns,
/// since it means the file was cut mid-entity.
pub fn read_sig_opt<R: Read>(f: &mut R) -> error::Result<Option<Sig>> {
    let mut sig = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = f.read(&mut sig[filled..])?;
        if n == 0 {
            if filled != 0 {
                log::warn!("stream ends inside a signature ({} of 4 bytes)", filled);
            }
            return Ok(None);
        }
        filled += n;
    }
    Ok(Some(sig))
}

/// The 24-byte header in front of every record.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default)]
pub struct RecordHeader {
    pub sig: Sig,
    /// Payload length, excluding this header.
    pub data_size: u32,
    pub flags: u32,
    pub form_id: u32,
    pub version_ctrl: u32,
    pub version: u16,
    pub unknown: u16,
}

impl RecordHeader {
    /// Reads the 20 bytes that follow an already-consumed signature.
    pub fn read_after_sig<R: Read>(f: &mut R, sig: Sig) -> error::Result<Self> {
        Ok(RecordHeader {
            sig,
            data_size: f.ioread_with::<u32>(LE)?,
            flags: f.ioread_with::<u32>(LE)?,
            form_id: f.ioread_with::<u32>(LE)?,
            version_ctrl: f.ioread_with::<u32>(LE)?,
            version: f.ioread_with::<u16>(LE)?,
            unknown: f.ioread_with::<u16>(LE)?,
        })
    }

    pub fn write<W: Write>(&self, f: &mut W) -> error::Result<()> {
        f.write_all(&self.sig)?;
        f.iowrite_with(self.data_size, LE)?;
        f.iowrite_with(self.flags, LE)?;
        f.iowrite_with(self.form_id, LE)?;
        f.iowrite_with(self.version_ctrl, LE)?;
        f.iowrite_with(self.version, LE)?;
        f.iowrite_with(self.unknown, LE)?;
        Ok(())
    }
}

/// The 24-byte header in front of every `GRUP` container.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct GroupHeader {
    /// Total size of the group, this header included.
    pub size: u32,
    /// Meaning depends on `group_type`; see [`GroupKind`].
    pub label: [u8; 4],
    pub group_type: u32,
    pub stamp: u32,
    pub unknown: u32,
}

impl GroupHeader {
    /// Reads the 20 bytes that follow an already-consumed `GRUP` tag.
    pub fn read_after_sig<R: Read>(f: &mut R) -> error::Result<Self> {
        let size = f.ioread_with::<u32>(LE)?;
        let mut label = [0u8; 4];
        f.read_exact(&mut label)?;
        Ok(GroupHeader {
            size,
            label,
            group_type: f.ioread_with::<u32>(LE)?,
            stamp: f.ioread_with::<u32>(LE)?,
            unknown: f.ioread_with::<u32>(LE)?,
        })
    }

    pub fn write<W: Write>(&self, f: &mut W) -> error::Result<()> {
        f.write_all(&GRUP)?;
        f.iowrite_with(self.size, LE)?;
        f.write_all(&self.label)?;
        f.iowrite_with(self.group_type, LE)?;
        f.iowrite_with(self.stamp, LE)?;
        f.iowrite_with(self.unknown, LE)?;
        Ok(())
    }

    /// Interprets the label according to the group type, when the type is one
    /// of the ten known values.
    pub fn kind(&self) -> Option<GroupKind> {
        GroupKind::from_parts(self.group_type, self.label)
    }

    /// Group types 6 through 9 hang below a CELL record and stay shallow, so
    /// the parser may descend them recursively.
    pub fn is_cell_children(&self) -> bool {
        (6..=9).contains(&self.group_type)
    }
}

/// The label of a group, decoded per group type.
///
/// Top-level groups name a record family; interior cell blocks carry a block
/// number; exterior cell blocks pack two signed 16-bit grid coordinates into
/// the label; everything else carries the form id of the parent record.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum GroupKind {
    Top(Sig),
    WorldChildren(u32),
    InteriorCellBlock(u32),
    InteriorCellSubBlock(u32),
    ExteriorCellBlock(i16, i16),
    ExteriorCellSubBlock(i16, i16),
    CellChildren(u32),
    TopicChildren(u32),
    CellPersistentChildren(u32),
    CellTemporaryChildren(u32),
}

impl GroupKind {
    fn from_parts(group_type: u32, label: [u8; 4]) -> Option<GroupKind> {
        let id = u32::from_le_bytes(label);
        let grid = || {
            let y = i16::from_le_bytes([label[0], label[1]]);
            let x = i16::from_le_bytes([label[2], label[3]]);
            (y, x)
        };
        match group_type {
            0 => Some(GroupKind::Top(label)),
            1 => Some(GroupKind::WorldChildren(id)),
            2 => Some(GroupKind::InteriorCellBlock(id)),
            3 => Some(GroupKind::InteriorCellSubBlock(id)),
            4 => {
                let (y, x) = grid();
                Some(GroupKind::ExteriorCellBlock(y, x))
            }
            5 => {
                let (y, x) = grid();
                Some(GroupKind::ExteriorCellSubBlock(y, x))
            }
            6 => Some(GroupKind::CellChildren(id)),
            7 => Some(GroupKind::TopicChildren(id)),
            8 => Some(GroupKind::CellPersistentChildren(id)),
            9 => Some(GroupKind::CellTemporaryChildren(id)),
            _ => None,
        }
    }
}

/// The 6-byte header in front of every subrecord.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct SubrecordHeader {
    pub sig: Sig,
    pub size: u16,
}

impl SubrecordHeader {
    pub fn read<R: Read>(f: &mut R) -> error::Result<Self> {
        let mut sig = [0u8; 4];
        f.read_exact(&mut sig)?;
        Ok(SubrecordHeader {
            sig,
            size: f.ioread_with::<u16>(LE)?,
        })
    }

    pub fn write<W: Write>(&self, f: &mut W) -> error::Result<()> {
        f.write_all(&self.sig)?;
        f.iowrite_with(self.size, LE)?;
        Ok(())
    }
}

/// Decodes a zlib stream, insisting on the exact declared output length.
pub fn inflate(src: &[u8], expected: usize) -> error::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    let mut decoder = ZlibDecoder::new(src);
    match decoder.read_to_end(&mut out) {
        Ok(_) => {}
        Err(_) => {
            return Err(error::Error::Decompress {
                expected,
                actual: out.len(),
            });
        }
    }
    if out.len() != expected {
        return Err(error::Error::Decompress {
            expected,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// Compresses at maximum level, matching what the game tooling emits.
pub fn deflate(src: &[u8]) -> error::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(src)
        .map_err(|err| error::Error::Compress(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| error::Error::Compress(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn record_header_round_trip() {
        let header = RecordHeader {
            sig: *b"WEAP",
            data_size: 0x1122,
            flags: 0x0004_0080,
            form_id: 0x0001_0800,
            version_ctrl: 0,
            version: 44,
            unknown: 0,
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), SIZEOF_RECORD_HEADER);

        let mut cursor = Cursor::new(&bytes[4..]);
        let reread = RecordHeader::read_after_sig(&mut cursor, *b"WEAP").unwrap();
        assert_eq!(reread, header);
    }

    #[test]
    fn group_header_round_trip() {
        let header = GroupHeader {
            size: 24,
            label: *b"WEAP",
            group_type: 0,
            stamp: 0x2020,
            unknown: 0,
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), SIZEOF_GROUP_HEADER);
        assert_eq!(&bytes[..4], b"GRUP");

        let mut cursor = Cursor::new(&bytes[4..]);
        let reread = GroupHeader::read_after_sig(&mut cursor).unwrap();
        assert_eq!(reread, header);
        assert_eq!(reread.kind(), Some(GroupKind::Top(*b"WEAP")));
    }

    #[test]
    fn exterior_block_label_packs_grid_coordinates() {
        let header = GroupHeader {
            size: 24,
            label: [0xFF, 0xFF, 0x02, 0x00], // y = -1, x = 2
            group_type: 4,
            stamp: 0,
            unknown: 0,
        };
        assert_eq!(header.kind(), Some(GroupKind::ExteriorCellBlock(-1, 2)));
        assert!(!header.is_cell_children());

        let children = GroupHeader {
            group_type: 8,
            ..header
        };
        assert!(children.is_cell_children());
        assert_eq!(
            children.kind(),
            Some(GroupKind::CellPersistentChildren(0x0002_FFFF))
        );
    }

    #[test]
    fn unknown_group_type_has_no_kind() {
        let header = GroupHeader {
            size: 24,
            label: *b"CELL",
            group_type: 11,
            stamp: 0,
            unknown: 0,
        };
        assert_eq!(header.kind(), None);
    }

    #[test]
    fn inflate_checks_declared_length() {
        let payload = b"EDID\x06\x00Sword\0";
        let packed = deflate(payload).unwrap();
        assert_eq!(inflate(&packed, payload.len()).unwrap(), payload);

        match inflate(&packed, payload.len() + 1) {
            Err(crate::error::Error::Decompress { expected, actual }) => {
                assert_eq!(expected, payload.len() + 1);
                assert_eq!(actual, payload.len());
            }
            other => panic!("expected Decompress, got {:?}", other),
        }
    }

    #[test]
    fn inflate_rejects_garbage() {
        assert!(inflate(b"\xde\xad\xbe\xef", 16).is_err());
    }

    #[test]
    fn sig_partial_tail_reads_as_eof() {
        let mut cursor = Cursor::new(b"ED".to_vec());
        assert!(read_sig_opt(&mut cursor).unwrap().is_none());
        let mut empty = Cursor::new(Vec::new());
        assert!(read_sig_opt(&mut empty).unwrap().is_none());
        let mut full = Cursor::new(b"EDID".to_vec());
        assert_eq!(read_sig_opt(&mut full).unwrap(), Some(*b"EDID"));
    }
}
