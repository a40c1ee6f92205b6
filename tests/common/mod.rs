//! Builders for synthetic plugin images, shared by the integration suites.

#![allow(dead_code)]

use espial::codec::deflate;

pub const COMPRESSED: u32 = 0x0004_0000;
pub const LOCALIZED: u32 = 0x0000_0080;

/// One on-wire subrecord.
pub fn sub(sig: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(sig);
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// One record with an already-assembled payload.
pub fn record(sig: &[u8; 4], form_id: u32, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(sig);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&form_id.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // version control
    out.extend_from_slice(&44u16.to_le_bytes()); // version
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// One record whose payload is deflated and framed with the uncompressed
/// length, flags patched accordingly.
pub fn compressed_record(sig: &[u8; 4], form_id: u32, flags: u32, payload: &[u8]) -> Vec<u8> {
    let packed = deflate(payload).unwrap();
    let mut framed = Vec::with_capacity(4 + packed.len());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(&packed);
    record(sig, form_id, flags | COMPRESSED, &framed)
}

/// One group wrapping already-assembled children.
pub fn group(label: &[u8; 4], group_type: u32, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"GRUP");
    out.extend_from_slice(&((24 + content.len()) as u32).to_le_bytes());
    out.extend_from_slice(label);
    out.extend_from_slice(&group_type.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // stamp
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(content);
    out
}

/// The mandatory plugin header record, empty payload.
pub fn tes4(flags: u32) -> Vec<u8> {
    record(b"TES4", 0, flags, &[])
}

/// A sidecar string-table image from `(id, framed payload)` pairs.
pub fn strings_file(entries: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut directory = Vec::new();
    for (id, payload) in entries {
        directory.push((*id, data.len() as u32));
        data.extend_from_slice(payload);
    }
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    for (id, offset) in directory {
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out.extend_from_slice(&data);
    out
}
