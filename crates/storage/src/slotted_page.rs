//! Slot directory codec for record-store data pages (§4.4 "Record store").
//!
//! Layout of a page's payload:
//! ```text
//! [num_slots:u16][free_start:u16]   -- 4-byte page-local header
//! [slot 0][slot 1]...               -- slot directory, grows forward
//! ...free space...
//! ...[cell 1][cell 0]                -- cell bodies, grow backward from the end
//! ```
//! Each slot is `(offset: u16, len: u16)`, `offset` measured from the start
//! of the payload. Slots are append-only: a key's old slot is tombstoned in
//! place (its flags byte flipped) rather than reclaimed, and the new value
//! is appended as a fresh cell — this engine never compacts a page.
//!
//! A cell is `[key_len:u16][flags:u8][key bytes]` followed by, depending on
//! `flags`:
//! - tombstone (bit 0 set): nothing further.
//! - overflow (bit 1 set): `[total_len:u32][first_overflow_page:u64]`.
//! - inline: `[value_len:u32][value bytes]`.
use talus_common::{PageId, PAGE_PAYLOAD_SIZE};

const SLOT_SIZE: usize = 4;
const PAGE_HEADER_LEN: usize = 4;

pub const FLAG_TOMBSTONE: u8 = 0b01;
pub const FLAG_OVERFLOW: u8 = 0b10;

pub fn init(payload: &mut [u8]) {
    write_u16(payload, 0, 0);
    write_u16(payload, 2, PAGE_PAYLOAD_SIZE as u16);
}

pub fn num_slots(payload: &[u8]) -> u16 {
    read_u16(payload, 0)
}

fn set_num_slots(payload: &mut [u8], n: u16) {
    write_u16(payload, 0, n);
}

fn free_start(payload: &[u8]) -> u16 {
    read_u16(payload, 2)
}

fn set_free_start(payload: &mut [u8], offset: u16) {
    write_u16(payload, 2, offset);
}

fn slot_pos(i: u16) -> usize {
    PAGE_HEADER_LEN + i as usize * SLOT_SIZE
}

pub fn read_slot(payload: &[u8], i: u16) -> (u16, u16) {
    let pos = slot_pos(i);
    (read_u16(payload, pos), read_u16(payload, pos + 2))
}

fn write_slot(payload: &mut [u8], i: u16, offset: u16, len: u16) {
    let pos = slot_pos(i);
    write_u16(payload, pos, offset);
    write_u16(payload, pos + 2, len);
}

/// Bytes available for one more slot entry plus a cell of `cell_len`.
pub fn free_space(payload: &[u8]) -> usize {
    let directory_end = PAGE_HEADER_LEN + num_slots(payload) as usize * SLOT_SIZE;
    let cells_start = free_start(payload) as usize;
    cells_start.saturating_sub(directory_end + SLOT_SIZE)
}

/// Append a new cell, returning its slot index, or `None` if the page
/// doesn't have room.
pub fn append_cell(payload: &mut [u8], cell: &[u8]) -> Option<u16> {
    if free_space(payload) < cell.len() {
        return None;
    }
    let new_free_start = free_start(payload) as usize - cell.len();
    payload[new_free_start..new_free_start + cell.len()].copy_from_slice(cell);
    set_free_start(payload, new_free_start as u16);

    let slot_idx = num_slots(payload);
    write_slot(payload, slot_idx, new_free_start as u16, cell.len() as u16);
    set_num_slots(payload, slot_idx + 1);
    Some(slot_idx)
}

pub fn cell_bytes<'a>(payload: &'a [u8], slot: u16) -> &'a [u8] {
    let (offset, len) = read_slot(payload, slot);
    &payload[offset as usize..offset as usize + len as usize]
}

/// Flip a slot's tombstone bit in place. The flags byte sits right after
/// the 2-byte key length at the front of every cell.
pub fn tombstone_in_place(payload: &mut [u8], slot: u16) {
    let (offset, len) = read_slot(payload, slot);
    if len == 0 {
        return;
    }
    payload[offset as usize + 2] |= FLAG_TOMBSTONE;
}

pub struct DecodedCell {
    pub key: Vec<u8>,
    pub tombstone: bool,
    pub overflow: bool,
    pub inline_value: Vec<u8>,
    pub overflow_total_len: u32,
    pub overflow_first_page: PageId,
}

pub fn decode_cell(cell: &[u8]) -> DecodedCell {
    let key_len = u16::from_le_bytes(cell[0..2].try_into().unwrap()) as usize;
    let flags = cell[2];
    let key = cell[3..3 + key_len].to_vec();
    let rest = &cell[3 + key_len..];

    let tombstone = flags & FLAG_TOMBSTONE != 0;
    let overflow = flags & FLAG_OVERFLOW != 0;

    if tombstone {
        return DecodedCell {
            key,
            tombstone: true,
            overflow: false,
            inline_value: Vec::new(),
            overflow_total_len: 0,
            overflow_first_page: 0,
        };
    }
    if overflow {
        let total_len = u32::from_le_bytes(rest[0..4].try_into().unwrap());
        let first_page = u64::from_le_bytes(rest[4..12].try_into().unwrap());
        DecodedCell {
            key,
            tombstone: false,
            overflow: true,
            inline_value: Vec::new(),
            overflow_total_len: total_len,
            overflow_first_page: first_page,
        }
    } else {
        let value_len = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
        let value = rest[4..4 + value_len].to_vec();
        DecodedCell {
            key,
            tombstone: false,
            overflow: false,
            inline_value: value,
            overflow_total_len: 0,
            overflow_first_page: 0,
        }
    }
}

pub fn encode_inline_cell(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut cell = Vec::with_capacity(3 + key.len() + 4 + value.len());
    cell.extend_from_slice(&(key.len() as u16).to_le_bytes());
    cell.push(0);
    cell.extend_from_slice(key);
    cell.extend_from_slice(&(value.len() as u32).to_le_bytes());
    cell.extend_from_slice(value);
    cell
}

pub fn encode_overflow_cell(key: &[u8], total_len: u32, first_page: PageId) -> Vec<u8> {
    let mut cell = Vec::with_capacity(3 + key.len() + 12);
    cell.extend_from_slice(&(key.len() as u16).to_le_bytes());
    cell.push(FLAG_OVERFLOW);
    cell.extend_from_slice(key);
    cell.extend_from_slice(&total_len.to_le_bytes());
    cell.extend_from_slice(&first_page.to_le_bytes());
    cell
}

fn read_u16(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap())
}

fn write_u16(buf: &mut [u8], pos: usize, value: u16) {
    buf[pos..pos + 2].copy_from_slice(&value.to_le_bytes());
}

/// Threshold past which a value spills into an overflow chain rather than
/// living inline in its cell.
pub const INLINE_VALUE_LIMIT: usize = PAGE_PAYLOAD_SIZE / 4;

/// Overflow page layout: `[next_page:u64][chunk_len:u16][chunk bytes]`.
pub const OVERFLOW_HEADER_LEN: usize = 10;
pub const OVERFLOW_CHUNK_CAPACITY: usize = PAGE_PAYLOAD_SIZE - OVERFLOW_HEADER_LEN;

pub fn write_overflow_header(payload: &mut [u8], next_page: PageId, chunk_len: u16) {
    payload[0..8].copy_from_slice(&next_page.to_le_bytes());
    payload[8..10].copy_from_slice(&chunk_len.to_le_bytes());
}

pub fn read_overflow_header(payload: &[u8]) -> (PageId, u16) {
    (
        u64::from_le_bytes(payload[0..8].try_into().unwrap()),
        u16::from_le_bytes(payload[8..10].try_into().unwrap()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_payload() -> Vec<u8> {
        let mut payload = vec![0u8; PAGE_PAYLOAD_SIZE];
        init(&mut payload);
        payload
    }

    #[test]
    fn append_then_decode_round_trips() {
        let mut payload = fresh_payload();
        let cell = encode_inline_cell(b"hello", b"world");
        let slot = append_cell(&mut payload, &cell).unwrap();
        let decoded = decode_cell(cell_bytes(&payload, slot));
        assert_eq!(decoded.key, b"hello");
        assert_eq!(decoded.inline_value, b"world");
        assert!(!decoded.tombstone);
    }

    #[test]
    fn tombstone_flag_survives_round_trip() {
        let mut payload = fresh_payload();
        let cell = encode_inline_cell(b"k", b"v");
        let slot = append_cell(&mut payload, &cell).unwrap();
        tombstone_in_place(&mut payload, slot);
        let decoded = decode_cell(cell_bytes(&payload, slot));
        assert!(decoded.tombstone);
    }

    #[test]
    fn append_fails_when_page_is_full() {
        let mut payload = fresh_payload();
        let big_value = vec![0xAB; PAGE_PAYLOAD_SIZE];
        let cell = encode_inline_cell(b"k", &big_value);
        assert!(append_cell(&mut payload, &cell).is_none());
    }

    #[test]
    fn multiple_cells_do_not_overlap() {
        let mut payload = fresh_payload();
        let s0 = append_cell(&mut payload, &encode_inline_cell(b"a", b"1")).unwrap();
        let s1 = append_cell(&mut payload, &encode_inline_cell(b"b", b"2")).unwrap();
        assert_ne!(s0, s1);
        assert_eq!(decode_cell(cell_bytes(&payload, s0)).inline_value, b"1");
        assert_eq!(decode_cell(cell_bytes(&payload, s1)).inline_value, b"2");
    }
}
