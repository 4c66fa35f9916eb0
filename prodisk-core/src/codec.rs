//! Apple II nibble encodings.
//!
//! Disk II media can only hold "disk bytes" with the high bit set and no
//! more than one pair of adjacent zero bits. Address fields use 4-4 encoding
//! (each byte split across two disk bytes), sector data uses 6-2 encoding:
//! the low two bits of every data byte are gathered into 86 auxiliary
//! values, the remaining six bits form 256 main values, and all 342 values
//! are XOR-chained and mapped through a 64-entry table. A trailing disk byte
//! carries the final chain value as a checksum.

use crate::error::{DiskError, DiskResult};

/// Bytes in a decoded sector.
pub const SECTOR_SIZE: usize = 256;

/// Auxiliary (two-bit bucket) values in a 6-2 data field.
pub const AUX_LEN: usize = 86;

/// Encoded data field length including the trailing checksum.
pub const ENCODED_SECTOR_LEN: usize = AUX_LEN + SECTOR_SIZE + 1;

/// Encoded address field length: volume, track, sector, checksum.
pub const ADDRESS_FIELD_LEN: usize = 8;

pub const ADDRESS_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0x96];
pub const DATA_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0xAD];
pub const EPILOGUE: [u8; 3] = [0xDE, 0xAA, 0xEB];

/// Self-sync filler byte.
pub const SYNC_BYTE: u8 = 0xFF;

const INVALID: u8 = 0xFF;

/// 6-bit value to disk byte.
const ENCODE_62: [u8; 64] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6, 0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2, 0xB3,
    0xB4, 0xB5, 0xB6, 0xB7, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE, 0xCF, 0xD3,
    0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE, 0xDF, 0xE5, 0xE6, 0xE7, 0xE9, 0xEA, 0xEB, 0xEC,
    0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF,
];

/// Disk byte to 6-bit value, `INVALID` for bytes outside the set.
const DECODE_62: [u8; 256] = build_decode_table();

const fn build_decode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < ENCODE_62.len() {
        table[ENCODE_62[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// Map a 6-bit value (0..64) to its disk byte.
pub fn encode62(value: u8) -> u8 {
    ENCODE_62[(value & 0x3F) as usize]
}

/// Map a disk byte back to its 6-bit value.
pub fn decode62(nibble: u8) -> Option<u8> {
    match DECODE_62[nibble as usize] {
        INVALID => None,
        value => Some(value),
    }
}

/// 4-4 encode one byte into an odd-bits/even-bits pair.
pub fn encode44(value: u8) -> [u8; 2] {
    [(value >> 1) | 0xAA, value | 0xAA]
}

/// Inverse of [`encode44`].
pub fn decode44(odd: u8, even: u8) -> u8 {
    ((odd << 1) | 0x01) & even
}

// Auxiliary buckets store the two low bits swapped.
fn swap_low_bits(value: u8) -> u8 {
    ((value & 0x01) << 1) | ((value >> 1) & 0x01)
}

/// 6-2 encode one sector into its 343-byte data field body.
pub fn encode_sector(data: &[u8; SECTOR_SIZE]) -> [u8; ENCODED_SECTOR_LEN] {
    let mut values = [0u8; AUX_LEN + SECTOR_SIZE];
    for (i, &byte) in data.iter().enumerate() {
        let shift = (i / AUX_LEN) * 2;
        values[i % AUX_LEN] |= swap_low_bits(byte) << shift;
        values[AUX_LEN + i] = byte >> 2;
    }

    let mut out = [0u8; ENCODED_SECTOR_LEN];
    let mut prev = 0u8;
    for (slot, &value) in out.iter_mut().zip(values.iter()) {
        *slot = encode62(value ^ prev);
        prev = value;
    }
    out[ENCODED_SECTOR_LEN - 1] = encode62(prev);
    out
}

/// A decoded data field.
#[derive(Debug, Clone)]
pub struct DecodedSector {
    pub data: [u8; SECTOR_SIZE],
    /// False when the trailing checksum did not match the chained values.
    pub checksum_ok: bool,
}

/// 6-2 decode a 343-byte data field body.
///
/// A checksum mismatch is reported in the result rather than failing, so
/// callers can still use the decoded bytes. Bytes outside the disk byte set
/// do fail.
pub fn decode_sector(encoded: &[u8; ENCODED_SECTOR_LEN]) -> DiskResult<DecodedSector> {
    let mut values = [0u8; AUX_LEN + SECTOR_SIZE];
    let mut acc = 0u8;
    for (value, &nibble) in values.iter_mut().zip(encoded.iter()) {
        acc ^= decode62(nibble).ok_or(DiskError::InvalidNibble(nibble))?;
        *value = acc;
    }
    let trailer = encoded[ENCODED_SECTOR_LEN - 1];
    let check = decode62(trailer).ok_or(DiskError::InvalidNibble(trailer))?;

    let mut data = [0u8; SECTOR_SIZE];
    for (i, byte) in data.iter_mut().enumerate() {
        let low = (values[i % AUX_LEN] >> ((i / AUX_LEN) * 2)) & 0x03;
        *byte = (values[AUX_LEN + i] << 2) | swap_low_bits(low);
    }

    Ok(DecodedSector {
        data,
        checksum_ok: acc == check,
    })
}

/// Decoded sector address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressField {
    pub volume: u8,
    pub track: u8,
    pub sector: u8,
}

impl AddressField {
    pub fn new(volume: u8, track: u8, sector: u8) -> Self {
        Self {
            volume,
            track,
            sector,
        }
    }

    /// Decode the eight 4-4 bytes following an address prologue.
    pub fn decode(bytes: &[u8; ADDRESS_FIELD_LEN]) -> DiskResult<Self> {
        let volume = decode44(bytes[0], bytes[1]);
        let track = decode44(bytes[2], bytes[3]);
        let sector = decode44(bytes[4], bytes[5]);
        let checksum = decode44(bytes[6], bytes[7]);
        if volume ^ track ^ sector ^ checksum != 0 {
            return Err(DiskError::AddressChecksum {
                volume,
                track,
                sector,
            });
        }
        Ok(Self::new(volume, track, sector))
    }

    pub fn encode(&self) -> [u8; ADDRESS_FIELD_LEN] {
        let checksum = self.volume ^ self.track ^ self.sector;
        let mut out = [0u8; ADDRESS_FIELD_LEN];
        for (pair, value) in out
            .chunks_exact_mut(2)
            .zip([self.volume, self.track, self.sector, checksum])
        {
            pair.copy_from_slice(&encode44(value));
        }
        out
    }
}
