//! TFRecord framing
//!
//! Each record is `u64 LE length`, masked crc32c of the length bytes, the
//! payload, then masked crc32c of the payload.

use std::io::{self, Write};

const MASK_DELTA: u32 = 0xa282_ead8;
const LENGTH_BYTES: usize = 8;
const CRC_BYTES: usize = 4;

pub fn masked_crc(data: &[u8]) -> u32 {
    crc32c::crc32c(data).rotate_right(15).wrapping_add(MASK_DELTA)
}

pub fn write_record<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let length = (payload.len() as u64).to_le_bytes();
    writer.write_all(&length)?;
    writer.write_all(&masked_crc(&length).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.write_all(&masked_crc(payload).to_le_bytes())
}

/// Split a TFRecord file into payloads, checking both checksums of every
/// record.
pub fn read_records(data: &[u8]) -> io::Result<Vec<Vec<u8>>> {
    let mut records = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let (length_bytes, after) = take(rest, LENGTH_BYTES)?;
        let (length_crc, after) = take(after, CRC_BYTES)?;
        check_crc(length_bytes, length_crc, records.len(), "length")?;

        let length = u64::from_le_bytes(fixed(length_bytes));
        let length =
            usize::try_from(length).map_err(|_| invalid(records.len(), "length overflows"))?;
        let (payload, after) = take(after, length)?;
        let (payload_crc, after) = take(after, CRC_BYTES)?;
        check_crc(payload, payload_crc, records.len(), "payload")?;

        records.push(payload.to_vec());
        rest = after;
    }

    Ok(records)
}

fn take(data: &[u8], n: usize) -> io::Result<(&[u8], &[u8])> {
    if data.len() < n {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("truncated record: wanted {} bytes, {} left", n, data.len()),
        ));
    }
    Ok(data.split_at(n))
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn check_crc(data: &[u8], stored: &[u8], index: usize, what: &str) -> io::Result<()> {
    if u32::from_le_bytes(fixed(stored)) != masked_crc(data) {
        return Err(invalid(index, &format!("{} checksum mismatch", what)));
    }
    Ok(())
}

fn invalid(index: usize, message: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("record {}: {}", index, message),
    )
}
