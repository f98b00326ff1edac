// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! OSTA compressed Unicode (UDF dstrings).
//!
//! UDF stores names as a one-byte compression id followed by character
//! data: id 8 means one byte per character (Latin-1), id 16 means UCS-2
//! big-endian. Fixed-size dstring fields additionally record the used byte
//! count in their final byte; identifier fields in FIDs carry their length
//! externally and omit that trailing byte.

use crate::error::{Error, Result};

/// Compression id for 8-bit characters.
pub const COMPRESSION_8: u8 = 8;
/// Compression id for UCS-2 BE characters.
pub const COMPRESSION_16: u8 = 16;

/// Encodes a name as an OSTA compressed Unicode byte sequence (without a
/// trailing length byte), choosing 8-bit compression when every character
/// fits.
///
/// # Errors
///
/// Fails with [`Error::InvalidIdentifier`] on characters outside the BMP.
pub fn encode(name: &str) -> Result<Vec<u8>> {
    let needs_16 = name.chars().any(|ch| u32::from(ch) > 0xFF);
    let mut out = Vec::with_capacity(1 + name.len() * 2);
    if needs_16 {
        out.push(COMPRESSION_16);
        for ch in name.chars() {
            let code = u32::from(ch);
            if code > 0xFFFF {
                return Err(Error::InvalidIdentifier {
                    identifier: name.into(),
                    reason: "UDF names are limited to the basic multilingual plane",
                });
            }
            out.extend_from_slice(&(code as u16).to_be_bytes());
        }
    } else {
        out.push(COMPRESSION_8);
        for ch in name.chars() {
            out.push(u32::from(ch) as u8);
        }
    }
    Ok(out)
}

/// Decodes an OSTA compressed Unicode byte sequence (without a trailing
/// length byte).
///
/// # Errors
///
/// Fails with [`Error::InvalidIso`] on unknown compression ids or odd
/// UCS-2 payloads.
pub fn decode(bytes: &[u8]) -> Result<String> {
    let Some((&compression, data)) = bytes.split_first() else {
        return Ok(String::new());
    };
    match compression {
        COMPRESSION_8 => Ok(data.iter().map(|&b| char::from(b)).collect()),
        COMPRESSION_16 => {
            if data.len() % 2 != 0 {
                return Err(Error::InvalidIso("odd-length UCS-2 dstring"));
            }
            Ok(data
                .chunks_exact(2)
                .map(|pair| {
                    let unit = u16::from_be_bytes([pair[0], pair[1]]);
                    char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER)
                })
                .collect())
        }
        _ => Err(Error::InvalidIso("unknown dstring compression id")),
    }
}

/// Writes `name` into a fixed-size dstring field whose final byte records
/// the used length. An empty name leaves the field all zero.
///
/// # Errors
///
/// Fails with [`Error::IdentifierTooLong`] when the encoding does not fit
/// and propagates encoding errors.
pub fn write_dstring(field: &mut [u8], name: &str) -> Result<()> {
    field.fill(0);
    if name.is_empty() {
        return Ok(());
    }
    let encoded = encode(name)?;
    if encoded.len() > field.len() - 1 {
        return Err(Error::IdentifierTooLong {
            identifier: name.into(),
            max_length: field.len() - 1,
        });
    }
    field[..encoded.len()].copy_from_slice(&encoded);
    *field.last_mut().expect("dstring fields are non-empty") = encoded.len() as u8;
    Ok(())
}

/// Reads a fixed-size dstring field written by [`write_dstring`].
///
/// # Errors
///
/// Fails with [`Error::InvalidIso`] on a nonsense length byte.
pub fn read_dstring(field: &[u8]) -> Result<String> {
    let used = usize::from(*field.last().ok_or(Error::UnexpectedEndOfData)?);
    if used == 0 {
        return Ok(String::new());
    }
    if used > field.len() - 1 {
        return Err(Error::InvalidIso("dstring length byte out of range"));
    }
    decode(&field[..used])
}
