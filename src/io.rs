//! Little-endian binary primitives shared by every compressor/container
//! `write`/`load` pair. Keeping the convention in one place means every
//! format on disk is byte-compatible as long as callers route through here.

use std::io::{Read, Write};

use crate::error::{Result, VqError};

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_f32<W: Write>(w: &mut W, v: f32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn read_f32<R: Read>(r: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn write_f32_slice<W: Write>(w: &mut W, v: &[f32]) -> Result<()> {
    for &x in v {
        write_f32(w, x)?;
    }
    Ok(())
}

/// Reads `len` little-endian f32s. `len` comes from an already-validated
/// length prefix; callers are expected to bound it (see `read_checked_len`).
pub fn read_f32_vec<R: Read>(r: &mut R, len: usize) -> Result<Vec<f32>> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(read_f32(r)?);
    }
    Ok(out)
}

pub fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    write_u32(w, bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

pub fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_checked_len(r)?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Reads a u32 length prefix, rejecting the corrupted-stream cases spec'd in
/// §7 (negative/implausible counts show up here as implausibly large u32s
/// once interpreted, since the wire format has no signed lengths).
pub fn read_checked_len<R: Read>(r: &mut R) -> Result<usize> {
    let len = read_u32(r)?;
    if len > 1 << 30 {
        return Err(VqError::CorruptedStream(format!(
            "implausible length prefix: {len}"
        )));
    }
    Ok(len as usize)
}
