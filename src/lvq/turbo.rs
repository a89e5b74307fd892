//! Turbo packing: the 64-byte-block interleave LVQ uses so an AVX-512-style
//! gather reads four lanes per byte fetch. Within each complete 64-byte block,
//! byte `i` moves to lane
//! `blockStart + (i%16)*4 + (i/16)`; this groups four 16-lane interleaves so
//! a single gather instruction picks up one lane from each group.

const BLOCK: usize = 64;

pub fn packed_len(dim: usize) -> usize {
    let full_blocks = dim / BLOCK;
    let remainder = dim % BLOCK;
    (full_blocks + if remainder > 0 { 1 } else { 0 }) * BLOCK
}

fn lane(i: usize) -> usize {
    (i % 16) * 4 + (i / 16)
}

/// Permutes `bytes` into Turbo order. Complete 64-byte blocks are
/// interleaved per `lane`; anything past the last complete block (and any
/// padding up to the next multiple of 64) is left/zero as-is, so the
/// permutation stays a bijection restricted to complete blocks.
pub fn pack_turbo(bytes: &[u8]) -> Vec<u8> {
    let dim = bytes.len();
    let full_blocks = dim / BLOCK;
    let complete_len = full_blocks * BLOCK;
    let mut out = vec![0u8; packed_len(dim)];

    for b in 0..full_blocks {
        let start = b * BLOCK;
        for i in 0..BLOCK {
            out[start + lane(i)] = bytes[start + i];
        }
    }
    out[complete_len..dim].copy_from_slice(&bytes[complete_len..dim]);
    out
}

/// Inverse of `pack_turbo`, truncated back to `dim` bytes.
pub fn unpack_turbo(packed: &[u8], dim: usize) -> Vec<u8> {
    let full_blocks = dim / BLOCK;
    let complete_len = full_blocks * BLOCK;
    let mut out = vec![0u8; dim];

    for b in 0..full_blocks {
        let start = b * BLOCK;
        for i in 0..BLOCK {
            out[start + i] = packed[start + lane(i)];
        }
    }
    out[complete_len..dim].copy_from_slice(&packed[complete_len..dim]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bijection_on_complete_blocks() {
        let bytes: Vec<u8> = (0..128u32).map(|i| (i % 256) as u8).collect();
        let packed = pack_turbo(&bytes);
        let unpacked = unpack_turbo(&packed, bytes.len());
        assert_eq!(unpacked, bytes);
    }

    #[test]
    fn preserves_tail_zeros() {
        let mut bytes = vec![7u8; 70];
        bytes[64..].fill(0);
        let packed = pack_turbo(&bytes);
        assert_eq!(packed.len(), packed_len(70));
        assert_eq!(&packed[64..70], &[0u8; 6]);
        assert_eq!(&packed[70..128], &[0u8; 58]);
    }

    #[test]
    fn single_block_matches_lane_formula() {
        let bytes: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        let packed = pack_turbo(&bytes);
        for i in 0..64 {
            assert_eq!(packed[lane(i)], i as u8);
        }
    }

    #[test]
    fn packed_len_rounds_up_to_64() {
        assert_eq!(packed_len(64), 64);
        assert_eq!(packed_len(65), 128);
        assert_eq!(packed_len(128), 128);
        assert_eq!(packed_len(0), 0);
    }
}
