// logtrail - fnv.rs
//
// FNV hash primitives. Two variants are needed and the ecosystem `fnv` crate
// only implements one:
//   - FNV-1 (64-bit), mul-then-xor: the head hash used to detect file
//     identity change across a restart.
//   - FNV-1a (32-bit), xor-then-mul: the dual checksum embedded in each
//     binary segment row frame.
// Both are plain functions over the well-known offset-basis/prime constants;
// there is nothing stateful enough here to warrant a `Hasher` impl.

const FNV64_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV64_PRIME: u64 = 0x100000001b3;

const FNV32_OFFSET_BASIS: u32 = 0x811c9dc5;
const FNV32_PRIME: u32 = 0x01000193;

/// Starting accumulator for an incremental FNV-1 64-bit fold. Exposed so
/// callers that feed bytes across multiple calls (e.g. `position::HeadHasher`,
/// which hashes a file's head incrementally as lines arrive) can seed a fold
/// without duplicating the offset-basis constant.
pub const FNV64_INIT: u64 = FNV64_OFFSET_BASIS;

/// Fold one more byte into a running FNV-1 64-bit accumulator.
pub fn fnv1_64_step(hash: u64, byte: u8) -> u64 {
    hash.wrapping_mul(FNV64_PRIME) ^ u64::from(byte)
}

/// Classic FNV-1 (not FNV-1a): multiply then xor, 64-bit.
pub fn fnv1_64(data: &[u8]) -> u64 {
    data.iter().fold(FNV64_INIT, |hash, &byte| fnv1_64_step(hash, byte))
}

/// FNV-1a, 32-bit: xor then multiply. Used for the frame checksums.
pub fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET_BASIS;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// Render a 64-bit FNV-1 digest as lowercase ASCII hex, matching the
/// `Position.head_hash` text representation used on disk and on the wire.
pub fn fnv1_64_hex(data: &[u8]) -> String {
    format!("{:016x}", fnv1_64(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1_64_empty_is_offset_basis() {
        assert_eq!(fnv1_64(b""), FNV64_OFFSET_BASIS);
    }

    #[test]
    fn fnv1a_32_empty_is_offset_basis() {
        assert_eq!(fnv1a_32(b""), FNV32_OFFSET_BASIS);
    }

    #[test]
    fn fnv1_64_is_deterministic_and_sensitive_to_content() {
        let a = fnv1_64(b"hello world");
        let b = fnv1_64(b"hello world");
        let c = fnv1_64(b"hello worlD");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fnv1a_32_detects_single_bit_flip() {
        let original = fnv1a_32(b"the quick brown fox");
        let mut flipped = b"the quick brown fox".to_vec();
        flipped[3] ^= 0x01;
        assert_ne!(original, fnv1a_32(&flipped));
    }

    #[test]
    fn fnv1_64_hex_is_16_lowercase_hex_chars() {
        let hex = fnv1_64_hex(b"abc");
        assert_eq!(hex.len(), 16);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
