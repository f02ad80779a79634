//! SHA-1 integrity check of assembled pieces

use sha1::{Digest, Sha1};

/// Returns true iff the SHA-1 digest of `data` equals `expected_hash`.
pub fn verify_piece(data: &[u8], expected_hash: &[u8; 20]) -> bool {
    Sha1::digest(data).as_slice() == expected_hash
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn digest(data: &[u8]) -> [u8; 20] {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&Sha1::digest(data));
        hash
    }

    #[test]
    fn test_known_digest() {
        let expected = hex::decode("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap();
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&expected);

        assert!(verify_piece(b"abc", &hash));
        assert!(!verify_piece(b"abd", &hash));
    }

    proptest! {
        #[test]
        fn prop_single_bit_flip_fails(
            data in proptest::collection::vec(any::<u8>(), 1..1024),
            position in any::<usize>(),
            bit in 0u8..8,
        ) {
            let hash = digest(&data);
            prop_assert!(verify_piece(&data, &hash));

            let mut corrupted = data.clone();
            corrupted[position % data.len()] ^= 1 << bit;
            prop_assert!(!verify_piece(&corrupted, &hash));
        }
    }
}
