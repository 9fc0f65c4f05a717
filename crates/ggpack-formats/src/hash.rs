//! Path hashing for the bundle index
//!
//! Logical paths are looked up in the index by a 64-bit FNV-1a digest of the
//! lowercased path followed by the two-byte suffix `++`. Arithmetic wraps at
//! 64 bits.

/// FNV-1a 64-bit offset basis
pub const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Suffix appended to every path before hashing
pub const PATH_SUFFIX: &[u8] = b"++";

/// Compute the FNV-1a digest of raw bytes
pub fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Compute the index hash of a logical path
///
/// The path is case-insensitive: `Foo/Bar.txt` and `foo/bar.txt` hash the
/// same. Paths are given without the `./` catalog prefix.
///
/// # Examples
///
/// ```
/// use ggpack_formats::path_hash;
///
/// assert_eq!(path_hash("Foo/Bar.txt"), path_hash("foo/bar.txt"));
/// ```
pub fn path_hash(path: &str) -> u64 {
    let lowered = path.to_lowercase();
    let hash = fnv1a_64(lowered.as_bytes());
    PATH_SUFFIX.iter().fold(hash, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(path_hash(""), 0x07e4_7507_b4a9_2e53);
        assert_eq!(path_hash("Art/Textures/rock.dds"), 0xd932_1c80_0fff_f678);
        assert_eq!(path_hash("data/items.dat"), 0xca3f_26b0_80a1_262b);
        assert_eq!(path_hash("Foo/Bar.txt"), 0x63b5_7742_887d_fcd1);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(path_hash("FOO/BAR.TXT"), path_hash("foo/bar.txt"));
        assert_eq!(path_hash("foo/bar.txt"), 0x63b5_7742_887d_fcd1);
    }

    #[test]
    fn test_suffix_is_part_of_digest() {
        assert_eq!(path_hash("a"), fnv1a_64(b"a++"));
        assert_ne!(path_hash("a"), fnv1a_64(b"a"));
    }

    proptest! {
        #[test]
        fn prop_ascii_case_folding(path in "[A-Za-z0-9/._]{0,40}") {
            prop_assert_eq!(path_hash(&path), path_hash(&path.to_ascii_lowercase()));
        }
    }
}
