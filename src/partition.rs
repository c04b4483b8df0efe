//! Bucket selection.

use sha2::{Digest, Sha256};

use crate::error::KeyError;
use crate::key::PartitionKey;

/// How a key is mapped to a bucket index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioner {
    /// Stable hash of the key text, modulo the reducer count.
    Hash,
    /// The key is the bucket index itself.
    Index,
}

impl Partitioner {
    /// Select the bucket for `key` among `reducers` buckets.
    pub fn select(&self, key: &PartitionKey, reducers: usize) -> Result<usize, KeyError> {
        match self {
            Partitioner::Hash => Ok(hash_bucket(key.as_text().as_bytes(), reducers)),
            Partitioner::Index => index_bucket(key, reducers),
        }
    }
}

/// Deterministic bucket for a key: the first 8 bytes of its SHA-256 digest,
/// read big-endian, modulo `reducers`.
///
/// The mapping is stable across runs, processes and platforms.
pub fn hash_bucket(key: &[u8], reducers: usize) -> usize {
    let digest = Sha256::digest(key);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % reducers.max(1) as u64) as usize
}

fn index_bucket(key: &PartitionKey, reducers: usize) -> Result<usize, KeyError> {
    let bucket = match key {
        PartitionKey::Text(text) => text.parse::<i64>().ok(),
        PartitionKey::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
        PartitionKey::Number(_) => None,
    };

    let Some(bucket) = bucket else {
        return Err(KeyError::UnparseableBucket {
            key: key.as_text().into_owned(),
        });
    };

    usize::try_from(bucket)
        .ok()
        .filter(|index| *index < reducers)
        .ok_or(KeyError::BucketOutOfRange { bucket, reducers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(s: &str) -> PartitionKey {
        PartitionKey::Text(s.to_string())
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_bucket(b"", 1), 0);
        let first = hash_bucket(b"a", 1000);
        assert_eq!(hash_bucket(b"a", 1000), first);
        assert_eq!(
            Partitioner::Hash.select(&text("a"), 1000).unwrap(),
            first
        );
    }

    #[test]
    fn test_hash_matches_digest_prefix() {
        let digest = Sha256::digest(b"user-42");
        let expected = u64::from_be_bytes(digest[..8].try_into().unwrap()) % 7;
        assert_eq!(hash_bucket(b"user-42", 7), expected as usize);
    }

    #[test]
    fn test_index_mode() {
        assert_eq!(Partitioner::Index.select(&text("2"), 3).unwrap(), 2);
        assert_eq!(Partitioner::Index.select(&text("0"), 1).unwrap(), 0);
        assert_eq!(
            Partitioner::Index
                .select(&PartitionKey::Number(1.0), 3)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_index_out_of_range() {
        let err = Partitioner::Index.select(&text("5"), 3).unwrap_err();
        assert!(matches!(
            err,
            KeyError::BucketOutOfRange {
                bucket: 5,
                reducers: 3
            }
        ));
        assert!(err.to_string().contains("bucket 5"));

        let err = Partitioner::Index.select(&text("-1"), 3).unwrap_err();
        assert!(matches!(err, KeyError::BucketOutOfRange { bucket: -1, .. }));
    }

    #[test]
    fn test_index_unparseable() {
        for key in ["", "x", "1.5", " 1", "1e2"] {
            let err = Partitioner::Index.select(&text(key), 3).unwrap_err();
            assert!(
                matches!(err, KeyError::UnparseableBucket { .. }),
                "key {key:?}"
            );
        }
        let err = Partitioner::Index
            .select(&PartitionKey::Number(0.5), 3)
            .unwrap_err();
        assert!(matches!(err, KeyError::UnparseableBucket { key } if key == "0.5"));
    }

    proptest! {
        #[test]
        fn prop_hash_in_range(key in ".*", reducers in 1usize..10_000) {
            let bucket = Partitioner::Hash.select(&PartitionKey::Text(key), reducers).unwrap();
            prop_assert!(bucket < reducers);
        }

        #[test]
        fn prop_hash_deterministic(key in proptest::collection::vec(any::<u8>(), 0..64), reducers in 1usize..512) {
            prop_assert_eq!(hash_bucket(&key, reducers), hash_bucket(&key, reducers));
        }

        #[test]
        fn prop_index_roundtrips_valid_buckets(reducers in 1usize..1000, offset in 0usize..1000) {
            let bucket = offset % reducers;
            let key = PartitionKey::Text(bucket.to_string());
            prop_assert_eq!(Partitioner::Index.select(&key, reducers).unwrap(), bucket);
        }
    }
}
