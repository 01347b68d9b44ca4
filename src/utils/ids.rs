use uuid::Uuid;

const SUFFIX_LEN: usize = 9;

/// Builds `<prefix>-<suffix>` where the suffix is nine lowercase hex characters
/// taken from a fresh v4 UUID.
pub fn prefixed_id(prefix: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &token[..SUFFIX_LEN])
}

/// Picks an index in `0..len` from a fresh v4 UUID. `len` must be non-zero.
pub fn random_index(len: usize) -> usize {
    (Uuid::new_v4().as_u128() % len as u128) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_id_uses_lowercase_alphanumerics() {
        let id = prefixed_id("analysis");
        let suffix = id.strip_prefix("analysis-").unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        );
    }

    #[test]
    fn prefixed_ids_differ() {
        assert_ne!(prefixed_id("user"), prefixed_id("user"));
    }

    #[test]
    fn random_index_stays_in_range() {
        for _ in 0..64 {
            assert!(random_index(4) < 4);
        }
    }
}
