//! Deterministic coercion of caller-supplied chunk IDs into UUID form (§4.7).

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Already UUID-shaped strings and bare non-negative integers pass through
/// unchanged; everything else is hashed with SHA-256 and the first 16 bytes
/// are reformatted as `8-4-4-4-12` hex. Deterministic, so the same logical
/// chunk ID always maps to the same point ID and a re-upsert lands in place.
#[must_use]
pub fn normalize_point_id(raw: &str) -> String {
    if Uuid::parse_str(raw).is_ok() {
        return raw.to_string();
    }
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.to_string();
    }

    let digest = Sha256::digest(raw.as_bytes());
    let hex = hex::encode(&digest[..16]);
    format!("{}-{}-{}-{}-{}", &hex[0..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..32])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_shaped_ids_pass_through() {
        let id = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_point_id(id), id);
    }

    #[test]
    fn numeric_ids_pass_through() {
        assert_eq!(normalize_point_id("12345"), "12345");
    }

    #[test]
    fn arbitrary_ids_hash_to_a_stable_uuid_shape() {
        let a = normalize_point_id("src/main.rs:12");
        let b = normalize_point_id("src/main.rs:12");
        assert_eq!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);
    }

    #[test]
    fn different_ids_hash_to_different_uuids() {
        let a = normalize_point_id("src/main.rs:12");
        let b = normalize_point_id("src/main.rs:13");
        assert_ne!(a, b);
    }
}
