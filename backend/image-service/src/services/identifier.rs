//! Identifier generation for uploaded assets
//!
//! An identifier is the SHA-256 of the uploaded filename followed by the
//! submission instant at nanosecond resolution, rendered as lowercase hex.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::models::Identifier;

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifierGenerator;

impl IdentifierGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Identifier for an upload submitted now
    pub fn generate(&self, filename: &str) -> Identifier {
        self.generate_at(filename, Utc::now())
    }

    /// Deterministic for a given `(filename, instant)` pair
    pub fn generate_at(&self, filename: &str, submitted_at: DateTime<Utc>) -> Identifier {
        let mut hasher = Sha256::new();
        hasher.update(filename.as_bytes());
        hasher.update(
            submitted_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        Identifier::from_digest(&hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IDENTIFIER_LEN;
    use chrono::TimeZone;

    #[test]
    fn test_same_inputs_same_identifier() {
        let generator = IdentifierGenerator::new();
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(
            generator.generate_at("cat.png", at),
            generator.generate_at("cat.png", at)
        );
    }

    #[test]
    fn test_nanosecond_apart_differs() {
        let generator = IdentifierGenerator::new();
        let a = Utc.timestamp_opt(1_700_000_000, 1).unwrap();
        let b = Utc.timestamp_opt(1_700_000_000, 2).unwrap();
        assert_ne!(
            generator.generate_at("cat.png", a),
            generator.generate_at("cat.png", b)
        );
    }

    #[test]
    fn test_shape_round_trips_through_parse() {
        let id = IdentifierGenerator::new().generate("dog.jpg");
        assert_eq!(id.as_str().len(), IDENTIFIER_LEN);
        assert_eq!(Identifier::parse(id.as_str()), Some(id.clone()));
        assert!(!id.as_str().contains("dog"));
    }
}
