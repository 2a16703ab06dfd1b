//! Deterministic, checksummed task identifiers.
//!
//! Every cloud object belonging to a task is named or tagged with the long
//! form of its identifier, which is what lets [`crate::TaskBackend::read`]
//! rediscover state without a local store. The short form is used where
//! providers impose tight length or character limits (Azure storage accounts,
//! for example).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use super::error::ResourceError;

const PREFIX: &str = "tpi";
const NAME_LENGTH: usize = 30;
const HASH_LENGTH: usize = 8;
const FALLBACK_NAME: &str = "task";
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RADIX: u32 = 36;

static CANONICAL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^tpi-([a-z0-9]+(?:[a-z0-9-]*[a-z0-9])?)-([a-z0-9]+)-([a-z0-9]+)$").ok()
});

/// Canonical task identifier.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Identifier {
    long: String,
}

impl Identifier {
    /// Derives an identifier from a user-supplied name.
    ///
    /// Names that are already canonical are kept verbatim.
    #[must_use]
    pub fn new(name: &str) -> Self {
        if verify(name) {
            return Self {
                long: name.to_owned(),
            };
        }

        let normalized = normalize(name);
        let digest = hash(name);
        let checksum = hash(&format!("{normalized}{digest}"));
        Self {
            long: format!("{PREFIX}-{normalized}-{digest}-{checksum}"),
        }
    }

    /// Returns the canonical long form, `tpi-<name>-<hash>-<checksum>`.
    #[must_use]
    pub fn long(&self) -> &str {
        &self.long
    }

    /// Returns the hash and checksum segments concatenated.
    #[must_use]
    pub fn short(&self) -> String {
        let mut segments = self.long.rsplitn(3, '-');
        let checksum = segments.next().unwrap_or_default();
        let digest = segments.next().unwrap_or_default();
        format!("{digest}{checksum}")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.long)
    }
}

/// Parses an already-canonical identifier.
///
/// # Errors
///
/// Returns [`ResourceError::Invalid`] when `value` is not canonical or its
/// checksum does not match.
pub fn parse_identifier(value: &str) -> Result<Identifier, ResourceError> {
    if verify(value) {
        Ok(Identifier {
            long: value.to_owned(),
        })
    } else {
        Err(ResourceError::invalid(
            "identifier",
            format!("{value} is not a canonical identifier"),
        ))
    }
}

fn verify(value: &str) -> bool {
    let Some(pattern) = CANONICAL.as_ref() else {
        return false;
    };
    pattern.captures(value).is_some_and(|captures| {
        match (captures.get(1), captures.get(2), captures.get(3)) {
            (Some(name), Some(digest), Some(checksum)) => {
                hash(&format!("{}{}", name.as_str(), digest.as_str())) == checksum.as_str()
            }
            _ => false,
        }
    })
}

fn normalize(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .take(NAME_LENGTH)
        .collect();
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// First characters of the base36 rendering of the SHA-256 digest, read as a
/// big-endian integer.
fn hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut rendered = base36(&digest);
    rendered.truncate(HASH_LENGTH);
    rendered
}

fn base36(bytes: &[u8]) -> String {
    let mut number: Vec<u8> = bytes.iter().copied().skip_while(|byte| *byte == 0).collect();
    let mut digits = Vec::new();

    while !number.is_empty() {
        let mut remainder: u32 = 0;
        let mut quotient = Vec::with_capacity(number.len());
        for byte in &number {
            let accumulator = (remainder << 8) | u32::from(*byte);
            let digit = accumulator.checked_div(RADIX).unwrap_or_default();
            remainder = accumulator.checked_rem(RADIX).unwrap_or_default();
            if !(quotient.is_empty() && digit == 0) {
                quotient.push(u8::try_from(digit).unwrap_or(u8::MAX));
            }
        }
        let index = usize::try_from(remainder).unwrap_or_default();
        digits.push(BASE36.get(index).copied().unwrap_or(b'0'));
        number = quotient;
    }

    if digits.is_empty() {
        digits.push(b'0');
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn long_matches_known_value() {
        let identifier = Identifier::new("test");
        assert_eq!(identifier.long(), "tpi-test-3z4xlzwq-3u0vweb4");
        assert_eq!(identifier.short(), "3z4xlzwq3u0vweb4");
    }

    #[test]
    fn long_is_stable_on_canonical_input() {
        let identifier = Identifier::new("tpi-test-3z4xlzwq-3u0vweb4");
        assert_eq!(identifier.long(), "tpi-test-3z4xlzwq-3u0vweb4");
    }

    #[rstest]
    #[case("test")]
    #[case("My Experiment #42")]
    #[case("---leading-and-trailing---")]
    #[case("a-very-long-name-that-exceeds-the-thirty-character-limit")]
    #[case("!!!")]
    fn parse_round_trips(#[case] name: &str) {
        let identifier = Identifier::new(name);
        let parsed = parse_identifier(identifier.long()).expect("canonical form should parse");
        assert_eq!(parsed, identifier);
        assert_eq!(Identifier::new(identifier.long()), identifier);
    }

    #[rstest]
    #[case("test")]
    #[case("another name entirely")]
    fn short_has_constant_length(#[case] name: &str) {
        assert_eq!(Identifier::new(name).short().len(), HASH_LENGTH * 2);
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        let err = parse_identifier("tpi-test-3z4xlzwq-00000000").expect_err("checksum mismatch");
        assert!(matches!(err, ResourceError::Invalid { .. }));
    }

    #[test]
    fn normalize_slugs_names() {
        assert_eq!(normalize("My Experiment #42"), "my-experiment--42");
        assert_eq!(normalize("--x--"), "x");
        assert_eq!(normalize(&"a".repeat(40)).len(), NAME_LENGTH);
    }

    #[test]
    fn base36_renders_small_numbers() {
        assert_eq!(base36(&[0, 35]), "z");
        assert_eq!(base36(&[1, 0]), "74");
        assert_eq!(base36(&[]), "0");
    }
}
