//! Short reference codes shared by notes and tasks.
//!
//! # Responsibility
//! - Validate the 6-char code grammar at construction time.
//! - Generate fresh random codes for newly created entities.
//!
//! # Invariants
//! - A `RefCode` always matches `[a-z][0-9][a-z0-9]{4}`.
//! - Uniqueness across notes and tasks is enforced by stores, not here.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Exact length of every reference code.
pub const REF_CODE_LEN: usize = 6;

const CODE_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Validated reference code, e.g. `a1bcde`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefCode(String);

/// Raised when text does not satisfy the reference code grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRefCode(pub String);

impl Display for InvalidRefCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid reference code `{}`", self.0)
    }
}

impl Error for InvalidRefCode {}

impl RefCode {
    /// Parses and validates one code (without brackets).
    pub fn parse(value: &str) -> Result<Self, InvalidRefCode> {
        if is_valid_code(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidRefCode(value.to_string()))
        }
    }

    /// Derives a random code from a fresh v4 UUID.
    ///
    /// Callers must still check for collisions against existing entities.
    pub fn generate() -> Self {
        let bytes = *Uuid::new_v4().as_bytes();
        let mut code = String::with_capacity(REF_CODE_LEN);
        code.push(char::from(b'a' + bytes[0] % 26));
        code.push(char::from(b'0' + bytes[1] % 10));
        for byte in &bytes[2..2 + (REF_CODE_LEN - 2)] {
            code.push(char::from(CODE_ALPHABET[usize::from(*byte) % CODE_ALPHABET.len()]));
        }
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Bracketed literal as it appears in document text.
    pub fn bracketed(&self) -> String {
        format!("[{}]", self.0)
    }
}

/// Returns whether `value` matches `[a-z][0-9][a-z0-9]{4}`.
pub fn is_valid_code(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == REF_CODE_LEN
        && bytes[0].is_ascii_lowercase()
        && bytes[1].is_ascii_digit()
        && bytes[2..]
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

impl Display for RefCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RefCode {
    type Error = InvalidRefCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid_code(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidRefCode(value))
        }
    }
}

impl From<RefCode> for String {
    fn from(value: RefCode) -> Self {
        value.0
    }
}

impl AsRef<str> for RefCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
