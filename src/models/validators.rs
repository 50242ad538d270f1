use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;
use validator::ValidationError;

/// Regex for identifiers that may be interpolated into generated SQL.
/// Examples: "events", "audit_log_2024", "Sessions"
pub static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// Postgres truncates identifiers beyond `NAMEDATALEN - 1` bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Fragments rejected anywhere in an identifier, matched case-insensitively.
const FORBIDDEN_FRAGMENTS: [&str; 8] = [
    ";", "--", "/*", "*/", "drop", "delete", "insert", "update",
];

/// Returns true if `name` is safe to splice into a query as a table or column name.
///
/// This is a coarse deny-list, not a SQL parser. A name passes when every
/// character is an ASCII letter, digit or underscore and the lowercased name
/// contains none of the forbidden fragments. Names such as `updated_at` are
/// therefore rejected.
pub fn is_safe_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LENGTH {
        return false;
    }
    if !IDENTIFIER_REGEX.is_match(name) {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    !FORBIDDEN_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

/// `validator` custom rule wrapping [`is_safe_identifier`].
///
/// Empty names pass here; the `length` rule on the field reports them.
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || is_safe_identifier(name) {
        return Ok(());
    }
    let mut err = ValidationError::new("invalid_identifier");
    err.message = Some(Cow::Owned(format!("invalid table name: {name}")));
    Err(err)
}
