//! Email is the identity key shared by the directory and the platform.

/// Normalise an email address for cross-system comparison.
///
/// `"Alice@EXAMPLE.com "` and `"alice@example.com"` are the same identity.
pub fn normalize_email(raw: &str) -> String { raw.trim().to_lowercase() }
