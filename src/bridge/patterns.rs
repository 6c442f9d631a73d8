//! Reply pattern matching for bridge bot notices.
//!
//! Success templates come from configuration with `%s` standing in for the
//! variable part (`"Successfully logged in as %s"`). The rest of the template
//! is a regular expression searched anywhere in the body.

use fancy_regex::Regex;
use tracing::warn;

/// Wildcard placeholder in success templates.
const WILDCARD: &str = "%s";

/// A compiled success template with its original string for debugging.
#[derive(Debug, Clone)]
pub struct SuccessPattern {
    original: String,
    regex: Regex,
}

impl SuccessPattern {
    /// Compile a success template.
    pub fn compile(template: &str) -> Result<Self, fancy_regex::Error> {
        let regex = Regex::new(&template.replace(WILDCARD, ".*"))?;
        Ok(Self {
            original: template.to_string(),
            regex,
        })
    }

    /// Check if a body matches the template.
    pub fn is_match(&self, body: &str) -> bool {
        self.regex.is_match(body).unwrap_or_else(|e| {
            warn!("Regex match error for pattern '{}': {}", self.original, e);
            false
        })
    }

    pub fn template(&self) -> &str {
        &self.original
    }
}

/// Decide whether a notice body carries the failure token.
pub fn contains_failure(token: Option<&str>, body: &str) -> bool {
    match token {
        Some(token) if !token.is_empty() => body.contains(token),
        _ => false,
    }
}
