use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Maximum topic length in bytes.
pub const MAX_TOPIC_LEN: usize = 128;

/// Unique slug naming a thread.
///
/// Topics double as file stems and lock-marker names, so they are restricted
/// to lowercase ASCII letters, digits, `-`, `_`, and `.`; they must not start
/// with `.` or contain `..`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Validate and wrap a topic slug.
    pub fn new(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        let invalid = |reason: &str| TypeError::InvalidTopic {
            topic: raw.clone(),
            reason: reason.into(),
        };

        if raw.is_empty() {
            return Err(invalid("topic must not be empty"));
        }
        if raw.len() > MAX_TOPIC_LEN {
            return Err(invalid("topic is too long"));
        }
        if raw.starts_with('.') {
            return Err(invalid("topic must not start with '.'"));
        }
        if raw.contains("..") {
            return Err(invalid("topic must not contain '..'"));
        }
        if let Some(ch) = raw
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')))
        {
            return Err(invalid(&format!("forbidden character {ch:?}")));
        }
        Ok(Self(raw))
    }

    /// Lowercase and hyphenate free text into a topic slug.
    ///
    /// Runs of characters outside the allowed set collapse into one `-`.
    pub fn slugify(text: &str) -> Result<Self, TypeError> {
        let mut slug = String::with_capacity(text.len());
        for ch in text.trim().chars() {
            let ch = ch.to_ascii_lowercase();
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
                slug.push(ch);
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_matches('-');
        Self::new(slug.chars().take(MAX_TOPIC_LEN).collect::<String>())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the thread document for this topic.
    pub fn file_name(&self) -> String {
        format!("{}.md", self.0)
    }
}

impl TryFrom<String> for Topic {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl FromStr for Topic {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_slugs() {
        assert!(Topic::new("feature-x").is_ok());
        assert!(Topic::new("v1.2_release").is_ok());
        assert!(Topic::new("a").is_ok());
    }

    #[test]
    fn rejects_bad_slugs() {
        assert!(Topic::new("").is_err());
        assert!(Topic::new(".hidden").is_err());
        assert!(Topic::new("a..b").is_err());
        assert!(Topic::new("Upper").is_err());
        assert!(Topic::new("has space").is_err());
        assert!(Topic::new("nested/path").is_err());
        assert!(Topic::new("x".repeat(MAX_TOPIC_LEN + 1)).is_err());
    }

    #[test]
    fn slugify_collapses_separators() {
        let topic = Topic::slugify("  Feature X: Auth / Login ").unwrap();
        assert_eq!(topic.as_str(), "feature-x-auth-login");
    }

    #[test]
    fn slugify_of_symbols_only_fails() {
        assert!(Topic::slugify("!!!").is_err());
    }

    #[test]
    fn file_name_appends_extension() {
        assert_eq!(Topic::new("feature-x").unwrap().file_name(), "feature-x.md");
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: Topic = serde_json::from_str("\"feature-x\"").unwrap();
        assert_eq!(ok.as_str(), "feature-x");
        assert!(serde_json::from_str::<Topic>("\"Bad Topic\"").is_err());
    }

    proptest::proptest! {
        #[test]
        fn slugify_hyphenates_words(text in "[a-zA-Z0-9]{1,10}( [a-zA-Z0-9]{1,10}){0,5}") {
            let topic = Topic::slugify(&text).unwrap();
            proptest::prop_assert_eq!(topic.as_str(), text.to_ascii_lowercase().replace(' ', "-"));
        }
    }
}
