//! Key paths into nested trees

use std::fmt;

/// Sequence of map keys from the root of a tree to a nested value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a dot-separated path. Empty segments are skipped.
    pub fn parse(path: &str) -> Self {
        KeyPath::new(path.split('.').filter(|s| !s.is_empty()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, segment: impl Into<String>) -> KeyPath {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        KeyPath(segments)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::parse(path)
    }
}

impl From<&[&str]> for KeyPath {
    fn from(segments: &[&str]) -> Self {
        KeyPath::new(segments.iter().copied())
    }
}
