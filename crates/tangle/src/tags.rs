//! Tag sets attached to tensors.
//!
//! Tags are free-form strings used to address groups of tensors inside a
//! network ("SITE3", "KET", ...). A [`TagSet`] is an ordered set, so its
//! display form is deterministic.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(tag: impl Into<String>) -> Self {
        let mut set = Self::new();
        set.insert(tag);
        set
    }

    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.0.insert(tag.into())
    }

    pub fn remove(&mut self, tag: &str) -> bool {
        self.0.remove(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Set union, consuming neither side.
    pub fn union(&self, other: &TagSet) -> TagSet {
        TagSet(self.0.union(&other.0).cloned().collect())
    }

    pub fn extend_from(&mut self, other: &TagSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// True if every tag in `tags` is present.
    pub fn contains_all<'a>(&self, tags: impl IntoIterator<Item = &'a str>) -> bool {
        tags.into_iter().all(|t| self.contains(t))
    }

    /// True if at least one tag in `tags` is present.
    pub fn contains_any<'a>(&self, tags: impl IntoIterator<Item = &'a str>) -> bool {
        tags.into_iter().any(|t| self.contains(t))
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        TagSet(iter.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for TagSet {
    /// Parse a comma-separated tag list; whitespace around tags is trimmed.
    fn from(s: &str) -> Self {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

impl FromStr for TagSet {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tag in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{tag}")?;
            first = false;
        }
        Ok(())
    }
}
