//! Ordered header collection.

use crate::headers::name::{split_line, HeaderName};

/// An ordered list of raw `Name: value` lines.
///
/// Order is significant: lookups return the first occurrence and folding
/// keeps the position of the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    lines: Vec<String>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Value of the first header with this name.
    pub fn get(&self, name: &HeaderName) -> Option<&str> {
        self.lines
            .iter()
            .find(|line| name.matches(line))
            .and_then(|line| split_line(line))
            .map(|(_, value)| value)
    }

    /// Values of every header with this name, in order.
    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a str> + 'a {
        self.lines
            .iter()
            .filter(move |line| name.matches(line))
            .filter_map(|line| split_line(line).map(|(_, value)| value))
    }

    /// Append a raw line.
    pub fn set(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Remove every header with this name.
    pub fn unset(&mut self, name: &HeaderName) {
        self.lines.retain(|line| !name.matches(line));
    }

    /// Replace every header with this name by a single line.
    pub fn replace(&mut self, name: &HeaderName, line: impl Into<String>) {
        self.unset(name);
        self.set(line);
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.lines.iter().any(|line| name.matches(line))
    }

    pub fn count(&self, name: &HeaderName) -> usize {
        self.lines.iter().filter(|line| name.matches(line)).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub(crate) fn lines(&self) -> &[String] {
        &self.lines
    }

    pub(crate) fn replace_lines(&mut self, lines: Vec<String>) {
        self.lines = lines;
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a str;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, String>, fn(&'a String) -> &'a str>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter().map(String::as_str)
    }
}
