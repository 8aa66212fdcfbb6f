//! Length-prefixed header name descriptors.
//!
//! A descriptor is encoded as `<len><name>:` where the first byte holds the
//! length of the name. Static descriptors are validated by a `const fn`, so a
//! malformed constant fails the build instead of failing a request.

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Well-known descriptors.
pub const H_VIA: HeaderName = HeaderName::from_static("\x03Via:");
pub const H_CONTENT_LENGTH: HeaderName = HeaderName::from_static("\x0eContent-Length:");
pub const H_ACCEPT_ENCODING: HeaderName = HeaderName::from_static("\x0fAccept-Encoding:");
pub const H_HOST: HeaderName = HeaderName::from_static("\x04Host:");
pub const H_COOKIE: HeaderName = HeaderName::from_static("\x06Cookie:");

/// Longest name a descriptor can encode.
pub const MAX_NAME_LEN: usize = 0x7f;

/// Errors building a descriptor at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderNameError {
    #[error("empty header name")]
    Empty,

    #[error("header name too long ({0} bytes)")]
    TooLong(usize),

    #[error("invalid character in header name {0:?}")]
    InvalidChar(String),
}

/// A header name in descriptor form.
#[derive(Clone, PartialEq, Eq)]
pub struct HeaderName {
    descriptor: Cow<'static, str>,
}

impl HeaderName {
    /// Wrap a static descriptor.
    ///
    /// # Panics
    /// When the length byte does not match the name or the trailing colon is
    /// missing. In a `const` item this is a compile error.
    pub const fn from_static(descriptor: &'static str) -> Self {
        let b = descriptor.as_bytes();
        assert!(b.len() >= 3, "header descriptor too short");
        let l = b[0] as usize;
        assert!(l + 2 == b.len(), "header descriptor length byte mismatch");
        assert!(b[l + 1] == b':', "header descriptor must end with ':'");
        Self {
            descriptor: Cow::Borrowed(descriptor),
        }
    }

    /// Build a descriptor for a plain header name.
    pub fn new(name: &str) -> Result<Self, HeaderNameError> {
        if name.is_empty() {
            return Err(HeaderNameError::Empty);
        }
        // The length byte must stay ASCII for the descriptor to be a `str`.
        if name.len() > MAX_NAME_LEN {
            return Err(HeaderNameError::TooLong(name.len()));
        }
        if !name.bytes().all(is_token_byte) {
            return Err(HeaderNameError::InvalidChar(name.to_string()));
        }

        let mut descriptor = String::with_capacity(name.len() + 2);
        descriptor.push(name.len() as u8 as char);
        descriptor.push_str(name);
        descriptor.push(':');
        Ok(Self {
            descriptor: Cow::Owned(descriptor),
        })
    }

    /// Length of the bare name.
    pub fn len(&self) -> usize {
        self.descriptor.as_bytes()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bare name, without length prefix or colon.
    pub fn as_str(&self) -> &str {
        &self.descriptor[1..1 + self.len()]
    }

    /// The encoded descriptor.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Case-insensitive match against a raw `Name: value` line.
    pub fn matches(&self, line: &str) -> bool {
        let l = self.len();
        let line = line.as_bytes();
        line.len() > l
            && line[l] == b':'
            && line[..l].eq_ignore_ascii_case(self.as_str().as_bytes())
    }

    /// Case-insensitive comparison with a bare name.
    pub fn is(&self, name: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(name)
    }
}

impl fmt::Debug for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HeaderName").field(&self.as_str()).finish()
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 9110 `tchar`.
pub fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Split a raw header line into name and value, trimming the whitespace
/// after the colon.
pub fn split_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    Some((name, value.trim_start_matches([' ', '\t'])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_descriptor() {
        assert_eq!(H_COOKIE.len(), 6);
        assert_eq!(H_COOKIE.as_str(), "Cookie");
        assert_eq!(H_CONTENT_LENGTH.as_str(), "Content-Length");
        assert_eq!(H_ACCEPT_ENCODING.len(), "Accept-Encoding".len());
    }

    #[test]
    fn test_matches_case_insensitive() {
        assert!(H_COOKIE.matches("Cookie: a=1"));
        assert!(H_COOKIE.matches("cookie: a=1"));
        assert!(H_COOKIE.matches("COOKIE:a=1"));
        assert!(!H_COOKIE.matches("Set-Cookie: a=1"));
        assert!(!H_COOKIE.matches("Cookie2: a=1"));
        assert!(!H_COOKIE.matches("Cookie"));
    }

    #[test]
    fn test_matches_agrees_with_lowercase_prefix() {
        let lines = ["x-test: 1", "X-TEST: 2", "X-Tesz: 3", "X-Te", "x-test:", "X-Test-More: 4"];
        let name = HeaderName::new("X-Test").unwrap();
        for line in lines {
            let expected = line.len() > name.len()
                && line.as_bytes()[name.len()] == b':'
                && line[..name.len()].to_ascii_lowercase() == "x-test";
            assert_eq!(name.matches(line), expected, "line {line:?}");
        }
    }

    #[test]
    fn test_runtime_descriptor() {
        let name = HeaderName::new("X-User").unwrap();
        assert_eq!(name.descriptor(), "\x06X-User:");
        assert!(name.is("x-user"));

        assert_eq!(HeaderName::new(""), Err(HeaderNameError::Empty));
        assert!(matches!(HeaderName::new("Bad Name"), Err(HeaderNameError::InvalidChar(_))));
        assert!(matches!(HeaderName::new(&"x".repeat(200)), Err(HeaderNameError::TooLong(200))));
    }

    #[test]
    #[should_panic(expected = "length byte mismatch")]
    fn test_malformed_static_descriptor_panics() {
        let descriptor: &'static str = Box::leak(String::from("\x05Cookie:").into_boxed_str());
        let _ = HeaderName::from_static(descriptor);
    }

    #[test]
    fn test_split_line() {
        assert_eq!(split_line("X-A:  1"), Some(("X-A", "1")));
        assert_eq!(split_line("X-A:"), Some(("X-A", "")));
        assert_eq!(split_line("no colon"), None);
    }
}
