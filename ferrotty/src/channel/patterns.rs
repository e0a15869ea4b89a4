//! Patterns and expectations for binary-safe matching.

use std::fmt;

use memchr::memmem;
use regex::bytes::Regex;

use crate::codec;
use crate::error::ChannelError;

/// Trait for pattern matching - regex or literal bytes, extensible for custom parsers.
pub trait Matcher: Send + Sync {
    /// Returns the `(start, end)` byte range of the first match, if any.
    fn find_range(&self, data: &[u8]) -> Option<(usize, usize)>;

    /// Check if the data matches the pattern.
    fn is_match(&self, data: &[u8]) -> bool {
        self.find_range(data).is_some()
    }
}

impl Matcher for Regex {
    fn find_range(&self, data: &[u8]) -> Option<(usize, usize)> {
        self.find(data).map(|m| (m.start(), m.end()))
    }
}

/// A single thing to wait for on the channel.
#[derive(Clone)]
pub enum Pattern {
    /// Literal byte string, may contain any byte.
    Exact(memmem::Finder<'static>),

    /// Regular expression over raw bytes.
    Regex(Regex),
}

impl Pattern {
    /// Literal pattern.
    pub fn exact(needle: impl AsRef<[u8]>) -> Self {
        Self::Exact(memmem::Finder::new(needle.as_ref()).into_owned())
    }

    /// Regex pattern, compiled over bytes (`(?-u)` escapes like `\xff` work).
    pub fn regex(pattern: &str) -> Result<Self, ChannelError> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }
}

impl Matcher for Pattern {
    fn find_range(&self, data: &[u8]) -> Option<(usize, usize)> {
        match self {
            Self::Exact(finder) => finder
                .find(data)
                .map(|start| (start, start + finder.needle().len())),
            Self::Regex(re) => re.find_range(data),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(finder) => f.debug_tuple("Exact").field(&finder.needle()).finish(),
            Self::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(finder) => write!(f, "'{}'", codec::printable(finder.needle())),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(needle: &str) -> Self {
        Self::exact(needle)
    }
}

impl From<&[u8]> for Pattern {
    fn from(needle: &[u8]) -> Self {
        Self::exact(needle)
    }
}

impl<const N: usize> From<&[u8; N]> for Pattern {
    fn from(needle: &[u8; N]) -> Self {
        Self::exact(needle)
    }
}

impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

/// The ordered set of patterns one expect call waits for.
///
/// End-of-stream and timeout are not patterns here; they are reported as
/// their own outcomes.
#[derive(Debug, Clone)]
pub struct Expectation {
    patterns: Vec<Pattern>,
}

/// Where an expectation matched inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Found {
    /// Index of the pattern that matched.
    pub index: usize,
    /// Start offset of the match.
    pub start: usize,
    /// End offset (exclusive) of the match.
    pub end: usize,
}

impl Expectation {
    /// Build an expectation from one or more patterns.
    pub fn new<I, P>(patterns: I) -> Result<Self, ChannelError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Pattern>,
    {
        let patterns: Vec<Pattern> = patterns.into_iter().map(Into::into).collect();
        if patterns.is_empty() {
            return Err(ChannelError::EmptyExpectation);
        }
        Ok(Self { patterns })
    }

    /// The patterns in caller order.
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Find the earliest match of any pattern.
    ///
    /// When two patterns match at the same offset the lower index wins.
    pub fn find(&self, data: &[u8]) -> Option<Found> {
        let mut best: Option<Found> = None;
        for (index, pattern) in self.patterns.iter().enumerate() {
            if let Some((start, end)) = pattern.find_range(data) {
                if best.is_none_or(|b| start < b.start) {
                    best = Some(Found { index, start, end });
                }
            }
        }
        best
    }
}

impl From<Pattern> for Expectation {
    fn from(pattern: Pattern) -> Self {
        Self {
            patterns: vec![pattern],
        }
    }
}

impl From<&str> for Expectation {
    fn from(needle: &str) -> Self {
        Pattern::exact(needle).into()
    }
}

impl<const N: usize> From<&[u8; N]> for Expectation {
    fn from(needle: &[u8; N]) -> Self {
        Pattern::exact(needle).into()
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pattern) in self.patterns.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{pattern}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern_binary() {
        let pattern = Pattern::exact([0x00, 0xff, 0x1b]);
        assert_eq!(pattern.find_range(b"ab\x00\xff\x1bcd"), Some((2, 5)));
        assert!(!pattern.is_match(b"\x00\xff"));
    }

    #[test]
    fn test_regex_pattern() {
        let pattern = Pattern::regex(r"(?-u)leak: 0x[0-9a-f]+").unwrap();
        assert_eq!(pattern.find_range(b"xx leak: 0x41414141\n"), Some((3, 19)));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(matches!(
            Pattern::regex("("),
            Err(ChannelError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_earliest_match_wins() {
        let expectation = Expectation::new(["second", "first"]).unwrap();
        let found = expectation.find(b"..first..second").unwrap();
        assert_eq!(found, Found { index: 1, start: 2, end: 7 });
    }

    #[test]
    fn test_tie_goes_to_lower_index() {
        let expectation = Expectation::new([Pattern::exact("ab"), Pattern::exact("abc")]).unwrap();
        assert_eq!(expectation.find(b"abc").unwrap().index, 0);
    }

    #[test]
    fn test_empty_expectation() {
        assert!(matches!(
            Expectation::new(Vec::<Pattern>::new()),
            Err(ChannelError::EmptyExpectation)
        ));
    }

    #[test]
    fn test_display() {
        let expectation =
            Expectation::new([Pattern::exact("$ "), Pattern::regex(r"\d+").unwrap()]).unwrap();
        assert_eq!(expectation.to_string(), "'$ ' | /\\d+/");
    }
}
