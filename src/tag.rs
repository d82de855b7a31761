use std::fmt;

use crate::error::{PatternError, TagError};

const SEPARATOR: char = '.';
const ONE_WILDCARD: &str = "*";
const REST_WILDCARD: &str = "**";

/// Hierarchical routing key attached to every record, e.g. `mongo.app.events`.
///
/// Segments keep their original case. Lookups and comparisons go through
/// [`Tag::key`], which is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    segments: Vec<String>,
}

impl Tag {
    /// Parse a dotted tag string. Empty segments (`a..b`, leading or trailing
    /// dots) are dropped.
    pub fn parse(input: &str) -> Result<Self, TagError> {
        let segments: Vec<String> = input
            .split(SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if segments.is_empty() {
            return Err(TagError::Empty);
        }
        Ok(Self { segments })
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self, TagError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(|s| validate_segment(s.into()))
            .collect::<Result<Vec<_>, _>>()?;

        if segments.is_empty() {
            return Err(TagError::Empty);
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn push(&mut self, segment: impl Into<String>) -> Result<(), TagError> {
        let segment = validate_segment(segment.into())?;
        self.segments.push(segment);
        Ok(())
    }

    pub fn replace(&mut self, index: usize, segment: impl Into<String>) -> Result<(), TagError> {
        let len = self.segments.len();
        let segment = validate_segment(segment.into())?;
        let slot = self
            .segments
            .get_mut(index)
            .ok_or(TagError::OutOfRange { index, len })?;
        *slot = segment;
        Ok(())
    }

    /// Canonical lower-cased form used as the buffer map key.
    pub fn key(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Segments are trimmed the same way `Tag::parse` trims them.
fn validate_segment(segment: String) -> Result<String, TagError> {
    let trimmed = segment.trim();
    if trimmed.is_empty() || trimmed.contains(SEPARATOR) {
        return Err(TagError::InvalidSegment(segment));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// `*`: exactly one segment.
    One,
    /// `**`: any remaining segments, including none.
    Rest,
    /// Stored lower-cased, compared against the lower-cased segment.
    Literal(String),
}

/// Compiled dotted pattern such as `metrics.*` or `mongo.**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let tokens: Vec<Token> = pattern
            .split(SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                ONE_WILDCARD => Token::One,
                REST_WILDCARD => Token::Rest,
                literal => Token::Literal(literal.to_lowercase()),
            })
            .collect();

        if tokens.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self {
            source: pattern.trim().to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, tag: &Tag) -> bool {
        let segments = tag.segments();
        let shared = self.tokens.len().min(segments.len());

        for (token, segment) in self.tokens[..shared].iter().zip(segments) {
            match token {
                Token::Rest => return true,
                Token::One => continue,
                Token::Literal(literal) if *literal == segment.to_lowercase() => continue,
                Token::Literal(_) => return false,
            }
        }

        if self.tokens.len() == segments.len() {
            return true;
        }
        // A shorter tag still matches when the next pattern token is `**`.
        self.tokens.len() > segments.len() && self.tokens[shared] == Token::Rest
    }
}

/// Matches every tag.
impl Default for Pattern {
    fn default() -> Self {
        Self {
            source: REST_WILDCARD.to_string(),
            tokens: vec![Token::Rest],
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
