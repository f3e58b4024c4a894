//! Match expressions over [`ResourceId`]s.
//!
//! The glob grammar operates on `/`-separated ids:
//!
//!   * `*` matches any run of characters within one segment,
//!   * `?` matches one character within a segment,
//!   * `**` matches any run of characters, `/` included,
//!   * `**/` at the start of a segment matches zero or more whole directories,
//!   * everything else matches itself.
//!
//! ```rust
//! use quire::Pattern;
//!
//! let posts = Pattern::parse("posts/*.md").unwrap();
//! assert!(posts.matches("posts/hello.md"));
//! assert!(!posts.matches("posts/2024/hello.md"));
//!
//! let css = Pattern::parse("css/**.css").unwrap();
//! assert!(css.matches("css/vendor/reset.css"));
//! ```

use std::fmt;
use std::str::FromStr;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Kind, Result};
use crate::id::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Star,
    DoubleStar,
    AnyDirs,
    Question,
}

/// A parsed glob.
#[derive(Clone, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Glob {
    source: String,
    tokens: Vec<Token>,
}

impl Glob {
    pub fn parse(source: &str) -> Result<Glob> {
        let invalid = |reason: &str| error! {
            "malformed glob pattern",
            "pattern" => source,
            "reason" => reason,
        }.with_kind(Kind::Pattern);

        if source.is_empty() {
            return Err(invalid("pattern is empty"));
        } else if source.starts_with('/') {
            return Err(invalid("patterns are relative and may not start with `/`"));
        } else if source.contains("//") {
            return Err(invalid("empty path segment"));
        } else if source.contains("***") {
            return Err(invalid("more than two consecutive `*`"));
        }

        let mut tokens = vec![];
        let mut literal = String::new();
        let mut rest = source;
        let mut prev = None;
        while let Some(c) = rest.chars().next() {
            let segment_start = matches!(prev, None | Some('/'));
            let (token, len) = match c {
                '*' if segment_start && rest.starts_with("**/") => (Some(Token::AnyDirs), 3),
                '*' if rest.starts_with("**") => (Some(Token::DoubleStar), 2),
                '*' => (Some(Token::Star), 1),
                '?' => (Some(Token::Question), 1),
                c => {
                    literal.push(c);
                    (None, c.len_utf8())
                }
            };

            if let Some(token) = token {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }

                tokens.push(token);
            }

            prev = rest[..len].chars().last();
            rest = &rest[len..];
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Glob { source: source.to_string(), tokens })
    }

    pub fn matches(&self, id: &str) -> bool {
        match_tokens(&self.tokens, id)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn match_tokens(tokens: &[Token], s: &str) -> bool {
    let Some((token, rest)) = tokens.split_first() else {
        return s.is_empty();
    };

    match token {
        Token::Literal(literal) => s.strip_prefix(literal.as_str())
            .map_or(false, |s| match_tokens(rest, s)),
        Token::Question => {
            let mut chars = s.chars();
            match chars.next() {
                Some(c) if c != '/' => match_tokens(rest, chars.as_str()),
                _ => false,
            }
        }
        Token::Star => {
            for (i, c) in s.char_indices() {
                if match_tokens(rest, &s[i..]) {
                    return true;
                }

                if c == '/' {
                    return false;
                }
            }

            match_tokens(rest, "")
        }
        Token::DoubleStar => {
            s.char_indices().any(|(i, _)| match_tokens(rest, &s[i..]))
                || match_tokens(rest, "")
        }
        Token::AnyDirs => {
            match_tokens(rest, s) || s.char_indices()
                .filter(|&(_, c)| c == '/')
                .any(|(i, _)| match_tokens(rest, &s[i + 1..]))
        }
    }
}

impl TryFrom<String> for Glob {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Glob::parse(&value)
    }
}

impl From<Glob> for String {
    fn from(value: Glob) -> Self {
        value.source
    }
}

impl fmt::Debug for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Glob({:?})", self.source)
    }
}

/// A regular expression. It matches an id if it matches anywhere in it;
/// anchor it with `^` and `$` to match the whole id.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Regex(regex::Regex);

impl TryFrom<String> for Regex {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        regex::Regex::new(&value)
            .map(Regex)
            .map_err(|e| Error::from(e).chain(error! {
                "malformed regex pattern",
                "pattern" => value,
            }.with_kind(Kind::Pattern)))
    }
}

impl From<Regex> for String {
    fn from(value: Regex) -> Self {
        value.0.as_str().to_string()
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Regex({:?})", self.0.as_str())
    }
}

/// A predicate over resource ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Everything,
    Glob(Glob),
    Regex(Regex),
    List(BTreeSet<ResourceId>),
    And(Box<Pattern>, Box<Pattern>),
    Or(Box<Pattern>, Box<Pattern>),
    Not(Box<Pattern>),
}

impl Pattern {
    /// Parses a glob. See the [module docs](self) for the grammar.
    pub fn parse(glob: &str) -> Result<Pattern> {
        Glob::parse(glob).map(Pattern::Glob)
    }

    /// An unanchored regular expression over the id.
    pub fn regex(regex: &str) -> Result<Pattern> {
        Regex::try_from(regex.to_string()).map(Pattern::Regex)
    }

    /// Matches exactly the given ids.
    pub fn list<I, T>(ids: I) -> Pattern
        where I: IntoIterator<Item = T>, T: Into<ResourceId>
    {
        Pattern::List(ids.into_iter().map(Into::into).collect())
    }

    pub fn everything() -> Pattern {
        Pattern::Everything
    }

    pub fn and(self, other: Pattern) -> Pattern {
        Pattern::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Pattern) -> Pattern {
        Pattern::Or(Box::new(self), Box::new(other))
    }

    /// The complement of `self`.
    pub fn not(self) -> Pattern {
        Pattern::Not(Box::new(self))
    }

    pub fn matches<I: AsRef<str> + ?Sized>(&self, id: &I) -> bool {
        let id = id.as_ref();
        match self {
            Pattern::Everything => true,
            Pattern::Glob(glob) => glob.matches(id),
            Pattern::Regex(regex) => regex.0.is_match(id),
            Pattern::List(ids) => ids.contains(id),
            Pattern::And(a, b) => a.matches(id) && b.matches(id),
            Pattern::Or(a, b) => a.matches(id) || b.matches(id),
            Pattern::Not(p) => !p.matches(id),
        }
    }

    /// The ids in `universe` matching `self`, sorted and deduplicated.
    pub fn select<'a, I>(&self, universe: I) -> Vec<ResourceId>
        where I: IntoIterator<Item = &'a ResourceId>
    {
        universe.into_iter()
            .filter(|id| self.matches(*id))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Everything => write!(f, "**"),
            Pattern::Glob(glob) => write!(f, "{}", glob.source),
            Pattern::Regex(regex) => write!(f, "regex({})", regex.0.as_str()),
            Pattern::List(ids) => {
                let ids = ids.iter().map(|id| id.as_str()).collect::<Vec<_>>();
                write!(f, "[{}]", ids.join(", "))
            }
            Pattern::And(a, b) => write!(f, "({a} && {b})"),
            Pattern::Or(a, b) => write!(f, "({a} || {b})"),
            Pattern::Not(p) => write!(f, "!{p}"),
        }
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pattern::parse(s)
    }
}

/// Conversion into a [`Pattern`], deferred so that malformed patterns are
/// reported when a build starts rather than where rules are declared.
pub trait IntoPattern {
    fn into_pattern(self) -> Result<Pattern>;
}

impl IntoPattern for Pattern {
    fn into_pattern(self) -> Result<Pattern> {
        Ok(self)
    }
}

impl IntoPattern for &Pattern {
    fn into_pattern(self) -> Result<Pattern> {
        Ok(self.clone())
    }
}

impl IntoPattern for &str {
    fn into_pattern(self) -> Result<Pattern> {
        Pattern::parse(self)
    }
}

impl IntoPattern for String {
    fn into_pattern(self) -> Result<Pattern> {
        Pattern::parse(&self)
    }
}

impl IntoPattern for Result<Pattern> {
    fn into_pattern(self) -> Result<Pattern> {
        self
    }
}
