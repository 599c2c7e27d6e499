//! Path pattern matching.
//!
//! # Responsibilities
//! - Parse gateway path patterns (`/v1/users/{id}`, `/static/{*path}`, `*`)
//! - Match request paths segment by segment and capture parameters
//!
//! # Design Decisions
//! - Matching is case-sensitive and structural; no regex
//! - `{*name}` captures the rest of the path and must be the last segment
//! - `*` on its own matches every path

use std::fmt;

/// Error raised for malformed patterns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("pattern `{0}` must start with `/` or be `*`")]
    MissingLeadingSlash(String),
    #[error("pattern `{pattern}` has an invalid segment `{segment}`")]
    InvalidSegment { pattern: String, segment: String },
    #[error("pattern `{0}` has a catch-all that is not the last segment")]
    CatchAllNotLast(String),
    #[error("pattern `{pattern}` captures `{name}` more than once")]
    DuplicateParam { pattern: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    /// `None` for the match-everything pattern `*`.
    segments: Option<Vec<Segment>>,
}

/// Parameters captured by a successful match, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        if pattern == "*" {
            return Ok(Self {
                source: pattern.to_owned(),
                segments: None,
            });
        }
        let rest = pattern
            .strip_prefix('/')
            .ok_or_else(|| RouteError::MissingLeadingSlash(pattern.to_owned()))?;

        let raw: Vec<&str> = if rest.is_empty() { Vec::new() } else { rest.split('/').collect() };
        let mut segments = Vec::with_capacity(raw.len());
        let mut names: Vec<&str> = Vec::new();

        for (i, segment) in raw.iter().enumerate() {
            let parsed = match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(inner) => {
                    let (name, catch_all) = match inner.strip_prefix('*') {
                        Some(name) => (name, true),
                        None => (inner, false),
                    };
                    if name.is_empty() || name.contains(['{', '}', '*']) {
                        return Err(RouteError::InvalidSegment {
                            pattern: pattern.to_owned(),
                            segment: (*segment).to_owned(),
                        });
                    }
                    if names.contains(&name) {
                        return Err(RouteError::DuplicateParam {
                            pattern: pattern.to_owned(),
                            name: name.to_owned(),
                        });
                    }
                    names.push(name);
                    if catch_all {
                        if i + 1 != raw.len() {
                            return Err(RouteError::CatchAllNotLast(pattern.to_owned()));
                        }
                        Segment::CatchAll(name.to_owned())
                    } else {
                        Segment::Param(name.to_owned())
                    }
                }
                None if segment.contains(['{', '}']) => {
                    return Err(RouteError::InvalidSegment {
                        pattern: pattern.to_owned(),
                        segment: (*segment).to_owned(),
                    });
                }
                None => Segment::Literal((*segment).to_owned()),
            };
            segments.push(parsed);
        }

        Ok(Self {
            source: pattern.to_owned(),
            segments: Some(segments),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a request path, returning the captured parameters.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let Some(segments) = &self.segments else {
            return Some(PathParams::default());
        };
        let mut rest = path.strip_prefix('/')?;
        let mut params = Vec::new();

        for segment in segments {
            match segment {
                Segment::CatchAll(name) => {
                    params.push((name.clone(), rest.to_owned()));
                    return Some(PathParams(params));
                }
                Segment::Literal(_) | Segment::Param(_) => {
                    let (head, tail) = match rest.find('/') {
                        Some(i) => (&rest[..i], &rest[i + 1..]),
                        None => (rest, ""),
                    };
                    if head.is_empty() {
                        return None;
                    }
                    match segment {
                        Segment::Literal(literal) if literal != head => return None,
                        Segment::Param(name) => params.push((name.clone(), head.to_owned())),
                        _ => {}
                    }
                    rest = tail;
                }
            }
        }

        rest.is_empty().then_some(PathParams(params))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
