// src/version/mod.rs

//! Version ordering and constraint satisfaction
//!
//! Upstream projects rarely follow semver strictly (`2.66.0`, `1.16`,
//! `0.54.2`, compiler versions like `14` or `19.29`), so versions are
//! compared segment by segment: numeric segments numerically, anything else
//! lexically, with missing trailing segments treated as zero.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A dotted version string with total ordering
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Number(u64),
    Text(String),
}

impl Version {
    /// Parse a version such as `1.16.0`, `2.66` or `1.0rc1`
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(Error::ParseError("Empty version string".to_string()));
        }
        if raw.chars().any(|c| c.is_whitespace()) {
            return Err(Error::ParseError(format!("Invalid version '{}'", raw)));
        }

        let mut segments = Vec::new();
        for part in raw.split(['.', '-', '_', '+']) {
            if part.is_empty() {
                return Err(Error::ParseError(format!(
                    "Empty version component in '{}'",
                    raw
                )));
            }
            // Split runs of digits from runs of letters: "0rc1" -> 0, rc, 1
            let mut current = String::new();
            let mut numeric = None;
            for c in part.chars() {
                let is_digit = c.is_ascii_digit();
                if numeric.is_some_and(|n| n != is_digit) {
                    segments.push(Segment::from_run(&current));
                    current.clear();
                }
                numeric = Some(is_digit);
                current.push(c);
            }
            segments.push(Segment::from_run(&current));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Build a purely numeric version such as `14` or `19.29`
    pub fn from_numbers(parts: &[u64]) -> Self {
        let raw = parts
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(".");
        Self {
            raw,
            segments: parts.iter().map(|&n| Segment::Number(n)).collect(),
        }
    }

    /// The version as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn trimmed(&self) -> &[Segment] {
        let mut end = self.segments.len();
        while end > 0 && self.segments[end - 1] == Segment::Number(0) {
            end -= 1;
        }
        &self.segments[..end]
    }
}

impl Segment {
    fn from_run(run: &str) -> Self {
        match run.parse::<u64>() {
            Ok(n) => Segment::Number(n),
            Err(_) => Segment::Text(run.to_string()),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let zero = Segment::Number(0);
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).unwrap_or(&zero);
            let b = other.segments.get(i).unwrap_or(&zero);
            // A pre-release tag sorts before the release it precedes: 1.0rc1 < 1.0
            let ord = match (a, b) {
                (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
                (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
                _ => a.cmp(b),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.trimmed().hash(state);
    }
}

impl std::hash::Hash for Segment {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Segment::Number(n) => n.hash(state),
            Segment::Text(t) => t.hash(state),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    /// Exact version match
    Exact(Version),
    GreaterThan(Version),
    GreaterOrEqual(Version),
    LessThan(Version),
    LessOrEqual(Version),
    NotEqual(Version),
    /// All constraints must hold (`>= 1.0, < 2.0`)
    All(Vec<VersionConstraint>),
}

impl VersionConstraint {
    /// Parse a constraint string
    ///
    /// Examples:
    /// - `>= 2.66.0` → GreaterOrEqual(2.66.0)
    /// - `< 2.0` → LessThan(2.0)
    /// - `1.16.0` or `= 1.16.0` → Exact(1.16.0)
    /// - `>= 1.0, < 2.0` → All([...])
    /// - `*` or empty → Any
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if s.contains(',') {
            let parts = s
                .split(',')
                .map(Self::parse)
                .collect::<Result<Vec<_>>>()?;
            return Ok(VersionConstraint::All(parts));
        }

        let (ctor, rest): (fn(Version) -> Self, &str) = if let Some(rest) = s.strip_prefix(">=") {
            (VersionConstraint::GreaterOrEqual, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (VersionConstraint::LessOrEqual, rest)
        } else if let Some(rest) = s.strip_prefix("!=") {
            (VersionConstraint::NotEqual, rest)
        } else if let Some(rest) = s.strip_prefix("==") {
            (VersionConstraint::Exact, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (VersionConstraint::GreaterThan, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (VersionConstraint::LessThan, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (VersionConstraint::Exact, rest)
        } else {
            (VersionConstraint::Exact, s)
        };

        Ok(ctor(Version::parse(rest)?))
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
            VersionConstraint::NotEqual(v) => version != v,
            VersionConstraint::All(parts) => parts.iter().all(|c| c.satisfies(version)),
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "= {}", v),
            VersionConstraint::GreaterThan(v) => write!(f, "> {}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">= {}", v),
            VersionConstraint::LessThan(v) => write!(f, "< {}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<= {}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!= {}", v),
            VersionConstraint::All(parts) => {
                let parts: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(v("1.16.0") > v("1.9.9"));
        assert!(v("2.66.0") > v("2.6.10"));
        assert!(v("14") > v("12"));
        assert!(v("19.29") > v("19.3"));
    }

    #[test]
    fn test_trailing_zeros_are_equal() {
        assert_eq!(v("1.16"), v("1.16.0"));
        assert_eq!(v("1.16").cmp(&v("1.16.0.0")), Ordering::Equal);
        // Display keeps the original spelling
        assert_eq!(v("1.16").to_string(), "1.16");
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        assert!(v("1.0rc1") < v("1.0"));
        assert!(v("1.0rc1") < v("1.0rc2"));
        assert!(v("1.0rc2") < v("1.0.1"));
    }

    #[test]
    fn test_from_numbers() {
        assert_eq!(Version::from_numbers(&[19, 29]), v("19.29"));
        assert_eq!(Version::from_numbers(&[14]).to_string(), "14");
    }

    #[test]
    fn test_parse_errors() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.0 beta").is_err());
    }

    #[test]
    fn test_constraint_parse_and_satisfy() {
        let c = VersionConstraint::parse(">= 2.66.0").unwrap();
        assert!(c.satisfies(&v("2.66.0")));
        assert!(c.satisfies(&v("2.70")));
        assert!(!c.satisfies(&v("2.64.6")));

        let c = VersionConstraint::parse("< 2.0").unwrap();
        assert!(c.satisfies(&v("1.99")));
        assert!(!c.satisfies(&v("2.0.0")));

        let c = VersionConstraint::parse("1.16.0").unwrap();
        assert_eq!(c, VersionConstraint::Exact(v("1.16.0")));

        let c = VersionConstraint::parse("!= 1.2").unwrap();
        assert!(!c.satisfies(&v("1.2.0")));
    }

    #[test]
    fn test_constraint_all() {
        let c = VersionConstraint::parse(">= 1.0, < 2.0").unwrap();
        assert!(c.satisfies(&v("1.5")));
        assert!(!c.satisfies(&v("2.0")));
        assert!(!c.satisfies(&v("0.9")));
        assert_eq!(c.to_string(), ">= 1.0, < 2.0");
    }

    #[test]
    fn test_constraint_any() {
        assert_eq!(VersionConstraint::parse("*").unwrap(), VersionConstraint::Any);
        assert_eq!(VersionConstraint::parse("").unwrap(), VersionConstraint::Any);
        assert!(VersionConstraint::Any.satisfies(&v("99.99")));
    }

    #[test]
    fn test_serde_roundtrip_keeps_spelling() {
        let json = serde_json::to_string(&v("2.66")).unwrap();
        assert_eq!(json, "\"2.66\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "2.66");
    }
}
