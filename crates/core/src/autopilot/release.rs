//! Release tag versioning.

use std::cmp::Ordering;
use std::fmt;

use once_cell::sync::Lazy;
use regex_lite::Regex;

static CONVENTIONAL_SUBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)(\(.+\))?(!)?:\s*(.+)").unwrap());

/// How far a release moves the version, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bump {
    /// Nothing worth releasing (docs, chores, unconventional messages).
    None,
    Patch,
    Minor,
    Major,
}

/// A `major.minor.patch` version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    /// Parse a tag like `v1.2.3`. Pre-release and build suffixes are ignored.
    pub fn parse_tag(tag: &str, prefix: &str) -> Option<Self> {
        let version = tag.strip_prefix(prefix)?;
        let core = version.split(['-', '+']).next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    /// Apply a bump; lower components reset to zero.
    pub fn bump(self, bump: Bump) -> Self {
        match bump {
            Bump::None => self,
            Bump::Patch => Self {
                patch: self.patch + 1,
                ..self
            },
            Bump::Minor => Self {
                minor: self.minor + 1,
                patch: 0,
                ..self
            },
            Bump::Major => Self {
                major: self.major + 1,
                minor: 0,
                patch: 0,
            },
        }
    }

    pub fn to_tag(self, prefix: &str) -> String {
        format!("{}{}", prefix, self)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

/// Bump implied by one commit message.
///
/// Only the subject line counts, plus a `BREAKING CHANGE:` footer anywhere
/// in the body.
pub fn bump_for_message(message: &str) -> Bump {
    if message
        .lines()
        .skip(1)
        .any(|l| l.starts_with("BREAKING CHANGE:") || l.starts_with("BREAKING-CHANGE:"))
    {
        return Bump::Major;
    }

    let subject = message.lines().next().unwrap_or("").trim();
    let Some(caps) = CONVENTIONAL_SUBJECT.captures(subject) else {
        return Bump::None;
    };
    let kind = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    if caps.get(3).is_some() || kind.to_ascii_uppercase().starts_with("BREAKING") {
        return Bump::Major;
    }
    match kind.to_ascii_lowercase().as_str() {
        "feat" | "feature" => Bump::Minor,
        "fix" | "bugfix" | "perf" => Bump::Patch,
        _ => Bump::None,
    }
}

/// Largest bump across all messages.
pub fn detect_bump<'a>(messages: impl IntoIterator<Item = &'a str>) -> Bump {
    messages
        .into_iter()
        .map(bump_for_message)
        .max()
        .unwrap_or(Bump::None)
}

/// Highest semver tag among `tags`, ignoring anything that doesn't parse.
pub fn highest_tag<'a>(tags: impl IntoIterator<Item = &'a str>, prefix: &str) -> Option<String> {
    tags.into_iter()
        .filter_map(|t| SemVer::parse_tag(t, prefix).map(|v| (v, t)))
        .max_by_key(|(v, _)| *v)
        .map(|(_, t)| t.to_string())
}

/// Tag for the release after `latest`, counting from `0.0.0` when there is
/// no parseable previous tag. `None` when the bump is [`Bump::None`].
pub fn next_tag(latest: Option<&str>, prefix: &str, bump: Bump) -> Option<String> {
    if bump == Bump::None {
        return None;
    }
    let base = latest
        .and_then(|t| SemVer::parse_tag(t, prefix))
        .unwrap_or_default();
    Some(base.bump(bump).to_tag(prefix))
}
