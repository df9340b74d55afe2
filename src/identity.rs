//! Asset identities (slash-delimited logical paths) and the namespace inclusion filter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AuditError, Result};

pub const DEFAULT_NAMESPACE: &str = "/Game";

/// Logical path naming one asset, e.g. `/Game/UI/WBP_Menu`.
///
/// Always absolute, never empty, and free of empty or dot-leading segments (`.`, `..`,
/// `.Hidden`) so that it maps one-to-one onto a relative file path under the audit root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetIdentity(String);

impl AssetIdentity {
    pub fn parse(raw: &str) -> Result<Self> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(AuditError::InvalidIdentity(raw.to_string()));
        };
        if rest.is_empty() || raw.contains('\\') {
            return Err(AuditError::InvalidIdentity(raw.to_string()));
        }
        let valid = rest
            .split('/')
            .all(|seg| !seg.is_empty() && !seg.starts_with('.'));
        if !valid {
            return Err(AuditError::InvalidIdentity(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[1..].split('/')
    }

    /// Last path segment (the short asset name).
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for AssetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AssetIdentity {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AssetIdentity {
    type Error = AuditError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AssetIdentity> for String {
    fn from(value: AssetIdentity) -> Self {
        value.0
    }
}

impl AsRef<str> for AssetIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Drop a trailing `.<objectName>` from the last segment: `/ns/Foo/Bar.Bar` -> `/ns/Foo/Bar`.
pub fn strip_object_suffix(raw: &str) -> &str {
    let last_slash = raw.rfind('/').map(|i| i + 1).unwrap_or(0);
    match raw[last_slash..].find('.') {
        Some(dot) => &raw[..last_slash + dot],
        None => raw,
    }
}

/// Namespace-prefix inclusion filter (`/Game` matches `/Game/...` but not `/GameData/...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    root: String,
}

impl Namespace {
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        let root = AssetIdentity::parse(trimmed)?;
        Ok(Self { root: root.0 })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn contains(&self, identity: &AssetIdentity) -> bool {
        self.relative(identity).is_some()
    }

    /// Path of `identity` below the namespace root, without a leading slash.
    pub fn relative<'a>(&self, identity: &'a AssetIdentity) -> Option<&'a str> {
        identity
            .as_str()
            .strip_prefix(self.root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }

    pub fn join(&self, relative: &str) -> Result<AssetIdentity> {
        AssetIdentity::parse(&format!("{}/{}", self.root, relative.trim_start_matches('/')))
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            root: DEFAULT_NAMESPACE.to_string(),
        }
    }
}
