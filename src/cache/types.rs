//! Identifiers used by the cache component

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version tag naming one cache generation (e.g. `alcohol-tracker-v1`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of a cached request: method plus URL, compared exactly
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    /// Whether this key may hold an opportunistically cached response
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Ordered list of assets that must be precached on install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<String>);

/// Same-origin assets the tracker pages need offline
pub const DEFAULT_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/stats.html",
    "/settings.html",
    "/styles.css",
    "/app.js",
    "/stats.js",
    "/settings-page.js",
    "/config.js",
    "/manifest.json",
];

impl Manifest {
    /// Build a manifest, returning `None` when it would be empty
    ///
    /// Repeated URLs are dropped, keeping the first occurrence.
    pub fn new<I, S>(assets: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for asset in assets.into_iter().map(Into::into) {
            if !unique.contains(&asset) {
                unique.push(asset);
            }
        }
        if unique.is_empty() {
            None
        } else {
            Some(Self(unique))
        }
    }

    pub fn assets(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self(DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect())
    }
}
