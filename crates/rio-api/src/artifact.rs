//! ---
//! rio_section: "01-service-model"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service model types and the service bean contract."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised when an artifact coordinate cannot be parsed.
#[derive(Debug, Error)]
#[error("malformed artifact coordinate '{input}': expected group:artifact:version[:classifier]")]
pub struct MalformedCoordinate {
    /// The rejected input string.
    pub input: String,
}

/// A `group:artifact:version[:classifier]` coordinate identifying a
/// resolvable artifact in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactCoordinate {
    /// Group identifier, dot separated.
    pub group: String,
    /// Artifact identifier.
    pub artifact: String,
    /// Version string; may carry a `SNAPSHOT` qualifier.
    pub version: String,
    /// Optional classifier (e.g. `dl` for a download-only artifact).
    pub classifier: Option<String>,
}

impl ArtifactCoordinate {
    /// The framework's own API artifact at the running workspace version.
    /// Used as the default export artifact when an element declares an
    /// implementation artifact but no explicit export artifact.
    pub fn rio_api() -> Self {
        Self {
            group: "org.rio".to_owned(),
            artifact: "rio-api".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            classifier: None,
        }
    }

    /// Whether the version denotes mutable snapshot content.
    /// Snapshot artifacts are never cached or reference counted.
    pub fn is_snapshot(&self) -> bool {
        self.version.contains("SNAPSHOT")
    }

    /// Canonical string form, used as the provisioning cache key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.classifier {
            Some(classifier) => write!(
                f,
                "{}:{}:{}:{}",
                self.group, self.artifact, self.version, classifier
            ),
            None => write!(f, "{}:{}:{}", self.group, self.artifact, self.version),
        }
    }
}

impl FromStr for ArtifactCoordinate {
    type Err = MalformedCoordinate;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = input.split(':').collect();
        let malformed = || MalformedCoordinate {
            input: input.to_owned(),
        };
        if parts.len() < 3 || parts.len() > 4 || parts.iter().any(|part| part.is_empty()) {
            return Err(malformed());
        }
        Ok(Self {
            group: parts[0].to_owned(),
            artifact: parts[1].to_owned(),
            version: parts[2].to_owned(),
            classifier: parts.get(3).map(|s| (*s).to_owned()),
        })
    }
}

impl TryFrom<String> for ArtifactCoordinate {
    type Error = MalformedCoordinate;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArtifactCoordinate> for String {
    fn from(value: ArtifactCoordinate) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_coordinate() {
        let coordinate: ArtifactCoordinate = "com.x:svc:1.0".parse().unwrap();
        assert_eq!(coordinate.group, "com.x");
        assert_eq!(coordinate.artifact, "svc");
        assert_eq!(coordinate.version, "1.0");
        assert!(coordinate.classifier.is_none());
        assert!(!coordinate.is_snapshot());
    }

    #[test]
    fn parses_classifier() {
        let coordinate: ArtifactCoordinate = "com.x:svc:1.0:dl".parse().unwrap();
        assert_eq!(coordinate.classifier.as_deref(), Some("dl"));
        assert_eq!(coordinate.to_string(), "com.x:svc:1.0:dl");
    }

    #[test]
    fn snapshot_detection() {
        let coordinate: ArtifactCoordinate = "com.x:svc:2.1-SNAPSHOT".parse().unwrap();
        assert!(coordinate.is_snapshot());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("com.x:svc".parse::<ArtifactCoordinate>().is_err());
        assert!("com.x::1.0".parse::<ArtifactCoordinate>().is_err());
        assert!("a:b:c:d:e".parse::<ArtifactCoordinate>().is_err());
    }

    #[test]
    fn framework_api_artifact_tracks_workspace_version() {
        let coordinate = ArtifactCoordinate::rio_api();
        assert_eq!(coordinate.group, "org.rio");
        assert_eq!(coordinate.artifact, "rio-api");
        assert_eq!(coordinate.version, env!("CARGO_PKG_VERSION"));
    }
}
