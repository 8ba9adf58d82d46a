//! ---
//! rio_section: "02-runtime-foundation"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Shared primitives and utilities for the Rio runtime."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Build and release metadata for the running process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub semver: String,
    pub git_sha: String,
    pub profile: String,
}

impl VersionInfo {
    /// Metadata for the currently compiled workspace version.
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            git_sha: option_env!("RIO_GIT_SHA").unwrap_or("unknown").to_owned(),
            profile: if cfg!(debug_assertions) {
                "dev".to_owned()
            } else {
                "release".to_owned()
            },
        }
    }

    /// Short rendering used in CLI banners.
    pub fn cli_string(&self) -> String {
        format!("{} ({})", self.semver, self.git_sha)
    }

    /// Multi-line rendering for `--version` output.
    pub fn extended(&self) -> String {
        format!(
            "Rio {}\ngit: {}\nprofile: {}",
            self.semver, self.git_sha, self.profile
        )
    }
}
