//! ---
//! rio_section: "03-platform-capability"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Platform and measurable capability model."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use crate::{PlatformError, Result};

/// Software staged for download when a capability is provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedSoftware {
    /// Where the software is downloaded from. `http(s)` and `file`
    /// schemes are supported.
    pub location: Url,
    /// Expected sha256 of the downloaded content, when declared.
    #[serde(default)]
    pub sha256: Option<String>,
    /// Whether the installed path contributes to the capability classpath.
    #[serde(default)]
    pub use_as_classpath: bool,
    /// Transient software is removed on capability removal and its
    /// capability is never persisted for rediscovery at next boot.
    #[serde(default)]
    pub remove_on_destroy: bool,
}

/// Record of a completed staged-software download. Persisted alongside
/// the owning capability and consumed on removal for cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Source the content was fetched from.
    pub source: Url,
    /// Installed path on disk.
    pub path: PathBuf,
    /// Size in bytes of the installed file.
    pub size: u64,
    /// Computed sha256 of the installed content.
    pub sha256: String,
    /// Completion timestamp.
    pub downloaded_at: DateTime<Utc>,
}

impl DownloadRecord {
    /// Best-effort removal of the downloaded file. Failures are logged,
    /// never propagated; cleanup continues regardless.
    pub fn clean(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed downloaded artifact"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove downloaded artifact");
            }
        }
    }
}

/// Downloads staged software into the provision root, one subdirectory
/// per capability, verifying checksums when declared.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    provision_root: PathBuf,
}

impl DownloadManager {
    /// Manager rooted at the node's provision directory.
    pub fn new(provision_root: impl Into<PathBuf>) -> Self {
        Self {
            provision_root: provision_root.into(),
        }
    }

    /// The provision root downloads are installed under.
    pub fn provision_root(&self) -> &Path {
        &self.provision_root
    }

    /// Fetch the staged software for `capability_name`, returning the
    /// completed download record.
    pub async fn download(
        &self,
        capability_name: &str,
        staged: &StagedSoftware,
    ) -> Result<DownloadRecord> {
        let install_dir = self.provision_root.join(sanitize(capability_name));
        fs::create_dir_all(&install_dir)?;
        let file_name = staged
            .location
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|name| !name.is_empty())
            .unwrap_or("download.bin")
            .to_owned();
        let target = install_dir.join(&file_name);

        let bytes = match staged.location.scheme() {
            "http" | "https" => fetch_remote(&staged.location).await?,
            "file" => {
                let source = staged.location.to_file_path().map_err(|_| {
                    PlatformError::UnsupportedScheme {
                        scheme: "file".into(),
                        url: staged.location.clone(),
                    }
                })?;
                fs::read(source)?
            }
            other => {
                return Err(PlatformError::UnsupportedScheme {
                    scheme: other.to_owned(),
                    url: staged.location.clone(),
                })
            }
        };

        let actual = hex::encode(Sha256::digest(&bytes));
        if let Some(expected) = &staged.sha256 {
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(PlatformError::ChecksumMismatch {
                    path: target,
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        fs::write(&target, &bytes)?;
        info!(
            capability = capability_name,
            source = %staged.location,
            path = %target.display(),
            size = bytes.len(),
            "staged software installed"
        );
        Ok(DownloadRecord {
            source: staged.location.clone(),
            path: target,
            size: bytes.len() as u64,
            sha256: actual,
            downloaded_at: Utc::now(),
        })
    }
}

async fn fetch_remote(url: &Url) -> Result<Vec<u8>> {
    let response = reqwest::get(url.clone())
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|source| PlatformError::Download {
            url: url.clone(),
            source,
        })?;
    let bytes = response
        .bytes()
        .await
        .map_err(|source| PlatformError::Download {
            url: url.clone(),
            source,
        })?;
    Ok(bytes.to_vec())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
