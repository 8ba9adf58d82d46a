//! ---
//! rio_section: "05-provisioning"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Artifact resolution contract and local-repository resolver."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
//! The resolver contract the loader provisions services through, plus
//! the default local-repository implementation. Remote resolution lives
//! behind the same trait; the declared remote repositories are recorded
//! for provenance either way.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rio_api::ArtifactCoordinate;
use tracing::debug;
use url::Url;

/// Result alias used throughout the resolver crate.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Error type for artifact resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// The artifact could not be resolved from any consulted repository.
    #[error("artifact '{artifact}' not resolvable")]
    NotResolvable {
        /// The coordinate that failed to resolve.
        artifact: String,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Wrapper for IO errors while reading repository state.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves artifact coordinates into local library paths.
pub trait Resolver: Send + Sync {
    /// Resolve the artifact and its transitive classpath, consulting the
    /// given remote repositories as needed.
    fn resolve(&self, artifact: &ArtifactCoordinate, repositories: &[Url]) -> Result<Vec<PathBuf>>;

    /// The classpath for an already-resolved artifact.
    fn classpath_for(&self, artifact: &ArtifactCoordinate) -> Result<Vec<PathBuf>>;

    /// Drop any memoized resolution state for the given artifact keys.
    /// Called when the owning service scope unloads.
    fn release_caches(&self, artifacts: &[String]);
}

/// Resolver over a local repository laid out as
/// `<root>/<group-as-path>/<artifact>/<version>/<artifact>-<version>[-<classifier>].jar`,
/// with an optional sidecar `.classpath` file listing transitive entries
/// one path per line. Resolutions for non-snapshot artifacts are
/// memoized until released.
pub struct LocalRepositoryResolver {
    root: PathBuf,
    cache: Mutex<HashMap<String, Vec<PathBuf>>>,
}

impl LocalRepositoryResolver {
    /// Resolver rooted at the given repository directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Repository root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, artifact: &ArtifactCoordinate) -> PathBuf {
        let mut dir = self.root.clone();
        for part in artifact.group.split('.') {
            dir.push(part);
        }
        dir.push(&artifact.artifact);
        dir.push(&artifact.version);
        dir
    }

    fn artifact_file(&self, artifact: &ArtifactCoordinate) -> PathBuf {
        let file_name = match &artifact.classifier {
            Some(classifier) => {
                format!("{}-{}-{}.jar", artifact.artifact, artifact.version, classifier)
            }
            None => format!("{}-{}.jar", artifact.artifact, artifact.version),
        };
        self.artifact_dir(artifact).join(file_name)
    }

    fn resolve_from_disk(&self, artifact: &ArtifactCoordinate) -> Result<Vec<PathBuf>> {
        let primary = self.artifact_file(artifact);
        if !primary.exists() {
            return Err(ResolverError::NotResolvable {
                artifact: artifact.to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not present in {}", primary.display(), self.root.display()),
                )),
            });
        }
        let mut paths = vec![primary.clone()];
        let sidecar = primary.with_extension("classpath");
        if sidecar.exists() {
            for line in fs::read_to_string(&sidecar)?.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let entry = PathBuf::from(line);
                let entry = if entry.is_absolute() {
                    entry
                } else {
                    self.root.join(entry)
                };
                paths.push(entry);
            }
        }
        Ok(paths)
    }

    /// Install artifact content into the repository layout, returning the
    /// written path. Used by tooling and tests to seed repositories.
    pub fn install(&self, artifact: &ArtifactCoordinate, content: &[u8]) -> Result<PathBuf> {
        let path = self.artifact_file(artifact);
        fs::create_dir_all(path.parent().expect("artifact path has a parent"))?;
        fs::write(&path, content)?;
        Ok(path)
    }
}

impl Resolver for LocalRepositoryResolver {
    fn resolve(&self, artifact: &ArtifactCoordinate, repositories: &[Url]) -> Result<Vec<PathBuf>> {
        let key = artifact.key();
        if !artifact.is_snapshot() {
            if let Some(cached) = self.cache.lock().get(&key) {
                debug!(artifact = %key, "resolution served from cache");
                return Ok(cached.clone());
            }
        }
        debug!(artifact = %key, repositories = repositories.len(), "resolving artifact");
        let paths = self.resolve_from_disk(artifact)?;
        // Snapshot content is mutable; every load re-resolves it.
        if !artifact.is_snapshot() {
            self.cache.lock().insert(key, paths.clone());
        }
        Ok(paths)
    }

    fn classpath_for(&self, artifact: &ArtifactCoordinate) -> Result<Vec<PathBuf>> {
        if let Some(cached) = self.cache.lock().get(&artifact.key()) {
            return Ok(cached.clone());
        }
        self.resolve_from_disk(artifact)
    }

    fn release_caches(&self, artifacts: &[String]) {
        let mut cache = self.cache.lock();
        for key in artifacts {
            if cache.remove(key).is_some() {
                debug!(artifact = %key, "resolution cache released");
            }
        }
    }
}
