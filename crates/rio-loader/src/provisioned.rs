//! ---
//! rio_section: "05-provisioning"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean loading, provisioning cache, and isolation scopes."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rio_api::ArtifactCoordinate;
use tracing::debug;
use url::Url;

/// Resolved resources for one artifact (or one static bundle): the jar
/// URLs produced by resolution and an accumulating string of the
/// repositories consulted. Created on first resolution, shared by
/// reference across every service load that references the same key,
/// destroyed when its reference count drops to zero.
///
/// Snapshot-versioned artifacts are never cached or reference counted;
/// their instances live only as long as the load that produced them.
#[derive(Debug)]
pub struct ProvisionedResources {
    key: String,
    artifact: Option<ArtifactCoordinate>,
    jars: Vec<Url>,
    repositories: Mutex<String>,
}

impl ProvisionedResources {
    /// Resources under the given cache key.
    pub fn new(key: impl Into<String>, artifact: Option<ArtifactCoordinate>, jars: Vec<Url>) -> Self {
        Self {
            key: key.into(),
            artifact,
            jars,
            repositories: Mutex::new(String::new()),
        }
    }

    /// The cache key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The artifact these resources were resolved from, when any.
    pub fn artifact(&self) -> Option<&ArtifactCoordinate> {
        self.artifact.as_ref()
    }

    /// The resolved jar URLs.
    pub fn jars(&self) -> &[Url] {
        &self.jars
    }

    /// Record repositories consulted by a load; duplicates are skipped.
    pub fn add_repositories(&self, repositories: &[Url]) {
        let mut accumulated = self.repositories.lock();
        for repository in repositories {
            let rendered = repository.as_str();
            if accumulated.split(' ').any(|existing| existing == rendered) {
                continue;
            }
            if !accumulated.is_empty() {
                accumulated.push(' ');
            }
            accumulated.push_str(rendered);
        }
    }

    /// The accumulated repository string.
    pub fn repositories(&self) -> String {
        self.repositories.lock().clone()
    }
}

/// The process-wide provisioning cache plus its reference-count table.
/// Always accessed under the loader context's single coarse lock: the
/// whole resolve-or-reuse sequence, including resolution I/O, runs as
/// one critical section so the same fresh artifact is never resolved
/// twice concurrently.
#[derive(Debug, Default)]
pub struct ProvisionState {
    resources: HashMap<String, Arc<ProvisionedResources>>,
    counters: HashMap<String, usize>,
}

impl ProvisionState {
    /// Cached resources under the key, if present.
    pub fn get(&self, key: &str) -> Option<Arc<ProvisionedResources>> {
        self.resources.get(key).cloned()
    }

    /// Register freshly resolved resources with a count of one.
    pub fn register(&mut self, resources: Arc<ProvisionedResources>) {
        let key = resources.key().to_owned();
        self.resources.insert(key.clone(), resources);
        *self.counters.entry(key).or_insert(0) += 1;
    }

    /// Record one more user of an already cached entry.
    pub fn increment(&mut self, key: &str) {
        *self.counters.entry(key.to_owned()).or_insert(0) += 1;
    }

    /// Drop one user of the entry; evicts the cached resources when the
    /// count reaches zero. Returns whether the entry was evicted.
    pub fn decrement(&mut self, key: &str) -> bool {
        let Some(count) = self.counters.get_mut(key) else {
            debug!(key, "decrement for unknown provisioning key");
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.counters.remove(key);
            self.resources.remove(key);
            debug!(key, "provisioned resources evicted");
            true
        } else {
            false
        }
    }

    /// Current reference count for a key.
    pub fn count(&self, key: &str) -> usize {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Drop all cached state.
    pub fn clear(&mut self) {
        self.resources.clear();
        self.counters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(key: &str) -> Arc<ProvisionedResources> {
        Arc::new(ProvisionedResources::new(key, None, Vec::new()))
    }

    #[test]
    fn register_then_increment_counts_users() {
        let mut state = ProvisionState::default();
        state.register(resources("com.x:svc:1.0"));
        state.increment("com.x:svc:1.0");
        assert_eq!(state.count("com.x:svc:1.0"), 2);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn eviction_only_at_zero() {
        let mut state = ProvisionState::default();
        state.register(resources("com.x:svc:1.0"));
        state.increment("com.x:svc:1.0");

        assert!(!state.decrement("com.x:svc:1.0"));
        assert!(state.get("com.x:svc:1.0").is_some());
        assert!(state.decrement("com.x:svc:1.0"));
        assert!(state.get("com.x:svc:1.0").is_none());
        assert_eq!(state.count("com.x:svc:1.0"), 0);
    }

    #[test]
    fn repository_accumulation_skips_duplicates() {
        let entry = resources("com.x:svc:1.0");
        let repo_a = Url::parse("http://repo-a.invalid/m2").unwrap();
        let repo_b = Url::parse("http://repo-b.invalid/m2").unwrap();
        entry.add_repositories(&[repo_a.clone()]);
        entry.add_repositories(&[repo_a, repo_b]);
        assert_eq!(
            entry.repositories(),
            "http://repo-a.invalid/m2 http://repo-b.invalid/m2"
        );
    }
}
