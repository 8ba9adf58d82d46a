//! ---
//! rio_section: "05-provisioning"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service bean loading, provisioning cache, and isolation scopes."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// The process-wide parent scope every service scope layers on. Holds
/// the shared search path all services see.
#[derive(Debug)]
pub struct CommonScope {
    name: String,
    search_path: Vec<Url>,
}

impl CommonScope {
    /// Common scope with the given shared search path.
    pub fn new(search_path: Vec<Url>) -> Self {
        Self {
            name: "rio-common".to_owned(),
            search_path,
        }
    }

    /// Scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared search path.
    pub fn search_path(&self) -> &[Url] {
        &self.search_path
    }
}

/// An isolated dependency scope for one service instance: its own search
/// path layered on the common scope, annotated with the export URLs
/// remote clients use to reconstruct a proxy download codebase.
/// Exclusively owned by the service instance and released on unload.
#[derive(Debug)]
pub struct ServiceScope {
    id: Uuid,
    name: String,
    parent: Arc<CommonScope>,
    search_path: Vec<Url>,
    export_annotations: Vec<Url>,
}

impl ServiceScope {
    /// Scope for the named service over the given search path.
    pub fn new(
        name: impl Into<String>,
        parent: Arc<CommonScope>,
        search_path: Vec<Url>,
        export_annotations: Vec<Url>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parent,
            search_path,
            export_annotations,
        }
    }

    /// Unique scope identifier, used as the policy-registry key.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Service name the scope belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parent common scope.
    pub fn parent(&self) -> &Arc<CommonScope> {
        &self.parent
    }

    /// This scope's own search path.
    pub fn search_path(&self) -> &[Url] {
        &self.search_path
    }

    /// Export annotations for proxy download.
    pub fn export_annotations(&self) -> &[Url] {
        &self.export_annotations
    }

    /// Parent search path followed by this scope's own entries.
    pub fn effective_search_path(&self) -> Vec<Url> {
        let mut path = self.parent.search_path().to_vec();
        for url in &self.search_path {
            if !path.contains(url) {
                path.push(url.clone());
            }
        }
        path
    }
}

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<Arc<ServiceScope>>> = const { RefCell::new(None) };
}

/// The scope currently installed on this thread, if any.
pub fn current_scope() -> Option<Arc<ServiceScope>> {
    CURRENT_SCOPE.with(|current| current.borrow().clone())
}

/// RAII guard that installs a scope as the thread's current scope for
/// the duration of service construction. The previous scope is restored
/// on drop, on every exit path including failures.
#[derive(Debug)]
pub struct ScopeGuard {
    previous: Option<Arc<ServiceScope>>,
}

impl ScopeGuard {
    /// Install `scope` as the thread's current scope.
    pub fn enter(scope: Arc<ServiceScope>) -> Self {
        let previous = CURRENT_SCOPE.with(|current| current.borrow_mut().replace(scope));
        Self { previous }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_SCOPE.with(|current| {
            *current.borrow_mut() = previous;
        });
    }
}

/// Grants shared by every service in the process.
#[derive(Debug, Default)]
pub struct GlobalPolicy {
    grants: Vec<String>,
}

impl GlobalPolicy {
    /// Global policy with the given grants.
    pub fn new(grants: Vec<String>) -> Self {
        Self { grants }
    }

    /// The global grants.
    pub fn grants(&self) -> &[String] {
        &self.grants
    }
}

/// Per-scope policy: service-specific grants layered over the global
/// policy.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    service_grants: Vec<String>,
    global: Arc<GlobalPolicy>,
}

impl ScopePolicy {
    /// Load service grants from a policy file, one grant per line;
    /// blank lines and `#` comments are skipped.
    pub fn load(path: &Path, global: Arc<GlobalPolicy>) -> std::io::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let service_grants = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_owned)
            .collect();
        Ok(Self {
            service_grants,
            global,
        })
    }

    /// Policy with explicit grants, used by tests and embedders.
    pub fn with_grants(service_grants: Vec<String>, global: Arc<GlobalPolicy>) -> Self {
        Self {
            service_grants,
            global,
        }
    }

    /// Service grants followed by the inherited global grants.
    pub fn effective_grants(&self) -> Vec<String> {
        let mut grants = self.service_grants.clone();
        grants.extend(self.global.grants().iter().cloned());
        grants
    }
}

/// Maps each live service scope to its split policy. Entries are always
/// removed on unload, before the scope becomes unreachable, so the map
/// cannot grow without bound.
#[derive(Debug)]
pub struct PolicyRegistry {
    global: Arc<GlobalPolicy>,
    entries: Mutex<HashMap<Uuid, ScopePolicy>>,
}

impl PolicyRegistry {
    /// Registry over the given global policy.
    pub fn new(global: GlobalPolicy) -> Self {
        Self {
            global: Arc::new(global),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The inherited global policy.
    pub fn global(&self) -> Arc<GlobalPolicy> {
        self.global.clone()
    }

    /// Install the policy for a scope.
    pub fn install(&self, scope_id: Uuid, policy: ScopePolicy) {
        debug!(%scope_id, "scope policy installed");
        self.entries.lock().insert(scope_id, policy);
    }

    /// Remove the policy for a scope. Returns whether an entry existed.
    pub fn remove(&self, scope_id: Uuid) -> bool {
        let removed = self.entries.lock().remove(&scope_id).is_some();
        if removed {
            debug!(%scope_id, "scope policy removed");
        }
        removed
    }

    /// Whether a policy is installed for the scope.
    pub fn contains(&self, scope_id: Uuid) -> bool {
        self.entries.lock().contains_key(&scope_id)
    }

    /// The policy for a scope, if installed.
    pub fn policy_for(&self, scope_id: Uuid) -> Option<ScopePolicy> {
        self.entries.lock().get(&scope_id).cloned()
    }

    /// Number of installed entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entries are installed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Helper converting a filesystem path to a `file://` URL.
pub(crate) fn path_to_url(path: &Path) -> Option<Url> {
    let absolute: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    Url::from_file_path(absolute).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(common: &Arc<CommonScope>, jar: &str) -> Arc<ServiceScope> {
        Arc::new(ServiceScope::new(
            "svc",
            common.clone(),
            vec![Url::parse(jar).unwrap()],
            Vec::new(),
        ))
    }

    #[test]
    fn guard_restores_previous_scope_on_drop() {
        let common = Arc::new(CommonScope::new(Vec::new()));
        let outer = scope(&common, "file:///outer.jar");
        let inner = scope(&common, "file:///inner.jar");

        let _outer_guard = ScopeGuard::enter(outer.clone());
        assert_eq!(current_scope().unwrap().id(), outer.id());
        {
            let _inner_guard = ScopeGuard::enter(inner.clone());
            assert_eq!(current_scope().unwrap().id(), inner.id());
        }
        assert_eq!(current_scope().unwrap().id(), outer.id());
    }

    #[test]
    fn guard_restores_on_unwind() {
        let common = Arc::new(CommonScope::new(Vec::new()));
        let installed = scope(&common, "file:///svc.jar");
        let result = std::panic::catch_unwind(|| {
            let _guard = ScopeGuard::enter(installed);
            panic!("construction failure");
        });
        assert!(result.is_err());
        assert!(current_scope().is_none());
    }

    #[test]
    fn effective_search_path_layers_parent_first() {
        let shared = Url::parse("file:///common.jar").unwrap();
        let own = Url::parse("file:///svc.jar").unwrap();
        let common = Arc::new(CommonScope::new(vec![shared.clone()]));
        let service = ServiceScope::new(
            "svc",
            common,
            vec![own.clone(), shared.clone()],
            Vec::new(),
        );
        assert_eq!(service.effective_search_path(), vec![shared, own]);
    }

    #[test]
    fn policy_registry_install_and_remove() {
        let registry = PolicyRegistry::new(GlobalPolicy::new(vec!["read:/tmp".into()]));
        let scope_id = Uuid::new_v4();
        let policy = ScopePolicy::with_grants(vec!["net:7001".into()], registry.global());
        registry.install(scope_id, policy);

        assert!(registry.contains(scope_id));
        let effective = registry.policy_for(scope_id).unwrap().effective_grants();
        assert_eq!(effective, vec!["net:7001".to_owned(), "read:/tmp".to_owned()]);

        assert!(registry.remove(scope_id));
        assert!(!registry.remove(scope_id));
        assert!(registry.is_empty());
    }

    #[test]
    fn policy_file_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.policy");
        fs::write(&path, "# service grants\nnet:7001\n\nread:/var/rio\n").unwrap();
        let policy =
            ScopePolicy::load(&path, Arc::new(GlobalPolicy::default())).unwrap();
        assert_eq!(
            policy.effective_grants(),
            vec!["net:7001".to_owned(), "read:/var/rio".to_owned()]
        );
    }
}
