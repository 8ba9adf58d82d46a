//! ---
//! rio_section: "01-service-model"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Service model types and the service bean contract."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::artifact::ArtifactCoordinate;

/// Errors raised while interpreting a component bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The bundle lists libraries but carries no codebase to join them to.
    #[error("bundle '{component}' has no codebase for its library list")]
    MissingCodebase {
        /// Component name of the offending bundle.
        component: String,
    },
    /// A library name could not be joined onto the codebase URL.
    #[error("invalid library url '{library}' under codebase {codebase}")]
    InvalidLibraryUrl {
        /// The library file name.
        library: String,
        /// The codebase it was joined against.
        codebase: Url,
        /// Parse failure cause.
        #[source]
        source: url::ParseError,
    },
}

/// Description of a loadable component: its name, the codebase and library
/// archives needed to load it, and an optional artifact coordinate used for
/// repository resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentBundle {
    /// Registered component name resolved through the component registry.
    pub component: String,
    /// Base URL the library names are relative to.
    #[serde(default)]
    pub codebase: Option<Url>,
    /// Library archive file names, relative to the codebase.
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Optional artifact coordinate; when present, resolution goes through
    /// the resolver instead of the static library list.
    #[serde(default)]
    pub artifact: Option<ArtifactCoordinate>,
    /// Initialization parameters handed to the component factory.
    #[serde(default)]
    pub init_parameters: IndexMap<String, serde_json::Value>,
}

impl ComponentBundle {
    /// A bundle identified purely by its artifact coordinate.
    pub fn for_artifact(component: impl Into<String>, artifact: ArtifactCoordinate) -> Self {
        Self {
            component: component.into(),
            codebase: None,
            libraries: Vec::new(),
            artifact: Some(artifact),
            init_parameters: IndexMap::new(),
        }
    }

    /// A bundle identified by a codebase and an explicit library list.
    pub fn for_libraries(
        component: impl Into<String>,
        codebase: Url,
        libraries: Vec<String>,
    ) -> Self {
        Self {
            component: component.into(),
            codebase: Some(codebase),
            libraries,
            artifact: None,
            init_parameters: IndexMap::new(),
        }
    }

    /// Absolute URLs for the bundled libraries, joined onto the codebase.
    pub fn library_urls(&self) -> Result<Vec<Url>, BundleError> {
        if self.libraries.is_empty() {
            return Ok(Vec::new());
        }
        let codebase = self
            .codebase
            .as_ref()
            .ok_or_else(|| BundleError::MissingCodebase {
                component: self.component.clone(),
            })?;
        self.libraries
            .iter()
            .map(|library| {
                codebase
                    .join(library)
                    .map_err(|source| BundleError::InvalidLibraryUrl {
                        library: library.clone(),
                        codebase: codebase.clone(),
                        source,
                    })
            })
            .collect()
    }
}

/// Bundles compare by component name plus artifact when an artifact is
/// declared, otherwise by component name plus library list.
impl PartialEq for ComponentBundle {
    fn eq(&self, other: &Self) -> bool {
        if self.component != other.component {
            return false;
        }
        match (&self.artifact, &other.artifact) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.libraries == other.libraries,
            _ => false,
        }
    }
}

impl Eq for ComponentBundle {}
