//! Agent metadata describing an agent type.

use serde::{Deserialize, Serialize};

/// Human-readable description of an agent type.
///
/// The manifest name doubles as the agent type used to build identities and
/// the shared command queue names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentManifest {
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl AgentManifest {
    /// Starts building an [`AgentManifest`].
    #[must_use]
    pub fn builder() -> AgentManifestBuilder {
        AgentManifestBuilder {
            name: None,
            version: None,
            description: None,
        }
    }

    /// Parses a manifest from its JSON document form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ManifestFormat`] when the document is not valid
    /// JSON and [`crate::Error::InvalidManifest`] when a mandatory field is empty.
    pub fn from_json(document: &str) -> crate::Result<Self> {
        let manifest: Self = serde_json::from_str(document)?;
        Self::builder()
            .name(manifest.name)?
            .version(manifest.version)?
            .maybe_description(manifest.description)
            .build()
    }

    /// Returns the agent type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the semantic version string identifying the agent build.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Builder for [`AgentManifest`].
#[derive(Debug)]
pub struct AgentManifestBuilder {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
}

impl AgentManifestBuilder {
    /// Sets the agent type name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidManifest`] when the name is empty or
    /// contains the `@` / `#` identity separators.
    pub fn name(mut self, name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(crate::Error::InvalidManifest {
                reason: "manifest name cannot be empty".into(),
            });
        }
        if name.contains(['@', '#']) {
            return Err(crate::Error::InvalidManifest {
                reason: format!("manifest name `{name}` cannot contain `@` or `#`"),
            });
        }
        self.name = Some(name);
        Ok(self)
    }

    /// Sets the semantic version string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidManifest`] when the version string is empty.
    pub fn version(mut self, version: impl Into<String>) -> crate::Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(crate::Error::InvalidManifest {
                reason: "manifest version cannot be empty".into(),
            });
        }
        self.version = Some(version);
        Ok(self)
    }

    /// Sets an optional description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn maybe_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Consumes the builder and returns the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidManifest`] if mandatory fields are missing.
    pub fn build(self) -> crate::Result<AgentManifest> {
        let name = self.name.ok_or_else(|| crate::Error::InvalidManifest {
            reason: "manifest name must be provided".into(),
        })?;
        let version = self
            .version
            .ok_or_else(|| crate::Error::InvalidManifest {
                reason: "manifest version must be provided".into(),
            })?;

        Ok(AgentManifest {
            name,
            version,
            description: self.description,
        })
    }
}
