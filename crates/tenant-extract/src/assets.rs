//! Asset manifest for the file transfer side channel.
//!
//! Binary content lives outside the database. After a run, the content and
//! revision ids discovered for the tenant are written to a JSON manifest
//! that an external file copier consumes.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::registry::{KeyRegistry, RegistryKey};

/// Content and revision ids owned by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    pub tenant_alias: String,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub content_ids: Vec<String>,
    pub revision_ids: Vec<String>,
}

impl AssetManifest {
    /// Collect the asset ids from a finished run's registry.
    pub fn from_registry(tenant_alias: &str, run_id: &str, registry: &KeyRegistry) -> Self {
        Self {
            tenant_alias: tenant_alias.to_string(),
            run_id: run_id.to_string(),
            generated_at: Utc::now(),
            content_ids: registry.get(RegistryKey::ContentIds).to_vec(),
            revision_ids: registry.get(RegistryKey::RevisionIds).to_vec(),
        }
    }

    /// Write the manifest as pretty JSON.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        info!(
            "Asset manifest written to {:?} ({} content, {} revisions)",
            path.as_ref(),
            self.content_ids.len(),
            self.revision_ids.len()
        );
        Ok(())
    }

    /// Read a manifest back.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
