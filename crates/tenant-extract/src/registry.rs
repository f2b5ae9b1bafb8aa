//! Identifier sets discovered during extraction.
//!
//! Copy units never write to the registry directly. A unit returns the keys
//! it discovered, and the orchestrator merges them once the unit's whole
//! stage has finished. Units of the next stage receive a shared, read-only
//! snapshot, so a consumer can never observe a partially written set.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Semantic name of a discovered key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegistryKey {
    TenantPrincipalIds,
    ExternalPrincipalIds,
    PrincipalEmails,
    ResourceIds,
    ContentIds,
    RevisionIds,
    DiscussionIds,
    FolderGroupIds,
    InvitationEmails,
    InvitationTokens,
    LoginIds,
    OAuthClientIds,
}

impl RegistryKey {
    /// Name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKey::TenantPrincipalIds => "tenantPrincipalIds",
            RegistryKey::ExternalPrincipalIds => "externalPrincipalIds",
            RegistryKey::PrincipalEmails => "principalEmails",
            RegistryKey::ResourceIds => "resourceIds",
            RegistryKey::ContentIds => "contentIds",
            RegistryKey::RevisionIds => "revisionIds",
            RegistryKey::DiscussionIds => "discussionIds",
            RegistryKey::FolderGroupIds => "folderGroupIds",
            RegistryKey::InvitationEmails => "invitationEmails",
            RegistryKey::InvitationTokens => "invitationTokens",
            RegistryKey::LoginIds => "loginIds",
            RegistryKey::OAuthClientIds => "oauthClientIds",
        }
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RegistryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Registry of identifier sets for one run.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    entries: BTreeMap<RegistryKey, Arc<[String]>>,
}

impl KeyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a key set, replacing any previous value.
    ///
    /// Duplicates are dropped; first-seen order is kept.
    pub fn set(&mut self, key: RegistryKey, values: Vec<String>) {
        self.entries.insert(key, dedup(values).into());
    }

    /// The stored key set, or an empty slice if it was never set.
    pub fn get(&self, key: RegistryKey) -> Arc<[String]> {
        self.entries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Whether the key set is unset or empty.
    pub fn is_empty(&self, key: RegistryKey) -> bool {
        self.entries.get(&key).map_or(true, |v| v.is_empty())
    }

    /// Whether the key set has been written.
    pub fn contains(&self, key: RegistryKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Size of every key set that has been written.
    pub fn sizes(&self) -> BTreeMap<RegistryKey, usize> {
        self.entries.iter().map(|(k, v)| (*k, v.len())).collect()
    }
}

/// Remove duplicates while preserving first-seen order.
pub(crate) fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(values.len());
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
