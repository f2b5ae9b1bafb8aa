//! Static copy plan: units grouped into dependency-ordered stages.
//!
//! Stages run strictly one after another; units within a stage run
//! concurrently. A unit may only consume registry keys produced by a unit
//! in an earlier stage, which [`Plan::validate`] checks before anything
//! touches a database.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::copy::{Access, CopyUnit, KeySource, Lookup, Predicate};
use crate::error::{ExtractError, Result};
use crate::registry::RegistryKey;

/// Units that run concurrently.
#[derive(Debug, Clone)]
pub struct Stage {
    /// 1-based position in the plan.
    pub number: usize,
    pub units: Vec<CopyUnit>,
}

/// A producer to consumer dependency through a registry key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub producer: &'static str,
    pub consumer: &'static str,
    pub key: RegistryKey,
}

/// An ordered list of stages.
#[derive(Debug, Clone)]
pub struct Plan {
    stages: Vec<Stage>,
}

impl Plan {
    /// Build a plan from unit groups, numbering stages in order.
    pub fn new(stages: Vec<Vec<CopyUnit>>) -> Self {
        Self {
            stages: stages
                .into_iter()
                .enumerate()
                .map(|(i, units)| Stage {
                    number: i + 1,
                    units,
                })
                .collect(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Every unit with its stage number, in plan order.
    pub fn units(&self) -> impl Iterator<Item = (usize, &CopyUnit)> {
        self.stages
            .iter()
            .flat_map(|s| s.units.iter().map(move |u| (s.number, u)))
    }

    /// Find a unit by name.
    pub fn unit(&self, name: &str) -> Option<&CopyUnit> {
        self.units().map(|(_, u)| u).find(|u| u.name == name)
    }

    /// The producing unit and stage of every registry key.
    fn producers(&self) -> BTreeMap<RegistryKey, Vec<(usize, &'static str)>> {
        let mut producers: BTreeMap<RegistryKey, Vec<(usize, &'static str)>> = BTreeMap::new();
        for (stage, unit) in self.units() {
            for producer in &unit.produces {
                producers
                    .entry(producer.key)
                    .or_default()
                    .push((stage, unit.name));
            }
        }
        producers
    }

    /// Dependency edges between units.
    pub fn edges(&self) -> Vec<Edge> {
        let producers = self.producers();
        let mut edges = Vec::new();
        for (_, unit) in self.units() {
            for key in unit.consumes() {
                for (_, producer) in producers.get(&key).into_iter().flatten() {
                    edges.push(Edge {
                        producer: *producer,
                        consumer: unit.name,
                        key,
                    });
                }
            }
        }
        edges
    }

    /// Check the plan is executable.
    ///
    /// Rejects duplicate unit names, unknown tables or columns, lookups on
    /// columns that are neither a partition key nor indexed, keys with more
    /// than one producer, and consumers that do not run strictly after
    /// their producer.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.units.is_empty() {
                return Err(ExtractError::Plan(format!("stage {} is empty", stage.number)));
            }
            for unit in &stage.units {
                if !names.insert(unit.name) {
                    return Err(ExtractError::Plan(format!(
                        "duplicate unit name {}",
                        unit.name
                    )));
                }
                validate_unit(unit)?;
            }
        }

        let producers = self.producers();
        for (key, units) in &producers {
            if units.len() > 1 {
                let names: Vec<&str> = units.iter().map(|(_, n)| *n).collect();
                return Err(ExtractError::Plan(format!(
                    "{} is produced by more than one unit: {}",
                    key,
                    names.join(", ")
                )));
            }
        }

        for (stage, unit) in self.units() {
            for key in unit.consumes() {
                match producers.get(&key).and_then(|p| p.first()) {
                    None => {
                        return Err(ExtractError::Plan(format!(
                            "{} consumes {} which no unit produces",
                            unit.name, key
                        )))
                    }
                    Some((producer_stage, producer)) if *producer_stage >= stage => {
                        return Err(ExtractError::Plan(format!(
                            "{} (stage {}) consumes {} before {} (stage {}) has produced it",
                            unit.name, stage, key, producer, producer_stage
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }
}

fn validate_unit(unit: &CopyUnit) -> Result<()> {
    let table = unit.table_def()?;
    let unknown_column = |column: &str| {
        ExtractError::Plan(format!(
            "unit {} references unknown column {}.{}",
            unit.name, table.name, column
        ))
    };

    match &unit.access {
        Access::Keyed(lookup) => {
            if !table.has_column(lookup.column) {
                return Err(unknown_column(lookup.column));
            }
            if !table.is_lookup_column(lookup.column) {
                return Err(ExtractError::Plan(format!(
                    "unit {} looks up {}.{} which is neither a partition key nor indexed",
                    unit.name, table.name, lookup.column
                )));
            }
        }
        Access::Scan(predicate) => {
            if let Some(column) = predicate
                .columns()
                .into_iter()
                .find(|c| !table.has_column(c))
            {
                return Err(unknown_column(column));
            }
        }
    }

    if let Some(producer) = unit.produces.iter().find(|p| !table.has_column(p.column)) {
        return Err(unknown_column(producer.column));
    }
    Ok(())
}

impl Default for Plan {
    /// The full tenant extraction plan.
    fn default() -> Self {
        use RegistryKey::*;

        let tenant_principals = |column: &'static str| Lookup::registry(column, TenantPrincipalIds);

        Plan::new(vec![
            // Roots reachable from the tenant alias alone
            vec![
                CopyUnit::keyed("tenant", "Tenant", Lookup::tenant("alias")),
                CopyUnit::keyed("config", "Config", Lookup::tenant("tenantAlias")),
                CopyUnit::keyed("principals", "Principals", Lookup::tenant("tenantAlias"))
                    .producing(TenantPrincipalIds, "principalId")
                    .producing(PrincipalEmails, "email"),
                CopyUnit::scan(
                    "folders",
                    "Folders",
                    Predicate::TenantEquals {
                        column: "tenantAlias",
                    },
                )
                .producing(FolderGroupIds, "groupId"),
                CopyUnit::scan(
                    "discussions",
                    "Discussions",
                    Predicate::TenantEquals {
                        column: "tenantAlias",
                    },
                )
                .producing(DiscussionIds, "id"),
                CopyUnit::scan(
                    "library_index",
                    "LibraryIndex",
                    Predicate::KeySegment {
                        column: "bucketKey",
                        delimiter: ':',
                        position: 1,
                    },
                ),
            ],
            vec![
                CopyUnit::keyed("authz_roles", "AuthzRoles", tenant_principals("principalId"))
                    .producing(ResourceIds, "resourceId"),
                CopyUnit::keyed(
                    "authz_members",
                    "AuthzMembers",
                    tenant_principals("resourceId"),
                ),
                CopyUnit::scan(
                    "external_memberships",
                    "AuthzMembers",
                    Predicate::All(vec![
                        Predicate::MemberOf {
                            column: "resourceId",
                            key: TenantPrincipalIds,
                        },
                        Predicate::NotMemberOf {
                            column: "memberId",
                            key: TenantPrincipalIds,
                        },
                    ]),
                )
                .producing(ExternalPrincipalIds, "memberId"),
                CopyUnit::keyed(
                    "principals_by_email",
                    "PrincipalsByEmail",
                    Lookup::registry("email", PrincipalEmails),
                ),
                CopyUnit::keyed(
                    "user_login_ids",
                    "AuthenticationUserLoginId",
                    tenant_principals("userId"),
                )
                .producing(LoginIds, "loginId"),
                CopyUnit::keyed(
                    "oauth_clients_by_user",
                    "OAuthClientsByUser",
                    tenant_principals("userId"),
                )
                .producing(OAuthClientIds, "clientId"),
                CopyUnit::keyed(
                    "following_followers",
                    "FollowingUsersFollowers",
                    tenant_principals("userId"),
                ),
                CopyUnit::keyed(
                    "following_following",
                    "FollowingUsersFollowing",
                    tenant_principals("userId"),
                ),
                CopyUnit::keyed(
                    "folders_group_ids",
                    "FoldersGroupIds",
                    Lookup::registry("groupId", FolderGroupIds),
                ),
                CopyUnit::keyed(
                    "message_box_messages",
                    "MessageBoxMessages",
                    Lookup::registry("messageBoxId", DiscussionIds),
                ),
                CopyUnit::keyed(
                    "message_box_recent_contributions",
                    "MessageBoxRecentContributions",
                    Lookup::registry("messageBoxId", DiscussionIds),
                ),
                CopyUnit::scan(
                    "messages",
                    "Messages",
                    Predicate::MemberOf {
                        column: "messageBoxId",
                        key: DiscussionIds,
                    },
                ),
            ],
            vec![
                CopyUnit::keyed(
                    "content",
                    "Content",
                    Lookup::registry("contentId", ResourceIds).with_prefix("c:"),
                )
                .producing(ContentIds, "contentId"),
                CopyUnit::keyed(
                    "revision_by_content",
                    "RevisionByContent",
                    Lookup::registry("contentId", ResourceIds).with_prefix("c:"),
                )
                .producing(RevisionIds, "revisionId"),
                CopyUnit::keyed(
                    "authz_invitations",
                    "AuthzInvitations",
                    Lookup::registry("resourceId", ResourceIds),
                )
                .producing(InvitationEmails, "email"),
                CopyUnit::keyed(
                    "external_principals",
                    "Principals",
                    Lookup::registry("principalId", ExternalPrincipalIds),
                ),
                CopyUnit::keyed(
                    "login_ids",
                    "AuthenticationLoginId",
                    Lookup::registry("loginId", LoginIds),
                ),
                CopyUnit::keyed(
                    "oauth_clients",
                    "OAuthClient",
                    Lookup::registry("id", OAuthClientIds),
                ),
            ],
            vec![
                CopyUnit::keyed(
                    "revisions",
                    "Revisions",
                    Lookup::registry("revisionId", RevisionIds),
                ),
                CopyUnit::keyed(
                    "invitations_resource_id_by_email",
                    "AuthzInvitationsResourceIdByEmail",
                    Lookup::registry("email", InvitationEmails),
                ),
                CopyUnit::keyed(
                    "invitations_token_by_email",
                    "AuthzInvitationsTokenByEmail",
                    Lookup::registry("email", InvitationEmails),
                )
                .producing(InvitationTokens, "token"),
            ],
            vec![CopyUnit::keyed(
                "invitations_email_by_token",
                "AuthzInvitationsEmailByToken",
                Lookup::registry("token", InvitationTokens),
            )],
        ])
    }
}

/// Whether a lookup reads the tenant alias directly.
pub fn is_root(unit: &CopyUnit) -> bool {
    match &unit.access {
        Access::Keyed(lookup) => lookup.keys == KeySource::Tenant,
        Access::Scan(predicate) => predicate.consumes().is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    #[test]
    fn test_default_plan_is_valid() {
        let plan = Plan::default();
        plan.validate().unwrap();
        assert_eq!(plan.stages().len(), 5);
    }

    #[test]
    fn test_default_plan_covers_catalog() {
        let plan = Plan::default();
        let copied: HashSet<&str> = plan.units().map(|(_, u)| u.table).collect();
        for table in schema::catalog() {
            assert!(copied.contains(table.name), "{} is never copied", table.name);
        }
    }

    #[test]
    fn test_first_stage_only_has_roots() {
        let plan = Plan::default();
        assert!(plan.stages()[0].units.iter().all(is_root));
        assert!(plan.stages()[1..]
            .iter()
            .flat_map(|s| s.units.iter())
            .all(|u| !is_root(u)));
    }

    #[test]
    fn test_edges_link_producers_to_consumers() {
        let edges = Plan::default().edges();
        assert!(edges.contains(&Edge {
            producer: "principals",
            consumer: "authz_roles",
            key: RegistryKey::TenantPrincipalIds,
        }));
        assert!(edges.contains(&Edge {
            producer: "invitations_token_by_email",
            consumer: "invitations_email_by_token",
            key: RegistryKey::InvitationTokens,
        }));
    }

    #[test]
    fn test_consumer_in_same_stage_is_rejected() {
        let plan = Plan::new(vec![vec![
            CopyUnit::keyed("principals", "Principals", Lookup::tenant("tenantAlias"))
                .producing(RegistryKey::TenantPrincipalIds, "principalId"),
            CopyUnit::keyed(
                "authz_roles",
                "AuthzRoles",
                Lookup::registry("principalId", RegistryKey::TenantPrincipalIds),
            ),
        ]]);
        let err = plan.validate().unwrap_err();
        assert!(matches!(err, ExtractError::Plan(ref m) if m.contains("authz_roles")));
    }

    #[test]
    fn test_two_producers_are_rejected() {
        let plan = Plan::new(vec![vec![
            CopyUnit::keyed("principals", "Principals", Lookup::tenant("tenantAlias"))
                .producing(RegistryKey::TenantPrincipalIds, "principalId"),
            CopyUnit::scan(
                "folders",
                "Folders",
                Predicate::TenantEquals {
                    column: "tenantAlias",
                },
            )
            .producing(RegistryKey::TenantPrincipalIds, "groupId"),
        ]]);
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("more than one unit"));
    }

    #[test]
    fn test_missing_producer_is_rejected() {
        let plan = Plan::new(vec![vec![CopyUnit::keyed(
            "revisions",
            "Revisions",
            Lookup::registry("revisionId", RegistryKey::RevisionIds),
        )]]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_unknown_table_and_unindexed_lookup_are_rejected() {
        let unknown = Plan::new(vec![vec![CopyUnit::keyed(
            "ghost",
            "Ghost",
            Lookup::tenant("tenantAlias"),
        )]]);
        assert!(unknown.validate().is_err());

        let unindexed = Plan::new(vec![vec![CopyUnit::keyed(
            "folders",
            "Folders",
            Lookup::tenant("tenantAlias"),
        )]]);
        let err = unindexed.validate().unwrap_err();
        assert!(err.to_string().contains("neither a partition key nor indexed"));
    }
}
