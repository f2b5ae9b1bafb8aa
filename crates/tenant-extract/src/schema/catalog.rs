//! Static table definitions.

use super::CqlType::*;
use super::TableDef;

static CATALOG: &[TableDef] = &[
    TableDef {
        name: "Tenant",
        columns: &[
            ("alias", Text),
            ("displayName", Text),
            ("host", Text),
            ("emailDomains", SetText),
            ("countryCode", Text),
            ("active", Boolean),
            ("isGuestTenant", Boolean),
        ],
        partition_key: &["alias"],
        clustering_key: &[],
        indexes: &["host"],
    },
    TableDef {
        name: "Config",
        columns: &[("tenantAlias", Text), ("configKey", Text), ("value", Text)],
        partition_key: &["tenantAlias"],
        clustering_key: &["configKey"],
        indexes: &[],
    },
    TableDef {
        name: "Principals",
        columns: &[
            ("principalId", Text),
            ("tenantAlias", Text),
            ("displayName", Text),
            ("email", Text),
            ("visibility", Text),
            ("joinable", Text),
            ("locale", Text),
            ("smallPictureUri", Text),
            ("mediumPictureUri", Text),
            ("largePictureUri", Text),
            ("created", Timestamp),
            ("lastModified", Timestamp),
            ("deleted", Timestamp),
        ],
        partition_key: &["principalId"],
        clustering_key: &[],
        indexes: &["tenantAlias"],
    },
    TableDef {
        name: "PrincipalsByEmail",
        columns: &[("email", Text), ("principalId", Text)],
        partition_key: &["email"],
        clustering_key: &["principalId"],
        indexes: &[],
    },
    TableDef {
        name: "AuthzRoles",
        columns: &[("principalId", Text), ("resourceId", Text), ("role", Text)],
        partition_key: &["principalId"],
        clustering_key: &["resourceId"],
        indexes: &[],
    },
    TableDef {
        name: "AuthzMembers",
        columns: &[("resourceId", Text), ("memberId", Text), ("role", Text)],
        partition_key: &["resourceId"],
        clustering_key: &["memberId"],
        indexes: &[],
    },
    TableDef {
        name: "AuthzInvitations",
        columns: &[
            ("resourceId", Text),
            ("email", Text),
            ("inviterUserId", Text),
            ("role", Text),
        ],
        partition_key: &["resourceId"],
        clustering_key: &["email"],
        indexes: &[],
    },
    TableDef {
        name: "AuthzInvitationsResourceIdByEmail",
        columns: &[("email", Text), ("resourceId", Text)],
        partition_key: &["email"],
        clustering_key: &["resourceId"],
        indexes: &[],
    },
    TableDef {
        name: "AuthzInvitationsTokenByEmail",
        columns: &[("email", Text), ("token", Text)],
        partition_key: &["email"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "AuthzInvitationsEmailByToken",
        columns: &[("token", Text), ("email", Text)],
        partition_key: &["token"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "Content",
        columns: &[
            ("contentId", Text),
            ("tenantAlias", Text),
            ("resourceSubType", Text),
            ("displayName", Text),
            ("description", Text),
            ("visibility", Text),
            ("link", Text),
            ("createdBy", Text),
            ("created", Timestamp),
            ("lastModified", Timestamp),
            ("latestRevisionId", Text),
            ("previews", MapTextText),
        ],
        partition_key: &["contentId"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "RevisionByContent",
        columns: &[
            ("contentId", Text),
            ("revisionId", Text),
            ("created", Timestamp),
        ],
        partition_key: &["contentId"],
        clustering_key: &["revisionId"],
        indexes: &[],
    },
    TableDef {
        name: "Revisions",
        columns: &[
            ("revisionId", Text),
            ("contentId", Text),
            ("createdBy", Text),
            ("created", Timestamp),
            ("filename", Text),
            ("mime", Text),
            ("size", BigInt),
            ("uri", Text),
            ("etherpadHtml", Text),
            ("previews", MapTextText),
        ],
        partition_key: &["revisionId"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "Discussions",
        columns: &[
            ("id", Text),
            ("tenantAlias", Text),
            ("displayName", Text),
            ("description", Text),
            ("visibility", Text),
            ("createdBy", Text),
            ("created", Timestamp),
            ("lastModified", Timestamp),
        ],
        partition_key: &["id"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "Messages",
        columns: &[
            ("id", Text),
            ("messageBoxId", Text),
            ("threadKey", Text),
            ("body", Text),
            ("createdBy", Text),
            ("created", Timestamp),
            ("deleted", Timestamp),
        ],
        partition_key: &["id"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "MessageBoxMessages",
        columns: &[("messageBoxId", Text), ("threadKey", Text), ("value", Text)],
        partition_key: &["messageBoxId"],
        clustering_key: &["threadKey"],
        indexes: &[],
    },
    TableDef {
        name: "MessageBoxRecentContributions",
        columns: &[
            ("messageBoxId", Text),
            ("contributorId", Text),
            ("value", Text),
        ],
        partition_key: &["messageBoxId"],
        clustering_key: &["contributorId"],
        indexes: &[],
    },
    TableDef {
        name: "Folders",
        columns: &[
            ("id", Text),
            ("tenantAlias", Text),
            ("groupId", Text),
            ("displayName", Text),
            ("description", Text),
            ("visibility", Text),
            ("createdBy", Text),
            ("created", Timestamp),
            ("lastModified", Timestamp),
            ("previews", MapTextText),
        ],
        partition_key: &["id"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "FoldersGroupIds",
        columns: &[("groupId", Text), ("folderId", Text)],
        partition_key: &["groupId"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "LibraryIndex",
        columns: &[
            ("bucketKey", Text),
            ("rankedResourceId", Text),
            ("value", Text),
        ],
        partition_key: &["bucketKey"],
        clustering_key: &["rankedResourceId"],
        indexes: &[],
    },
    TableDef {
        name: "AuthenticationUserLoginId",
        columns: &[("userId", Text), ("loginId", Text), ("value", Text)],
        partition_key: &["userId"],
        clustering_key: &["loginId"],
        indexes: &[],
    },
    TableDef {
        name: "AuthenticationLoginId",
        columns: &[
            ("loginId", Text),
            ("userId", Text),
            ("password", Text),
            ("secret", Text),
            ("expires", Timestamp),
        ],
        partition_key: &["loginId"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "OAuthClientsByUser",
        columns: &[("userId", Text), ("clientId", Text), ("value", Text)],
        partition_key: &["userId"],
        clustering_key: &["clientId"],
        indexes: &[],
    },
    TableDef {
        name: "OAuthClient",
        columns: &[
            ("id", Text),
            ("displayName", Text),
            ("secret", Text),
            ("userId", Text),
        ],
        partition_key: &["id"],
        clustering_key: &[],
        indexes: &[],
    },
    TableDef {
        name: "FollowingUsersFollowers",
        columns: &[("userId", Text), ("followerId", Text), ("value", Text)],
        partition_key: &["userId"],
        clustering_key: &["followerId"],
        indexes: &[],
    },
    TableDef {
        name: "FollowingUsersFollowing",
        columns: &[("userId", Text), ("followingId", Text), ("value", Text)],
        partition_key: &["userId"],
        clustering_key: &["followingId"],
        indexes: &[],
    },
];

/// Every table definition known to the pipeline.
pub fn catalog() -> &'static [TableDef] {
    CATALOG
}
