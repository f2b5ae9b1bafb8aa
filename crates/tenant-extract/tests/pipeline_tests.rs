//! End-to-end extraction runs against in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tenant_extract::config::ReplicationConfig;
use tenant_extract::schema::{self, TableDef};
use tenant_extract::store::{Batch, KeyedQuery, RowStream};
use tenant_extract::{
    AssetManifest, Config, ExtractError, MemoryStore, Orchestrator, RegistryKey, Row, Store,
    UnitStatus,
};
use tokio::sync::Barrier;

const CONFIG: &str = r#"
source:
  hosts: ["10.0.0.1", "10.0.0.2"]
  keyspace: shared
  tenant_alias: t1
target:
  hosts: ["10.0.1.1"]
  keyspace: tenant_t1
  tenant_alias: t1
migration:
  batch_size: 2
  key_chunk_size: 2
"#;

fn config() -> Config {
    Config::from_yaml(CONFIG).unwrap()
}

/// A shared source keyspace with every catalog table present.
async fn shared_source() -> MemoryStore {
    let source = MemoryStore::new();
    let store: Arc<dyn Store> = Arc::new(source.clone());
    schema::bootstrap(&store, &ReplicationConfig::default())
        .await
        .unwrap();
    source
}

fn orchestrator(source: &MemoryStore, target: &MemoryStore) -> Orchestrator {
    Orchestrator::new(
        config(),
        Arc::new(source.clone()),
        Arc::new(target.clone()),
    )
}

async fn seed(store: &MemoryStore, table: &str, rows: Vec<Row>) {
    store.seed(schema::table(table).unwrap(), rows).await;
}

fn principal(id: &str, tenant: &str) -> Row {
    Row::new()
        .with("principalId", id)
        .with("tenantAlias", tenant)
        .with("email", format!("{}@{}.example", id.replace(':', "."), tenant))
}

fn texts(rows: &[Row], column: &str) -> Vec<String> {
    let mut values: Vec<String> = rows
        .iter()
        .filter_map(|r| r.text(column).map(str::to_string))
        .collect();
    values.sort();
    values
}

#[tokio::test]
async fn test_principals_are_copied_and_registered() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    seed(
        &source,
        "Principals",
        vec![
            principal("u:t1:alice", "t1"),
            principal("u:t1:bob", "t1"),
            principal("g:t1:staff", "t1"),
            principal("u:t2:carol", "t2"),
            principal("u:t2:dave", "t2"),
        ],
    )
    .await;

    let mut orch = orchestrator(&source, &target);
    let report = orch.run().await.unwrap();

    let copied = target.rows("Principals").await;
    assert_eq!(
        texts(&copied, "principalId"),
        vec!["g:t1:staff", "u:t1:alice", "u:t1:bob"]
    );
    assert!(copied.iter().all(|r| r.text("tenantAlias") == Some("t1")));

    let mut registered = orch.registry().get(RegistryKey::TenantPrincipalIds).to_vec();
    registered.sort();
    assert_eq!(registered, vec!["g:t1:staff", "u:t1:alice", "u:t1:bob"]);
    assert_eq!(report.registry.get(&RegistryKey::TenantPrincipalIds), Some(&3));
    assert_eq!(report.unit("principals").unwrap().status, UnitStatus::Done);
    assert!(report.verified_clean());
}

#[tokio::test]
async fn test_empty_resource_ids_write_no_content() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    seed(&source, "Principals", vec![principal("u:t1:alice", "t1")]).await;
    seed(
        &source,
        "AuthzRoles",
        vec![Row::new()
            .with("principalId", "u:t2:carol")
            .with("resourceId", "c:t2:doc")
            .with("role", "manager")],
    )
    .await;
    seed(
        &source,
        "Content",
        vec![Row::new()
            .with("contentId", "c:t2:doc")
            .with("tenantAlias", "t2")],
    )
    .await;

    let mut orch = orchestrator(&source, &target);
    let report = orch.run().await.unwrap();

    assert!(orch.registry().contains(RegistryKey::ResourceIds));
    assert!(orch.registry().is_empty(RegistryKey::ResourceIds));
    let content = report.unit("content").unwrap();
    assert_eq!(content.status, UnitStatus::Done);
    assert_eq!(content.rows_read, 0);
    assert_eq!(content.rows_written, 0);
    assert_eq!(content.batches, 0);
    assert_eq!(target.row_count("Content").await, 0);
}

#[tokio::test]
async fn test_scan_selects_only_tenant_discussions() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    let tenants = ["t1", "t2", "t3", "t1", "t2", "t1", "t3", "t2", "t1", "t3"];
    let discussions = tenants
        .iter()
        .enumerate()
        .map(|(i, t)| {
            Row::new()
                .with("id", format!("d:{}:{}", t, i))
                .with("tenantAlias", *t)
                .with("displayName", format!("Discussion {}", i))
        })
        .collect();
    seed(&source, "Discussions", discussions).await;

    let mut orch = orchestrator(&source, &target);
    let report = orch.run().await.unwrap();

    let copied = target.rows("Discussions").await;
    assert_eq!(
        texts(&copied, "id"),
        vec!["d:t1:0", "d:t1:3", "d:t1:5", "d:t1:8"]
    );
    assert_eq!(orch.registry().get(RegistryKey::DiscussionIds).len(), 4);

    let unit = report.unit("discussions").unwrap();
    assert_eq!(unit.rows_scanned, 10);
    assert_eq!(unit.rows_read, 4);
    assert_eq!(
        unit.history,
        vec![
            UnitStatus::Pending,
            UnitStatus::Fetching,
            UnitStatus::Filtering,
            UnitStatus::Writing,
            UnitStatus::Done
        ]
    );
}

/// Source wrapper whose fetches on selected tables only proceed once every
/// participant has arrived.
struct RendezvousStore {
    inner: MemoryStore,
    tables: Vec<&'static str>,
    barrier: Arc<Barrier>,
}

#[async_trait]
impl Store for RendezvousStore {
    fn describe(&self) -> String {
        "rendezvous".to_string()
    }

    async fn ping(&self) -> tenant_extract::Result<()> {
        self.inner.ping().await
    }

    async fn create_keyspace(&self, replication: &ReplicationConfig) -> tenant_extract::Result<()> {
        self.inner.create_keyspace(replication).await
    }

    async fn create_table(&self, table: &TableDef) -> tenant_extract::Result<()> {
        self.inner.create_table(table).await
    }

    async fn fetch(&self, query: &KeyedQuery) -> tenant_extract::Result<Vec<Row>> {
        if self.tables.iter().any(|t| *t == query.table) {
            self.barrier.wait().await;
        }
        self.inner.fetch(query).await
    }

    fn scan(&self, table: &str) -> RowStream {
        self.inner.scan(table)
    }

    async fn write_batch(&self, batch: &Batch) -> tenant_extract::Result<()> {
        self.inner.write_batch(batch).await
    }
}

#[tokio::test]
async fn test_units_in_a_stage_run_concurrently() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    seed(&source, "Principals", vec![principal("g:t1:staff", "t1")]).await;
    seed(
        &source,
        "AuthzRoles",
        vec![Row::new()
            .with("principalId", "g:t1:staff")
            .with("resourceId", "c:t1:doc")
            .with("role", "manager")],
    )
    .await;
    seed(
        &source,
        "AuthzMembers",
        vec![Row::new()
            .with("resourceId", "g:t1:staff")
            .with("memberId", "u:t1:alice")
            .with("role", "member")],
    )
    .await;

    // Both fetches must be in flight at once for either to complete
    let rendezvous = RendezvousStore {
        inner: source.clone(),
        tables: vec!["AuthzRoles", "AuthzMembers"],
        barrier: Arc::new(Barrier::new(2)),
    };
    let mut orch = Orchestrator::new(config(), Arc::new(rendezvous), Arc::new(target.clone()))
        .with_skip_verify(true);

    let report = tokio::time::timeout(Duration::from_secs(10), orch.run())
        .await
        .expect("stage 2 units did not overlap")
        .unwrap();

    assert_eq!(target.row_count("AuthzRoles").await, 1);
    assert_eq!(target.row_count("AuthzMembers").await, 1);

    // Every unit of a stage starts after every unit of the previous stage ended
    for stage in 2..=report.stages_completed {
        let previous_end = report
            .units
            .iter()
            .filter(|u| u.stage == stage - 1)
            .map(|u| u.finished_at)
            .max()
            .unwrap();
        for unit in report.units.iter().filter(|u| u.stage == stage) {
            assert!(
                unit.started_at >= previous_end,
                "{} started before stage {} finished",
                unit.name,
                stage - 1
            );
        }
    }
}

#[tokio::test]
async fn test_full_tenant_graph_is_copied() {
    let source = shared_source().await;
    let target = MemoryStore::new();

    seed(
        &source,
        "Tenant",
        vec![
            Row::new().with("alias", "t1").with("host", "t1.example"),
            Row::new().with("alias", "t2").with("host", "t2.example"),
        ],
    )
    .await;
    seed(
        &source,
        "Principals",
        vec![
            principal("u:t1:alice", "t1"),
            principal("g:t1:staff", "t1"),
            principal("u:t2:carol", "t2"),
        ],
    )
    .await;
    seed(
        &source,
        "AuthzRoles",
        vec![
            Row::new()
                .with("principalId", "u:t1:alice")
                .with("resourceId", "c:t1:doc")
                .with("role", "manager"),
            Row::new()
                .with("principalId", "u:t1:alice")
                .with("resourceId", "d:t1:chat")
                .with("role", "member"),
            Row::new()
                .with("principalId", "u:t2:carol")
                .with("resourceId", "c:t2:other")
                .with("role", "manager"),
        ],
    )
    .await;
    seed(
        &source,
        "AuthzMembers",
        vec![
            Row::new()
                .with("resourceId", "g:t1:staff")
                .with("memberId", "u:t1:alice")
                .with("role", "member"),
            Row::new()
                .with("resourceId", "g:t1:staff")
                .with("memberId", "u:t2:carol")
                .with("role", "member"),
        ],
    )
    .await;
    seed(
        &source,
        "Content",
        vec![
            Row::new().with("contentId", "c:t1:doc").with("tenantAlias", "t1"),
            Row::new().with("contentId", "c:t2:other").with("tenantAlias", "t2"),
        ],
    )
    .await;
    seed(
        &source,
        "RevisionByContent",
        vec![Row::new()
            .with("contentId", "c:t1:doc")
            .with("revisionId", "rev:t1:1")],
    )
    .await;
    seed(
        &source,
        "Revisions",
        vec![
            Row::new()
                .with("revisionId", "rev:t1:1")
                .with("contentId", "c:t1:doc")
                .with("size", 2048i64),
            Row::new()
                .with("revisionId", "rev:t2:1")
                .with("contentId", "c:t2:other"),
        ],
    )
    .await;
    seed(
        &source,
        "AuthzInvitations",
        vec![Row::new()
            .with("resourceId", "c:t1:doc")
            .with("email", "guest@example.com")
            .with("role", "viewer")],
    )
    .await;
    seed(
        &source,
        "AuthzInvitationsTokenByEmail",
        vec![Row::new()
            .with("email", "guest@example.com")
            .with("token", "tok-1")],
    )
    .await;
    seed(
        &source,
        "AuthzInvitationsEmailByToken",
        vec![
            Row::new().with("token", "tok-1").with("email", "guest@example.com"),
            Row::new().with("token", "tok-2").with("email", "other@example.com"),
        ],
    )
    .await;
    seed(
        &source,
        "LibraryIndex",
        vec![
            Row::new()
                .with("bucketKey", "content-library#u:t1:alice")
                .with("rankedResourceId", "1#c:t1:doc"),
            Row::new()
                .with("bucketKey", "content-library#u:t2:carol")
                .with("rankedResourceId", "1#c:t2:other"),
        ],
    )
    .await;

    let mut orch = orchestrator(&source, &target);
    let report = orch.run().await.unwrap();

    assert_eq!(texts(&target.rows("Tenant").await, "alias"), vec!["t1"]);
    assert_eq!(
        texts(&target.rows("AuthzRoles").await, "resourceId"),
        vec!["c:t1:doc", "d:t1:chat"]
    );
    assert_eq!(
        texts(&target.rows("Content").await, "contentId"),
        vec!["c:t1:doc"]
    );
    assert_eq!(
        texts(&target.rows("Revisions").await, "revisionId"),
        vec!["rev:t1:1"]
    );
    assert_eq!(
        texts(&target.rows("AuthzInvitationsEmailByToken").await, "token"),
        vec!["tok-1"]
    );
    assert_eq!(target.row_count("LibraryIndex").await, 1);

    // Members of tenant groups from other tenants come along as principals
    assert_eq!(
        orch.registry().get(RegistryKey::ExternalPrincipalIds).as_ref(),
        &["u:t2:carol".to_string()]
    );
    assert_eq!(
        texts(&target.rows("Principals").await, "principalId"),
        vec!["g:t1:staff", "u:t1:alice", "u:t2:carol"]
    );
    assert_eq!(target.row_count("AuthzMembers").await, 2);

    assert!(report.verified_clean(), "{:?}", report.verification);
    assert_eq!(report.verification.len(), orch.plan().units().count());

    let manifest = AssetManifest::from_registry("t1", &report.run_id, orch.registry());
    assert_eq!(manifest.content_ids, vec!["c:t1:doc"]);
    assert_eq!(manifest.revision_ids, vec!["rev:t1:1"]);
}

#[tokio::test]
async fn test_scan_failure_aborts_before_later_stages() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    seed(&source, "Principals", vec![principal("u:t1:alice", "t1")]).await;
    seed(
        &source,
        "AuthzRoles",
        vec![Row::new()
            .with("principalId", "u:t1:alice")
            .with("resourceId", "c:t1:doc")],
    )
    .await;
    seed(
        &source,
        "Discussions",
        vec![Row::new().with("id", "d:t1:1").with("tenantAlias", "t1")],
    )
    .await;
    source.fail_scan_after("Discussions", 0).await;

    let mut orch = orchestrator(&source, &target);
    let err = orch.run().await.unwrap_err();

    assert!(matches!(err, ExtractError::Unit { ref unit, .. } if unit == "discussions"));
    assert!(matches!(err.root(), ExtractError::Stream { .. }));
    assert_eq!(err.exit_code(), tenant_extract::error::EXIT_TRANSFER_ERROR);

    // Stage 1 siblings still ran to completion; stage 2 never started
    assert_eq!(target.row_count("Principals").await, 1);
    assert_eq!(target.row_count("AuthzRoles").await, 0);

    let report = orch.last_report().unwrap();
    assert_eq!(report.status, "failed");
    assert_eq!(report.stages_completed, 0);
    assert!(report.unit("authz_roles").is_none());
    let discussions = report.unit("discussions").unwrap();
    assert_eq!(discussions.status, UnitStatus::Failed);
    assert_eq!(
        discussions.history,
        vec![UnitStatus::Pending, UnitStatus::Fetching, UnitStatus::Failed]
    );
    assert_eq!(report.unit("principals").unwrap().status, UnitStatus::Done);
}

#[tokio::test]
async fn test_rejected_batch_fails_the_run() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    seed(&source, "Principals", vec![principal("u:t1:alice", "t1")]).await;
    target.fail_writes("Principals").await;

    let err = orchestrator(&source, &target).run().await.unwrap_err();

    assert!(matches!(err.root(), ExtractError::Batch { ref table, .. } if table == "Principals"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_transient_fetch_errors_are_retried() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    seed(
        &source,
        "Tenant",
        vec![Row::new().with("alias", "t1").with("host", "t1.example")],
    )
    .await;
    source.fail_fetches("Tenant", 2).await;

    let mut config = config();
    config.migration.retry.max_attempts = 3;
    config.migration.retry.backoff_ms = 1;
    let mut orch = Orchestrator::new(config, Arc::new(source.clone()), Arc::new(target.clone()));
    let report = orch.run().await.unwrap();

    assert_eq!(report.unit("tenant").unwrap().attempts, 3);
    assert_eq!(target.row_count("Tenant").await, 1);
}

#[tokio::test]
async fn test_transient_errors_abort_without_retry_budget() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    source.fail_fetches("Tenant", 1).await;

    let err = orchestrator(&source, &target).run().await.unwrap_err();
    assert_eq!(err.exit_code(), tenant_extract::error::EXIT_CONNECTION_ERROR);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    seed(
        &source,
        "Principals",
        vec![principal("u:t1:alice", "t1"), principal("u:t1:bob", "t1")],
    )
    .await;

    orchestrator(&source, &target).run().await.unwrap();
    let first = target.rows("Principals").await;
    orchestrator(&source, &target).run().await.unwrap();
    let second = target.rows("Principals").await;

    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn test_verify_rediscovers_keys_without_writing() {
    let source = shared_source().await;
    let target = MemoryStore::new();
    seed(
        &source,
        "Principals",
        vec![principal("u:t1:alice", "t1"), principal("u:t1:bob", "t1")],
    )
    .await;
    orchestrator(&source, &target).run().await.unwrap();

    // Source gains a row after the copy
    seed(&source, "Principals", vec![principal("u:t1:zed", "t1")]).await;
    let batches_before = target.batch_calls();

    let mut config = config();
    config.migration.verify_units = vec!["principals".into()];
    let mut orch = Orchestrator::new(config, Arc::new(source.clone()), Arc::new(target.clone()));
    let results = orch.verify().await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!((results[0].source_rows, results[0].target_rows), (3, 2));
    assert!(!results[0].matched);
    assert_eq!(target.batch_calls(), batches_before);
}
