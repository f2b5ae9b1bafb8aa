//! Extraction orchestrator - main workflow coordinator.
//!
//! A run validates the plan, bootstraps the target schema, then executes the
//! stages strictly in order. Units within a stage are spawned as tasks
//! bounded by `max_concurrent_units`; a stage is complete only when every
//! unit has finished. Discovered keys are merged into the registry between
//! stages, and the first unit failure aborts the run.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::copy::{CopyUnit, UnitContext, UnitRunner};
use crate::error::{ExtractError, Result};
use crate::plan::{Plan, Stage};
use crate::registry::{KeyRegistry, RegistryKey};
use crate::report::{HealthCheckResult, RunReport, UnitReport, VerifyResult};
use crate::schema;
use crate::store::Store;
use crate::verify::Verifier;

/// Extraction orchestrator.
pub struct Orchestrator {
    config: Config,
    plan: Plan,
    source: Arc<dyn Store>,
    target: Arc<dyn Store>,
    registry: KeyRegistry,
    dry_run: bool,
    skip_verify: bool,
    last_report: Option<RunReport>,
}

/// Units and produced keys of a finished stage.
struct StageResult {
    reports: Vec<UnitReport>,
    produced: Vec<(RegistryKey, Vec<String>)>,
    /// First unit failure; the stage's keys are discarded when set.
    error: Option<ExtractError>,
}

/// Unit reports of every stage that started.
struct Execution {
    units: Vec<UnitReport>,
    stages_completed: usize,
    error: Option<ExtractError>,
}

impl Orchestrator {
    /// Create an orchestrator over already connected stores.
    pub fn new(config: Config, source: Arc<dyn Store>, target: Arc<dyn Store>) -> Self {
        Self {
            config,
            plan: Plan::default(),
            source,
            target,
            registry: KeyRegistry::new(),
            dry_run: false,
            skip_verify: false,
            last_report: None,
        }
    }

    /// Connect to the configured source and target clusters.
    #[cfg(feature = "cql")]
    pub async fn connect(config: Config) -> Result<Self> {
        use crate::store::CqlStore;

        let source = CqlStore::connect(&config.source).await?;
        let target = CqlStore::connect(&config.target).await?;
        Ok(Self::new(config, Arc::new(source), Arc::new(target)))
    }

    /// Replace the copy plan.
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = plan;
        self
    }

    /// Read from the source and discover keys without writing the target.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Skip post-run verification regardless of configuration.
    pub fn with_skip_verify(mut self, skip_verify: bool) -> Self {
        self.skip_verify = skip_verify;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Registry as of the last completed stage.
    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Report of the last `run`, including a failed one.
    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// Check the plan and the units named for verification.
    pub fn validate(&self) -> Result<()> {
        self.plan.validate()?;
        for name in &self.config.migration.verify_units {
            if self.plan.unit(name).is_none() {
                return Err(ExtractError::Config(format!(
                    "migration.verify_units names unknown unit {}",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Test source and target connectivity.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = self.target.ping().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        Ok(HealthCheckResult {
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.as_ref().err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.as_ref().err().map(|e| e.to_string()),
            healthy: source.is_ok() && target.is_ok(),
        })
    }

    /// Create the target keyspace and tables if absent.
    pub async fn bootstrap(&self) -> Result<()> {
        schema::bootstrap(&self.target, &self.config.target.replication).await
    }

    /// Run the extraction.
    ///
    /// When a unit fails the run stops after its stage and the error is
    /// returned; the partial report stays available from [`last_report`].
    ///
    /// [`last_report`]: Orchestrator::last_report
    pub async fn run(&mut self) -> Result<RunReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        self.last_report = None;

        info!(
            "Starting extraction of tenant {} ({} -> {}), run {}",
            self.config.tenant_alias(),
            self.source.describe(),
            self.target.describe(),
            run_id
        );

        self.validate()?;

        if self.dry_run {
            info!("Dry run: target schema and data are left untouched");
        } else {
            self.bootstrap().await?;
        }

        let mut execution = self.execute(self.dry_run).await;

        if let Some(e) = execution.error.take() {
            let report = self.report(run_id, "failed", started_at, start, execution, Vec::new());
            error!(
                "Extraction failed after {} of {} stages",
                report.stages_completed,
                self.plan.stages().len()
            );
            self.last_report = Some(report);
            return Err(e);
        }

        let verification = if self.dry_run || self.skip_verify || !self.config.migration.verify {
            Vec::new()
        } else {
            self.verify_units().await
        };

        let report = self.report(run_id, "completed", started_at, start, execution, verification);

        info!(
            "Extraction complete: {} units, {} rows read, {} written in {:.2}s",
            report.units.len(),
            report.rows_read,
            report.rows_written,
            report.duration_seconds
        );
        self.last_report = Some(report.clone());
        Ok(report)
    }

    fn report(
        &self,
        run_id: String,
        status: &str,
        started_at: DateTime<Utc>,
        start: Instant,
        execution: Execution,
        verification: Vec<VerifyResult>,
    ) -> RunReport {
        let units = execution.units;
        RunReport {
            run_id,
            tenant_alias: self.config.tenant_alias().to_string(),
            status: status.to_string(),
            config_hash: self.config.hash(),
            dry_run: self.dry_run,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: start.elapsed().as_secs_f64(),
            stages_completed: execution.stages_completed,
            rows_read: units.iter().map(|u| u.rows_read).sum(),
            rows_written: units.iter().map(|u| u.rows_written).sum(),
            registry: self.registry.sizes(),
            units,
            verification,
        }
    }

    /// Rediscover the tenant's keys from the source, then compare counts.
    ///
    /// Nothing is written to the target.
    pub async fn verify(&mut self) -> Result<Vec<VerifyResult>> {
        self.validate()?;
        info!("Discovering tenant keys for verification");
        if let Some(e) = self.execute(true).await.error {
            return Err(e);
        }
        Ok(self.verify_units().await)
    }

    async fn verify_units(&self) -> Vec<VerifyResult> {
        let selected = &self.config.migration.verify_units;
        let units: Vec<&CopyUnit> = self
            .plan
            .units()
            .map(|(_, u)| u)
            .filter(|u| selected.is_empty() || selected.iter().any(|s| s == u.name))
            .collect();

        Verifier::new(
            self.source.as_ref(),
            self.target.as_ref(),
            self.config.tenant_alias(),
            &self.registry,
            self.config.migration.key_chunk_size,
        )
        .verify_all(units)
        .await
    }

    /// Run every stage, merging discovered keys between stages.
    ///
    /// Stops after the first stage with a failed unit.
    async fn execute(&mut self, dry_run: bool) -> Execution {
        self.registry = KeyRegistry::new();
        let stages = self.plan.stages().to_vec();
        let mut execution = Execution {
            units: Vec::new(),
            stages_completed: 0,
            error: None,
        };

        for stage in &stages {
            let result = self.run_stage(stage, dry_run).await;
            execution.units.extend(result.reports);

            if let Some(e) = result.error {
                error!("Stage {} failed, aborting run", stage.number);
                execution.error = Some(e);
                break;
            }

            for (key, values) in result.produced {
                debug!("Registering {} {}", values.len(), key);
                self.registry.set(key, values);
            }
            info!(
                "Stage {} complete: {} units",
                stage.number,
                stage.units.len()
            );
            execution.stages_completed += 1;
        }

        execution
    }

    async fn run_stage(&self, stage: &Stage, dry_run: bool) -> StageResult {
        info!("Stage {}: starting {} units", stage.number, stage.units.len());

        let semaphore = Arc::new(Semaphore::new(self.config.migration.max_concurrent_units));
        let ctx = UnitContext {
            source: self.source.clone(),
            target: self.target.clone(),
            tenant_alias: self.config.tenant_alias().to_string(),
            registry: Arc::new(self.registry.clone()),
            batch_size: self.config.migration.batch_size,
            key_chunk_size: self.config.migration.key_chunk_size,
            retry: self.config.migration.retry.clone(),
            dry_run,
        };

        let mut handles = Vec::new();
        for unit in stage.units.iter().cloned() {
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            let stage_number = stage.number;
            let name = unit.name;

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let started_at = Utc::now();
                let mut runner = UnitRunner::new(unit, ctx);
                let result = runner.run().await;
                let report = UnitReport::new(
                    stage_number,
                    &runner,
                    started_at,
                    Utc::now(),
                    result.as_ref(),
                );
                (report, result)
            });

            handles.push((name, handle));
        }

        let mut result = StageResult {
            reports: Vec::with_capacity(handles.len()),
            produced: Vec::new(),
            error: None,
        };

        for (name, handle) in handles {
            match handle.await {
                Ok((report, Ok(outcome))) => {
                    debug!("{}: completed ({} rows)", name, outcome.write.written);
                    result.reports.push(report);
                    result.produced.extend(outcome.produced);
                }
                Ok((report, Err(e))) => {
                    error!("{}: failed - {}", name, e.root());
                    result.reports.push(report);
                    result.error.get_or_insert(e);
                }
                Err(e) => {
                    error!("{}: task panicked - {}", name, e);
                    result.error.get_or_insert(ExtractError::UnitPanicked {
                        unit: name.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::UnitStatus;
    use crate::store::{MemoryStore, Row};

    const CONFIG: &str = r#"
source:
  hosts: ["10.0.0.1"]
  keyspace: shared
  tenant_alias: t1
target:
  hosts: ["10.0.0.2"]
  keyspace: tenant_t1
  tenant_alias: t1
"#;

    fn orchestrator(source: &MemoryStore, target: &MemoryStore) -> Orchestrator {
        let config = Config::from_yaml(CONFIG).unwrap();
        Orchestrator::new(
            config,
            Arc::new(source.clone()),
            Arc::new(target.clone()),
        )
    }

    #[tokio::test]
    async fn test_run_on_empty_source_completes() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        schema::bootstrap(&(Arc::new(source.clone()) as Arc<dyn Store>), &Default::default())
            .await
            .unwrap();

        let report = orchestrator(&source, &target).run().await.unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(report.rows_written, 0);
        assert_eq!(target.batch_calls(), 0);
        assert_eq!(report.units.len(), Plan::default().units().count());
        assert!(target.keyspace_created());
        assert!(report.verified_clean());
    }

    #[tokio::test]
    async fn test_dry_run_leaves_target_untouched() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        schema::bootstrap(&(Arc::new(source.clone()) as Arc<dyn Store>), &Default::default())
            .await
            .unwrap();
        source
            .seed(
                schema::table("Principals").unwrap(),
                vec![Row::new()
                    .with("principalId", "u:t1:a")
                    .with("tenantAlias", "t1")],
            )
            .await;

        let mut orch = orchestrator(&source, &target).with_dry_run(true);
        let report = orch.run().await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.rows_read, 1);
        assert!(!target.keyspace_created());
        assert_eq!(target.batch_calls(), 0);
        assert_eq!(orch.registry().get(RegistryKey::TenantPrincipalIds).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_run_keeps_partial_report() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        schema::bootstrap(&(Arc::new(source.clone()) as Arc<dyn Store>), &Default::default())
            .await
            .unwrap();
        source
            .seed(
                schema::table("Principals").unwrap(),
                vec![Row::new()
                    .with("principalId", "u:t1:a")
                    .with("tenantAlias", "t1")],
            )
            .await;
        target.fail_writes("Principals").await;

        let mut orch = orchestrator(&source, &target);
        assert!(orch.run().await.is_err());

        let report = orch.last_report().unwrap();
        assert_eq!(report.status, "failed");
        assert_eq!(report.stages_completed, 0);
        assert_eq!(
            report.units.len(),
            Plan::default().stages()[0].units.len()
        );
        let principals = report.unit("principals").unwrap();
        assert_eq!(principals.status, UnitStatus::Failed);
        assert!(principals.error.is_some());
        assert!(report.registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_verify_unit_is_config_error() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        let mut config = Config::from_yaml(CONFIG).unwrap();
        config.migration.verify_units = vec!["nope".into()];
        let orch = Orchestrator::new(config, Arc::new(source), Arc::new(target));
        assert!(matches!(orch.validate(), Err(ExtractError::Config(_))));
    }

    #[tokio::test]
    async fn test_health_check_reports_unreachable_target() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        target.set_unreachable(true);

        let result = orchestrator(&source, &target).health_check().await.unwrap();
        assert!(result.source_connected);
        assert!(!result.target_connected);
        assert!(!result.healthy);
        assert!(result.target_error.is_some());
    }
}
