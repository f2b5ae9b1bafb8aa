//! Post-run row count verification.
//!
//! Each selected unit's tenant-scoped read is repeated against the source
//! and the target with the final registry, and the counts compared. A
//! mismatch or a failed read is reported, never fatal.

use tracing::{info, warn};

use crate::copy::{read_tenant_rows, CopyUnit};
use crate::registry::KeyRegistry;
use crate::report::VerifyResult;
use crate::store::Store;

/// Compares tenant rows between source and target.
pub struct Verifier<'a> {
    source: &'a dyn Store,
    target: &'a dyn Store,
    tenant_alias: &'a str,
    registry: &'a KeyRegistry,
    key_chunk_size: usize,
}

impl<'a> Verifier<'a> {
    pub fn new(
        source: &'a dyn Store,
        target: &'a dyn Store,
        tenant_alias: &'a str,
        registry: &'a KeyRegistry,
        key_chunk_size: usize,
    ) -> Self {
        Self {
            source,
            target,
            tenant_alias,
            registry,
            key_chunk_size,
        }
    }

    /// Verify a single unit.
    pub async fn verify_unit(&self, unit: &CopyUnit) -> VerifyResult {
        let mut result = VerifyResult {
            unit: unit.name.to_string(),
            table: unit.table.to_string(),
            source_rows: 0,
            target_rows: 0,
            matched: false,
            error: None,
        };

        let counts = async {
            let source = read_tenant_rows(
                unit,
                self.source,
                self.tenant_alias,
                self.registry,
                self.key_chunk_size,
            )
            .await?;
            let target = read_tenant_rows(
                unit,
                self.target,
                self.tenant_alias,
                self.registry,
                self.key_chunk_size,
            )
            .await?;
            Ok::<_, crate::error::ExtractError>((source.rows.len() as u64, target.rows.len() as u64))
        }
        .await;

        match counts {
            Ok((source_rows, target_rows)) => {
                result.source_rows = source_rows;
                result.target_rows = target_rows;
                result.matched = source_rows == target_rows;
                if result.matched {
                    info!("{}: {} rows (match)", unit.name, source_rows);
                } else {
                    warn!(
                        "{}: source={} target={} (MISMATCH)",
                        unit.name, source_rows, target_rows
                    );
                }
            }
            Err(e) => {
                warn!("{}: verification failed: {}", unit.name, e);
                result.error = Some(e.to_string());
            }
        }
        result
    }

    /// Verify units in order.
    pub async fn verify_all<'u>(
        &self,
        units: impl IntoIterator<Item = &'u CopyUnit>,
    ) -> Vec<VerifyResult> {
        let mut results = Vec::new();
        for unit in units {
            results.push(self.verify_unit(unit).await);
        }
        let mismatched = results.iter().filter(|r| !r.matched).count();
        if mismatched > 0 {
            warn!("Verification: {} of {} units mismatched", mismatched, results.len());
        } else {
            info!("Verification: all {} units match", results.len());
        }
        results
    }
}
