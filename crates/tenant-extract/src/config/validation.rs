//! Configuration validation.

use super::{Config, StoreConfig};
use crate::error::{ExtractError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_store("source", &config.source)?;
    validate_store("target", &config.target)?;

    if config.source.tenant_alias != config.target.tenant_alias {
        return Err(ExtractError::Config(format!(
            "source.tenant_alias '{}' and target.tenant_alias '{}' must match",
            config.source.tenant_alias, config.target.tenant_alias
        )));
    }

    // Cannot copy a keyspace onto itself
    let mut source_hosts = config.source.hosts.clone();
    let mut target_hosts = config.target.hosts.clone();
    source_hosts.sort();
    target_hosts.sort();
    if source_hosts == target_hosts && config.source.keyspace == config.target.keyspace {
        return Err(ExtractError::Config(
            "source and target cannot be the same keyspace".into(),
        ));
    }

    let migration = &config.migration;
    if migration.batch_size == 0 {
        return Err(ExtractError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.key_chunk_size == 0 {
        return Err(ExtractError::Config(
            "migration.key_chunk_size must be at least 1".into(),
        ));
    }
    if migration.max_concurrent_units == 0 {
        return Err(ExtractError::Config(
            "migration.max_concurrent_units must be at least 1".into(),
        ));
    }
    if migration.retry.max_attempts == 0 {
        return Err(ExtractError::Config(
            "migration.retry.max_attempts must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_store(side: &str, store: &StoreConfig) -> Result<()> {
    if store.hosts.is_empty() || store.hosts.iter().any(|h| h.trim().is_empty()) {
        return Err(ExtractError::Config(format!("{}.hosts is required", side)));
    }
    if store.keyspace.is_empty() {
        return Err(ExtractError::Config(format!(
            "{}.keyspace is required",
            side
        )));
    }
    if !store
        .keyspace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ExtractError::Config(format!(
            "{}.keyspace '{}' may only contain letters, digits and underscores",
            side, store.keyspace
        )));
    }
    if store.tenant_alias.is_empty() {
        return Err(ExtractError::Config(format!(
            "{}.tenant_alias is required",
            side
        )));
    }
    if store.connect_timeout_secs == 0 {
        return Err(ExtractError::Config(format!(
            "{}.connect_timeout_secs must be at least 1",
            side
        )));
    }
    let class = &store.replication.class;
    if class.is_empty()
        || !class
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(ExtractError::Config(format!(
            "{}.replication.class '{}' may only contain letters, digits, underscores and dots",
            side, class
        )));
    }
    if store.replication.replication_factor == 0 {
        return Err(ExtractError::Config(format!(
            "{}.replication.replication_factor must be at least 1",
            side
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, ReplicationConfig};

    fn store(host: &str, keyspace: &str) -> StoreConfig {
        StoreConfig {
            hosts: vec![host.to_string()],
            keyspace: keyspace.to_string(),
            tenant_alias: "t1".to_string(),
            connect_timeout_secs: 10,
            replication: ReplicationConfig::default(),
            user: Some("cassandra".to_string()),
            password: Some("password".to_string()),
        }
    }

    fn valid_config() -> Config {
        Config {
            source: store("10.0.0.1", "shared"),
            target: store("10.0.0.2", "tenant_t1"),
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_source_hosts() {
        let mut config = valid_config();
        config.source.hosts.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_tenant_alias() {
        let mut config = valid_config();
        config.source.tenant_alias = String::new();
        config.target.tenant_alias = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_tenant_alias_mismatch() {
        let mut config = valid_config();
        config.target.tenant_alias = "t2".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_keyspace_rejected() {
        let mut config = valid_config();
        config.target = store("10.0.0.1", "shared");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_keyspace_name_on_other_cluster_allowed() {
        let mut config = valid_config();
        config.target = store("10.0.0.2", "shared");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_keyspace_name() {
        let mut config = valid_config();
        config.target.keyspace = "tenant-t1; DROP".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_replication_class_is_restricted() {
        let mut config = valid_config();
        config.target.replication.class = "org.apache.cassandra.locator.SimpleStrategy".into();
        assert!(validate(&config).is_ok());

        config.target.replication.class = "SimpleStrategy', 'x': '1".into();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("replication.class"));
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_retry_attempts() {
        let mut config = valid_config();
        config.migration.retry.max_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_store_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = Some("super_secret_password_123".to_string());
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
