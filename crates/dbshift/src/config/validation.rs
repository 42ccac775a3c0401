//! Configuration validation.

use std::collections::HashSet;

use super::{Config, ConnectionConfig, DatabaseKind};
use crate::error::{MigrateError, Result};
use crate::mapping::Transformation;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    validate_connection("target", &config.target)?;

    // Cannot migrate to the same database
    let source_kind = config.source.kind()?;
    if source_kind != DatabaseKind::Memory
        && config.source.r#type.eq_ignore_ascii_case(&config.target.r#type)
        && config.source.host == config.target.host
        && config.source.effective_port() == config.target.effective_port()
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    if let Some(0) = migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.batch_size {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    let batch_size = migration.get_batch_size() as u64;
    if migration.start_offset % batch_size != 0 {
        return Err(MigrateError::Config(format!(
            "migration.start_offset ({}) must be a multiple of batch_size ({})",
            migration.start_offset, batch_size
        )));
    }
    if migration.timestamp_suffixes.iter().any(|s| s.is_empty()) {
        return Err(MigrateError::Config(
            "migration.timestamp_suffixes cannot contain empty entries".into(),
        ));
    }

    let mut tables = HashSet::new();
    for mapping in &config.mappings {
        if mapping.source_table.is_empty() {
            return Err(MigrateError::Config(
                "mappings: source_table is required".into(),
            ));
        }
        if !tables.insert(mapping.source_table.to_lowercase()) {
            return Err(MigrateError::Config(format!(
                "mappings: table '{}' is mapped more than once",
                mapping.source_table
            )));
        }

        let mut columns = HashSet::new();
        for column in &mapping.columns {
            if column.source_column.is_empty() || column.target_column.is_empty() {
                return Err(MigrateError::Config(format!(
                    "mappings.{}: column mappings need source_column and target_column",
                    mapping.source_table
                )));
            }
            if !columns.insert(column.source_column.to_lowercase()) {
                return Err(MigrateError::Config(format!(
                    "mappings.{}: source column '{}' is mapped more than once",
                    mapping.source_table, column.source_column
                )));
            }
            if let Some(ref name) = column.transformation {
                name.parse::<Transformation>().map_err(|e| {
                    MigrateError::Config(format!(
                        "mappings.{}.{}: {}",
                        mapping.source_table, column.source_column, e
                    ))
                })?;
            }
        }
    }

    for type_mapping in &config.type_mappings {
        if type_mapping.source_type.is_empty() || type_mapping.target_type.is_empty() {
            return Err(MigrateError::Config(
                "type_mappings need source_type and target_type".into(),
            ));
        }
        if let Some(ref name) = type_mapping.transformer {
            name.parse::<Transformation>().map_err(|e| {
                MigrateError::Config(format!(
                    "type_mappings.{}: {}",
                    type_mapping.source_type, e
                ))
            })?;
        }
    }

    Ok(())
}

fn validate_connection(side: &str, conn: &ConnectionConfig) -> Result<()> {
    let kind = conn.kind().map_err(|_| {
        MigrateError::Config(format!(
            "{}.type '{}' is not supported (expected mssql, postgres or memory)",
            side, conn.r#type
        ))
    })?;
    if kind == DatabaseKind::Memory {
        return Ok(());
    }

    if conn.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", side)));
    }
    if conn.database.is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.database is required",
            side
        )));
    }
    if conn.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", side)));
    }
    if conn.query_timeout_secs == 0 || conn.connect_timeout_secs == 0 {
        return Err(MigrateError::Config(format!(
            "{}: timeouts must be at least 1 second",
            side
        )));
    }
    if let Some(0) = conn.max_connections {
        return Err(MigrateError::Config(format!(
            "{}.max_connections must be at least 1",
            side
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnMapping, MigrationConfig, TableMapping};

    fn connection(kind: &str, host: &str, database: &str) -> ConnectionConfig {
        ConnectionConfig {
            r#type: kind.to_string(),
            host: host.to_string(),
            port: None,
            database: database.to_string(),
            user: "admin".to_string(),
            password: "password".to_string(),
            schema: None,
            ssl_mode: "disable".to_string(),
            trust_server_cert: false,
            connect_timeout_secs: 30,
            query_timeout_secs: 300,
            max_connections: None,
        }
    }

    fn valid_config() -> Config {
        Config {
            source: connection("mssql", "localhost", "source_db"),
            target: connection("postgres", "localhost", "target_db"),
            migration: MigrationConfig::default(),
            mappings: Vec::new(),
            type_mappings: Vec::new(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_source_type() {
        let mut config = valid_config();
        config.source.r#type = "oracle".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.target = connection("mssql", "localhost", "source_db");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_start_offset_must_align_with_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = Some(500);
        config.migration.start_offset = 750;
        assert!(validate(&config).is_err());
        config.migration.start_offset = 1_000;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_column_mapping_rejected() {
        let mut config = valid_config();
        config.mappings.push(TableMapping {
            source_table: "PRODUCT".into(),
            columns: vec![
                ColumnMapping {
                    source_column: "NAME".into(),
                    target_column: "name".into(),
                    ..Default::default()
                },
                ColumnMapping {
                    source_column: "name".into(),
                    target_column: "title".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_transformation_rejected() {
        let mut config = valid_config();
        config.mappings.push(TableMapping {
            source_table: "PRODUCT".into(),
            columns: vec![ColumnMapping {
                source_column: "NAME".into(),
                target_column: "name".into(),
                transformation: Some("reverse".into()),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_memory_connections_need_no_host() {
        let mut config = valid_config();
        config.source = connection("memory", "", "");
        config.target = connection("memory", "", "");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }

    #[test]
    fn test_from_yaml_applies_defaults() {
        let yaml = r#"
source:
  type: mssql
  host: mssql.local
  database: Sales
  user: sa
  password: secret
target:
  type: postgres
  host: pg.local
  database: sales
  user: postgres
  password: secret
mappings:
  - source_table: PRODUCT_CATEGORY
    target_table: category
    columns:
      - source_column: CATEGORY_NAME
        target_column: name
        transformation: "truncate:50"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.source.effective_port(), 1433);
        assert_eq!(config.source.effective_schema(), "dbo");
        assert_eq!(config.target.effective_port(), 5432);
        assert_eq!(config.target.effective_schema(), "public");
        assert_eq!(config.migration.get_workers(), 1);
        assert_eq!(config.migration.null_fallback.code_sentinel, "UNKNOWN");
        let mapping = config.table_mapping("product_category").unwrap();
        assert_eq!(mapping.target_table_name(), "category");
        assert_eq!(mapping.column("category_name").unwrap().target_column, "name");
    }
}
