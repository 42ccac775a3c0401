//! Data type mappings between dialects.
//!
//! Lookups are keyed by the normalized source type name: lowercased, with any
//! length/precision suffix removed. Types without a mapping pass through
//! unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::ColumnDefinition;

/// How one source type is represented in the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeMapping {
    pub source_type: String,
    pub target_type: String,

    /// Values of this type must be converted, not copied.
    #[serde(default)]
    pub requires_transformation: bool,

    /// Named transformation applied to values of this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<String>,
}

impl DataTypeMapping {
    pub fn new(source_type: &str, target_type: &str) -> Self {
        Self {
            source_type: source_type.to_string(),
            target_type: target_type.to_string(),
            requires_transformation: false,
            transformer: None,
        }
    }

    pub fn with_transformer(mut self, transformer: &str) -> Self {
        self.requires_transformation = true;
        self.transformer = Some(transformer.to_string());
        self
    }

    /// True when values land in a boolean target column.
    pub fn targets_boolean(&self) -> bool {
        matches!(
            normalize_type_name(&self.target_type).as_str(),
            "boolean" | "bool"
        )
    }
}

/// Lowercase a type name and strip any `(length)` or `(precision,scale)` part.
pub fn normalize_type_name(type_name: &str) -> String {
    let mut out = String::with_capacity(type_name.len());
    let mut depth = 0usize;
    for ch in type_name.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Registry of type mappings keyed by normalized source type.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    mappings: HashMap<String, DataTypeMapping>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mappings(mappings: impl IntoIterator<Item = DataTypeMapping>) -> Self {
        let mut registry = Self::new();
        registry.extend(mappings);
        registry
    }

    /// Add mappings, replacing any existing entry for the same source type.
    pub fn extend(&mut self, mappings: impl IntoIterator<Item = DataTypeMapping>) {
        for mapping in mappings {
            self.mappings
                .insert(normalize_type_name(&mapping.source_type), mapping);
        }
    }

    pub fn get(&self, source_type: &str) -> Option<&DataTypeMapping> {
        self.mappings.get(&normalize_type_name(source_type))
    }

    /// Target type name, or the source type unchanged when unmapped.
    pub fn map_type(&self, source_type: &str) -> String {
        self.get(source_type)
            .map(|m| m.target_type.clone())
            .unwrap_or_else(|| source_type.to_string())
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Built-in SQL Server to PostgreSQL mappings.
pub fn mssql_to_postgres_mappings() -> Vec<DataTypeMapping> {
    let plain = [
        ("tinyint", "smallint"),
        ("smallint", "smallint"),
        ("int", "integer"),
        ("bigint", "bigint"),
        ("decimal", "numeric"),
        ("numeric", "numeric"),
        ("money", "numeric(19,4)"),
        ("smallmoney", "numeric(10,4)"),
        ("float", "double precision"),
        ("real", "real"),
        ("char", "char"),
        ("nchar", "char"),
        ("varchar", "varchar"),
        ("nvarchar", "varchar"),
        ("text", "text"),
        ("ntext", "text"),
        ("binary", "bytea"),
        ("varbinary", "bytea"),
        ("image", "bytea"),
        ("date", "date"),
        ("time", "time"),
        ("datetime", "timestamp"),
        ("datetime2", "timestamp"),
        ("smalldatetime", "timestamp"),
        ("datetimeoffset", "timestamptz"),
        ("uniqueidentifier", "uuid"),
        ("xml", "xml"),
        ("geometry", "text"),
        ("geography", "text"),
    ];

    let mut mappings: Vec<DataTypeMapping> = plain
        .iter()
        .map(|(source, target)| DataTypeMapping::new(source, target))
        .collect();
    mappings.push(DataTypeMapping::new("bit", "boolean").with_transformer("to_bool"));
    mappings
}

/// PostgreSQL catalog aliases, mapped to their canonical names.
pub fn postgres_alias_mappings() -> Vec<DataTypeMapping> {
    let mut mappings: Vec<DataTypeMapping> = [
        ("int2", "smallint"),
        ("int4", "integer"),
        ("int8", "bigint"),
        ("float4", "real"),
        ("float8", "double precision"),
        ("bpchar", "char"),
        ("character varying", "varchar"),
        ("timestamp without time zone", "timestamp"),
        ("timestamp with time zone", "timestamptz"),
    ]
    .iter()
    .map(|(source, target)| DataTypeMapping::new(source, target))
    .collect();
    mappings.push(DataTypeMapping::new("bool", "boolean").with_transformer("to_bool"));
    mappings
}

/// Sized target type for a source column, used when planning a table.
pub fn target_type_for(registry: &TypeRegistry, column: &ColumnDefinition) -> Option<String> {
    let mapping = registry.get(&column.data_type)?;
    let target = normalize_type_name(&mapping.target_type);
    let sized = match target.as_str() {
        "varchar" | "char" => match column.max_length {
            Some(len) if len > 0 => format!("{}({})", target, len),
            Some(_) => "text".to_string(),
            None => target.clone(),
        },
        "numeric" if mapping.target_type == "numeric" => match column.precision {
            Some(p) if p > 0 => format!("numeric({},{})", p, column.scale.unwrap_or(0)),
            _ => target.clone(),
        },
        _ => mapping.target_type.clone(),
    };
    Some(sized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_type_name() {
        assert_eq!(normalize_type_name("VARCHAR(20)"), "varchar");
        assert_eq!(normalize_type_name("numeric(18, 2)"), "numeric");
        assert_eq!(normalize_type_name("  Character  Varying(255) "), "character varying");
        assert_eq!(normalize_type_name("timestamp(3) without time zone"), "timestamp without time zone");
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry = TypeRegistry::from_mappings(mssql_to_postgres_mappings());
        assert_eq!(registry.map_type("BIT"), "boolean");
        assert_eq!(registry.map_type("NVarChar(50)"), "varchar");
        assert!(registry.get("bit").unwrap().requires_transformation);
    }

    #[test]
    fn test_unmapped_type_passes_through() {
        let registry = TypeRegistry::from_mappings(mssql_to_postgres_mappings());
        assert_eq!(registry.map_type("hierarchyid"), "hierarchyid");
        assert!(registry.get("hierarchyid").is_none());
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let mut registry = TypeRegistry::from_mappings(mssql_to_postgres_mappings());
        registry.extend([DataTypeMapping::new("datetime", "timestamptz")]);
        assert_eq!(registry.map_type("datetime"), "timestamptz");
    }

    #[test]
    fn test_target_type_for_column() {
        let registry = TypeRegistry::from_mappings(mssql_to_postgres_mappings());
        let mut column = ColumnDefinition::new("name", "nvarchar", true);
        column.max_length = Some(40);
        assert_eq!(target_type_for(&registry, &column).unwrap(), "varchar(40)");
        column.max_length = Some(-1);
        assert_eq!(target_type_for(&registry, &column).unwrap(), "text");

        let mut price = ColumnDefinition::new("price", "decimal", false);
        price.precision = Some(10);
        price.scale = Some(2);
        assert_eq!(target_type_for(&registry, &price).unwrap(), "numeric(10,2)");
    }
}
