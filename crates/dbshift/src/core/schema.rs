//! Schema and metadata types for tables, columns, keys, indexes, and constraints.
//!
//! A [`TableSchema`] is produced fresh by introspection and treated as a
//! read-only snapshot for the duration of one table's migration.

use serde::{Deserialize, Serialize};

/// Types SQL Server or PostgreSQL refuse in `ORDER BY`.
const UNSORTABLE_TYPES: &[&str] = &[
    "text", "ntext", "image", "xml", "geography", "geometry", "sql_variant", "json", "point",
];

/// Table metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,

    /// Schema / namespace, when the dialect has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Column definitions in ordinal order.
    pub columns: Vec<ColumnDefinition>,

    /// Primary key column names in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,

    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDefinition>,

    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,

    #[serde(default)]
    pub constraints: Vec<ConstraintDefinition>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, schema: Option<String>) -> Self {
        Self {
            name: name.into(),
            schema,
            ..Default::default()
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    /// Find a column by name, ignoring ASCII case.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns used for a deterministic read order.
    ///
    /// The primary key, else a unique index over NOT NULL columns, else a
    /// NOT NULL unique column, else every column whose type can be sorted.
    pub fn order_columns(&self) -> Vec<String> {
        if !self.primary_key.is_empty() {
            return self.primary_key.clone();
        }

        let not_null = |name: &String| self.column(name).is_some_and(|c| !c.nullable);
        if let Some(index) = self
            .indexes
            .iter()
            .filter(|i| i.unique && !i.columns.is_empty())
            .find(|i| i.columns.iter().all(not_null))
        {
            return index.columns.clone();
        }
        if let Some(column) = self.columns.iter().find(|c| c.unique && !c.nullable) {
            return vec![column.name.clone()];
        }

        let sortable: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !UNSORTABLE_TYPES.contains(&c.base_type().as_str()))
            .map(|c| c.name.clone())
            .collect();
        if sortable.is_empty() {
            return self.columns.first().map(|c| vec![c.name.clone()]).unwrap_or_default();
        }
        sortable
    }

    /// The first foreign key pointing back at this same table.
    pub fn self_reference(&self) -> Option<&ForeignKeyDefinition> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.is_self_referential(&self.name, self.schema.as_deref()))
    }

    pub fn is_self_referential(&self) -> bool {
        self.self_reference().is_some()
    }
}

/// Column metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,

    /// Declared type as reported by the catalog (e.g. `nvarchar`, `int4`).
    pub data_type: String,

    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    /// Character length; -1 for MAX types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<i32>,

    #[serde(default)]
    pub auto_increment: bool,

    #[serde(default)]
    pub unique: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            ..Default::default()
        }
    }

    /// Lowercased type name without length/precision suffix.
    pub fn base_type(&self) -> String {
        crate::typemap::normalize_type_name(&self.data_type)
    }

    /// True when the target column stores booleans.
    pub fn is_boolean(&self) -> bool {
        matches!(self.base_type().as_str(), "boolean" | "bool" | "bit")
    }
}

/// Action taken by the database when a referenced row is deleted or updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    #[default]
    NoAction,
}

impl ReferentialAction {
    /// Parse a catalog rule string. Unknown rules read as `NO ACTION`.
    pub fn parse(rule: &str) -> Self {
        match rule.trim().to_uppercase().replace('_', " ").as_str() {
            "CASCADE" => ReferentialAction::Cascade,
            "SET NULL" => ReferentialAction::SetNull,
            "SET DEFAULT" => ReferentialAction::SetDefault,
            "RESTRICT" => ReferentialAction::Restrict,
            _ => ReferentialAction::NoAction,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// Foreign key metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_schema: Option<String>,
    pub referenced_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
}

impl ForeignKeyDefinition {
    /// True when the key references the table that owns it.
    pub fn is_self_referential(&self, table: &str, schema: Option<&str>) -> bool {
        if !self.referenced_table.eq_ignore_ascii_case(table) {
            return false;
        }
        match (self.referenced_schema.as_deref(), schema) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }
}

/// Index metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    Check,
    ForeignKey,
}

impl ConstraintKind {
    /// Parse an `information_schema.table_constraints.constraint_type` value.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_uppercase().replace('_', " ").as_str() {
            "PRIMARY KEY" => Some(ConstraintKind::PrimaryKey),
            "UNIQUE" => Some(ConstraintKind::Unique),
            "CHECK" => Some(ConstraintKind::Check),
            "FOREIGN KEY" => Some(ConstraintKind::ForeignKey),
            _ => None,
        }
    }
}

/// Table-level constraint metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDefinition {
    pub name: String,
    pub kind: ConstraintKind,
    #[serde(default)]
    pub columns: Vec<String>,
    /// Check expression, when the catalog exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category() -> TableSchema {
        TableSchema {
            name: "category".into(),
            schema: Some("public".into()),
            columns: vec![
                ColumnDefinition::new("id", "integer", false),
                ColumnDefinition::new("parent_id", "integer", true),
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![ForeignKeyDefinition {
                name: "fk_category_parent".into(),
                columns: vec!["parent_id".into()],
                referenced_table: "category".into(),
                referenced_schema: Some("public".into()),
                referenced_columns: vec!["id".into()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_self_reference_detection() {
        let table = category();
        let fk = table.self_reference().unwrap();
        assert_eq!(fk.columns, vec!["parent_id"]);

        let mut other = category();
        other.foreign_keys[0].referenced_table = "product".into();
        assert!(!other.is_self_referential());
    }

    #[test]
    fn test_column_lookup_ignores_case() {
        let table = category();
        assert!(table.has_column("PARENT_ID"));
        assert!(!table.has_column("missing"));
    }

    #[test]
    fn test_order_columns_prefer_primary_key() {
        let table = category();
        assert_eq!(table.order_columns(), vec!["id"]);
    }

    #[test]
    fn test_order_columns_without_primary_key() {
        let mut table = TableSchema::new("events", None);
        table.columns = vec![
            ColumnDefinition::new("kind", "varchar", false),
            ColumnDefinition::new("code", "varchar", false),
            ColumnDefinition::new("seq", "int", false),
            ColumnDefinition::new("payload", "xml", true),
        ];
        // Duplicate values in `kind` must not decide page boundaries alone.
        assert_eq!(table.order_columns(), vec!["kind", "code", "seq"]);

        table.columns[1].unique = true;
        assert_eq!(table.order_columns(), vec!["code"]);

        table.indexes = vec![
            IndexDefinition {
                name: "ux_events_payload".into(),
                columns: vec!["payload".into()],
                unique: true,
                primary: false,
            },
            IndexDefinition {
                name: "ux_events_kind_seq".into(),
                columns: vec!["kind".into(), "seq".into()],
                unique: true,
                primary: false,
            },
        ];
        assert_eq!(table.order_columns(), vec!["kind", "seq"]);
    }

    #[test]
    fn test_referential_action_parse() {
        assert_eq!(ReferentialAction::parse("SET_NULL"), ReferentialAction::SetNull);
        assert_eq!(ReferentialAction::parse("set null"), ReferentialAction::SetNull);
        assert_eq!(ReferentialAction::parse("CASCADE"), ReferentialAction::Cascade);
        assert_eq!(ReferentialAction::parse("NO_ACTION"), ReferentialAction::NoAction);
        assert_eq!(ReferentialAction::parse("bogus"), ReferentialAction::NoAction);
    }

    #[test]
    fn test_boolean_column() {
        assert!(ColumnDefinition::new("is_valid", "BOOLEAN", false).is_boolean());
        assert!(!ColumnDefinition::new("name", "varchar(20)", true).is_boolean());
    }
}
