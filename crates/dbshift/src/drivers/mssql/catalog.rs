//! SQL Server catalog queries. `@P1` is the schema, `@P2` the table.

use crate::introspect::CatalogQueries;

pub(super) static CATALOG: CatalogQueries = CatalogQueries {
    schemas: r#"
        SELECT name AS schema_name
        FROM sys.schemas
        WHERE schema_id < 16384
          AND name NOT IN ('sys', 'INFORMATION_SCHEMA', 'guest')
        ORDER BY name
    "#,

    tables: r#"
        SELECT TABLE_NAME AS table_name
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = @P1 AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
    "#,

    columns: r#"
        SELECT
            COLUMN_NAME AS column_name,
            DATA_TYPE AS data_type,
            IS_NULLABLE AS is_nullable,
            COLUMN_DEFAULT AS column_default,
            CAST(ISNULL(CHARACTER_MAXIMUM_LENGTH, 0) AS INT) AS max_length,
            CAST(ISNULL(NUMERIC_PRECISION, 0) AS INT) AS numeric_precision,
            CAST(NUMERIC_SCALE AS INT) AS numeric_scale,
            ISNULL(COLUMNPROPERTY(OBJECT_ID(QUOTENAME(TABLE_SCHEMA) + '.' + QUOTENAME(TABLE_NAME)),
                   COLUMN_NAME, 'IsIdentity'), 0) AS is_identity
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
        ORDER BY ORDINAL_POSITION
    "#,

    primary_keys: r#"
        SELECT c.COLUMN_NAME AS column_name
        FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
        JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
            ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
            AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
            AND c.TABLE_NAME = tc.TABLE_NAME
        WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
          AND tc.TABLE_SCHEMA = @P1
          AND tc.TABLE_NAME = @P2
        ORDER BY c.ORDINAL_POSITION
    "#,

    foreign_keys: r#"
        SELECT
            fk.name AS constraint_name,
            pc.name AS column_name,
            rs.name AS referenced_schema,
            rt.name AS referenced_table,
            rc.name AS referenced_column,
            fk.delete_referential_action_desc AS delete_rule,
            fk.update_referential_action_desc AS update_rule
        FROM sys.foreign_keys fk
        JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
        JOIN sys.tables pt ON pt.object_id = fk.parent_object_id
        JOIN sys.schemas ps ON ps.schema_id = pt.schema_id
        JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
        JOIN sys.tables rt ON rt.object_id = fk.referenced_object_id
        JOIN sys.schemas rs ON rs.schema_id = rt.schema_id
        JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
        WHERE ps.name = @P1 AND pt.name = @P2
        ORDER BY fk.name, fkc.constraint_column_id
    "#,

    indexes: r#"
        SELECT
            i.name AS index_name,
            c.name AS column_name,
            CAST(i.is_unique AS INT) AS is_unique,
            CAST(i.is_primary_key AS INT) AS is_primary
        FROM sys.indexes i
        JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
        JOIN sys.tables t ON t.object_id = i.object_id
        JOIN sys.schemas s ON s.schema_id = t.schema_id
        WHERE s.name = @P1 AND t.name = @P2
          AND i.name IS NOT NULL
          AND ic.is_included_column = 0
        ORDER BY i.name, ic.key_ordinal
    "#,

    constraints: r#"
        SELECT
            tc.CONSTRAINT_NAME AS constraint_name,
            tc.CONSTRAINT_TYPE AS constraint_type,
            ccu.COLUMN_NAME AS column_name,
            cc.CHECK_CLAUSE AS check_clause
        FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
        LEFT JOIN INFORMATION_SCHEMA.CONSTRAINT_COLUMN_USAGE ccu
            ON ccu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
            AND ccu.TABLE_SCHEMA = tc.TABLE_SCHEMA
            AND ccu.TABLE_NAME = tc.TABLE_NAME
        LEFT JOIN INFORMATION_SCHEMA.CHECK_CONSTRAINTS cc
            ON cc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
            AND cc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
        WHERE tc.TABLE_SCHEMA = @P1 AND tc.TABLE_NAME = @P2
        ORDER BY tc.CONSTRAINT_NAME
    "#,
};
