//! PostgreSQL catalog queries. `$1` is the schema, `$2` the table.
//!
//! Every column is cast to a plain type so catalog domains such as
//! `sql_identifier` decode as text.

use crate::introspect::CatalogQueries;

pub(super) static CATALOG: CatalogQueries = CatalogQueries {
    schemas: r#"
        SELECT nspname::text AS schema_name
        FROM pg_namespace
        WHERE nspname NOT LIKE 'pg\_%'
          AND nspname <> 'information_schema'
        ORDER BY nspname
    "#,

    tables: r#"
        SELECT table_name::text AS table_name
        FROM information_schema.tables
        WHERE table_schema = $1::text AND table_type = 'BASE TABLE'
        ORDER BY table_name
    "#,

    columns: r#"
        SELECT
            c.column_name::text AS column_name,
            CASE WHEN c.data_type IN ('USER-DEFINED', 'ARRAY')
                 THEN c.udt_name::text
                 ELSE c.data_type::text
            END AS data_type,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            COALESCE(c.character_maximum_length, 0)::int8 AS max_length,
            COALESCE(c.numeric_precision, 0)::int8 AS numeric_precision,
            c.numeric_scale::int8 AS numeric_scale,
            (c.is_identity = 'YES' OR COALESCE(c.column_default, '') LIKE 'nextval(%') AS is_identity
        FROM information_schema.columns c
        WHERE c.table_schema = $1::text AND c.table_name = $2::text
        ORDER BY c.ordinal_position
    "#,

    primary_keys: r#"
        SELECT a.attname::text AS column_name
        FROM pg_index i
        JOIN pg_class t ON t.oid = i.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE i.indisprimary AND n.nspname = $1::text AND t.relname = $2::text
        ORDER BY k.ord
    "#,

    foreign_keys: r#"
        SELECT
            con.conname::text AS constraint_name,
            a.attname::text AS column_name,
            rn.nspname::text AS referenced_schema,
            rt.relname::text AS referenced_table,
            ra.attname::text AS referenced_column,
            CASE con.confdeltype
                WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL'
                WHEN 'd' THEN 'SET DEFAULT' WHEN 'r' THEN 'RESTRICT'
                ELSE 'NO ACTION'
            END AS delete_rule,
            CASE con.confupdtype
                WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL'
                WHEN 'd' THEN 'SET DEFAULT' WHEN 'r' THEN 'RESTRICT'
                ELSE 'NO ACTION'
            END AS update_rule
        FROM pg_constraint con
        JOIN pg_class t ON t.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_class rt ON rt.oid = con.confrelid
        JOIN pg_namespace rn ON rn.oid = rt.relnamespace
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refnum, ord)
        JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
        JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refnum
        WHERE con.contype = 'f' AND n.nspname = $1::text AND t.relname = $2::text
        ORDER BY con.conname, k.ord
    "#,

    indexes: r#"
        SELECT
            ic.relname::text AS index_name,
            a.attname::text AS column_name,
            i.indisunique AS is_unique,
            i.indisprimary AS is_primary
        FROM pg_index i
        JOIN pg_class ic ON ic.oid = i.indexrelid
        JOIN pg_class t ON t.oid = i.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE n.nspname = $1::text AND t.relname = $2::text
        ORDER BY ic.relname, k.ord
    "#,

    constraints: r#"
        SELECT
            tc.constraint_name::text AS constraint_name,
            tc.constraint_type::text AS constraint_type,
            ccu.column_name::text AS column_name,
            cc.check_clause::text AS check_clause
        FROM information_schema.table_constraints tc
        LEFT JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_name = tc.constraint_name
            AND ccu.table_schema = tc.table_schema
            AND ccu.table_name = tc.table_name
        LEFT JOIN information_schema.check_constraints cc
            ON cc.constraint_name = tc.constraint_name
            AND cc.constraint_schema = tc.constraint_schema
        WHERE tc.table_schema = $1::text AND tc.table_name = $2::text
          AND tc.constraint_name::text NOT LIKE '%\_not\_null'
        ORDER BY tc.constraint_name
    "#,
};
