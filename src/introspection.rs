//! Schema Introspection Module
//!
//! Reads structural state (tables, columns, indexes, foreign keys, row
//! counts, size) from a live environment. Everything here is read-only.

use crate::config::MigrationConfig;
use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Structural snapshot of one environment at one moment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub environment: String,
    pub tables: BTreeMap<String, TableSchema>,
    pub database_size: String,
    pub database_size_bytes: i64,
}

/// Table representation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    pub row_count: i64,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Column representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub definition: String,
}

/// Foreign key relationship (one row per local column)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub constraint_name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Row of `info --constraints`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintInfo {
    pub table: String,
    pub constraint_name: String,
    pub constraint_type: String,
}

/// Anything that can describe an environment's schema.
/// The validator and orchestrator only see this trait.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    fn environment(&self) -> &str;

    async fn snapshot(&self) -> Result<SchemaSnapshot, AppError>;

    /// Current migration marker, `None` when the version table is absent or empty
    async fn migration_version(&self) -> Result<Option<String>, AppError>;
}

/// Schema introspector for PostgreSQL
pub struct PostgresIntrospector {
    pool: Pool,
    environment: String,
    schema: String,
    migrations: MigrationConfig,
}

impl PostgresIntrospector {
    pub fn new(
        pool: Pool,
        environment: impl Into<String>,
        schema: impl Into<String>,
        migrations: MigrationConfig,
    ) -> Self {
        Self {
            pool,
            environment: environment.into(),
            schema: schema.into(),
            migrations,
        }
    }

    /// Base tables of the configured schema, sorted by name
    pub async fn tables(&self) -> Result<Vec<String>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT table_name::text AS table_name
                FROM information_schema.tables
                WHERE table_schema = $1
                  AND table_type = 'BASE TABLE'
                ORDER BY table_name
                "#,
                &[&self.schema],
            )
            .await?;

        Ok(rows.iter().map(|row| row.get("table_name")).collect())
    }

    /// Introspect one table
    pub async fn table(&self, table: &str) -> Result<TableSchema, AppError> {
        let client = self.pool.get().await?;

        let column_rows = client
            .query(
                r#"
                SELECT
                    column_name::text AS column_name,
                    data_type::text AS data_type,
                    character_maximum_length::int4 AS max_length,
                    is_nullable::text AS is_nullable,
                    column_default::text AS column_default
                FROM information_schema.columns
                WHERE table_schema = $1 AND table_name = $2
                ORDER BY ordinal_position
                "#,
                &[&self.schema, &table],
            )
            .await?;

        let columns = column_rows
            .iter()
            .map(|row| Column {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.get::<_, String>("is_nullable") == "YES",
                default_value: row.get("column_default"),
                max_length: row.get("max_length"),
            })
            .collect();

        let index_rows = client
            .query(
                r#"
                SELECT indexname::text AS indexname, indexdef
                FROM pg_indexes
                WHERE schemaname = $1 AND tablename = $2
                ORDER BY indexname
                "#,
                &[&self.schema, &table],
            )
            .await?;

        let indexes = index_rows
            .iter()
            .map(|row| Index {
                name: row.get("indexname"),
                definition: row.get("indexdef"),
            })
            .collect();

        let fk_rows = client
            .query(
                r#"
                SELECT
                    tc.constraint_name::text AS constraint_name,
                    kcu.column_name::text AS column_name,
                    ccu.table_name::text AS foreign_table_name,
                    ccu.column_name::text AS foreign_column_name
                FROM information_schema.table_constraints AS tc
                JOIN information_schema.key_column_usage AS kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                JOIN information_schema.constraint_column_usage AS ccu
                    ON ccu.constraint_name = tc.constraint_name
                    AND ccu.constraint_schema = tc.table_schema
                WHERE tc.constraint_type = 'FOREIGN KEY'
                  AND tc.table_schema = $1
                  AND tc.table_name = $2
                ORDER BY tc.constraint_name, kcu.column_name
                "#,
                &[&self.schema, &table],
            )
            .await?;

        let foreign_keys = fk_rows
            .iter()
            .map(|row| ForeignKey {
                constraint_name: row.get("constraint_name"),
                column: row.get("column_name"),
                referenced_table: row.get("foreign_table_name"),
                referenced_column: row.get("foreign_column_name"),
            })
            .collect();

        let count_sql = format!(
            "SELECT COUNT(*) FROM {}.{}",
            quote_ident(&self.schema),
            quote_ident(table)
        );
        let row_count: i64 = client.query_one(count_sql.as_str(), &[]).await?.get(0);

        Ok(TableSchema {
            columns,
            indexes,
            foreign_keys,
            row_count,
        })
    }

    /// All constraints of the schema, ordered by table then type
    pub async fn constraints(&self) -> Result<Vec<ConstraintInfo>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT
                    tc.table_name::text AS table_name,
                    tc.constraint_name::text AS constraint_name,
                    tc.constraint_type::text AS constraint_type
                FROM information_schema.table_constraints tc
                WHERE tc.table_schema = $1
                ORDER BY tc.table_name, tc.constraint_type, tc.constraint_name
                "#,
                &[&self.schema],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| ConstraintInfo {
                table: row.get("table_name"),
                constraint_name: row.get("constraint_name"),
                constraint_type: row.get("constraint_type"),
            })
            .collect())
    }

    pub async fn server_version(&self) -> Result<String, AppError> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT version()", &[]).await?;
        Ok(row.get(0))
    }

    async fn database_size(&self) -> Result<(String, i64), AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT pg_size_pretty(pg_database_size(current_database())), pg_database_size(current_database())",
                &[],
            )
            .await?;
        Ok((row.get(0), row.get(1)))
    }
}

#[async_trait]
impl SchemaSource for PostgresIntrospector {
    fn environment(&self) -> &str {
        &self.environment
    }

    async fn snapshot(&self) -> Result<SchemaSnapshot, AppError> {
        let mut tables = BTreeMap::new();
        for name in self.tables().await? {
            let table = self.table(&name).await?;
            tables.insert(name, table);
        }

        let (database_size, database_size_bytes) = self.database_size().await?;

        debug!(
            "Introspected {} with {} tables ({})",
            self.environment,
            tables.len(),
            database_size
        );

        Ok(SchemaSnapshot {
            environment: self.environment.clone(),
            tables,
            database_size,
            database_size_bytes,
        })
    }

    async fn migration_version(&self) -> Result<Option<String>, AppError> {
        let client = self.pool.get().await?;

        // to_regclass yields NULL instead of failing when the table is absent
        let exists: Option<String> = client
            .query_one(
                "SELECT to_regclass($1)::text",
                &[&self.migrations.version_table],
            )
            .await?
            .get(0);
        if exists.is_none() {
            debug!("No {} table on {}", self.migrations.version_table, self.environment);
            return Ok(None);
        }

        let sql = format!(
            "SELECT {}::text FROM {} LIMIT 1",
            quote_ident(&self.migrations.version_column),
            quote_qualified(&self.migrations.version_table)
        );
        let row = client.query_opt(sql.as_str(), &[]).await?;
        Ok(row.and_then(|r| r.get::<_, Option<String>>(0)))
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// In-memory schema source for tests
    pub struct StaticSchema {
        pub snapshot: SchemaSnapshot,
        pub version: Option<String>,
    }

    impl StaticSchema {
        pub fn new(snapshot: SchemaSnapshot, version: Option<&str>) -> Self {
            Self {
                snapshot,
                version: version.map(str::to_string),
            }
        }
    }

    #[async_trait]
    impl SchemaSource for StaticSchema {
        fn environment(&self) -> &str {
            &self.snapshot.environment
        }

        async fn snapshot(&self) -> Result<SchemaSnapshot, AppError> {
            Ok(self.snapshot.clone())
        }

        async fn migration_version(&self) -> Result<Option<String>, AppError> {
            Ok(self.version.clone())
        }
    }

    pub fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            default_value: None,
            max_length: None,
        }
    }

    pub fn table(columns: &[(&str, &str)], row_count: i64) -> TableSchema {
        TableSchema {
            columns: columns.iter().map(|(n, t)| column(n, t)).collect(),
            row_count,
            ..Default::default()
        }
    }

    pub fn snapshot(environment: &str, tables: Vec<(&str, TableSchema)>) -> SchemaSnapshot {
        SchemaSnapshot {
            environment: environment.to_string(),
            tables: tables.into_iter().map(|(n, t)| (n.to_string(), t)).collect(),
            database_size: "8192 kB".to_string(),
            database_size_bytes: 8192 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_qualified("public.alembic_version"), "\"public\".\"alembic_version\"");
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = testing::snapshot("dev", vec![("users", testing::table(&[("id", "integer")], 3))]);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["tables"]["users"]["rowCount"], 3);
        assert_eq!(json["databaseSize"], "8192 kB");
        assert!(json["tables"]["users"]["columns"][0].get("maxLength").is_none());
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = testing::StaticSchema::new(testing::snapshot("prod", vec![]), Some("abc123"));
        assert_eq!(source.environment(), "prod");
        assert_eq!(source.migration_version().await.unwrap().as_deref(), Some("abc123"));
        assert!(source.snapshot().await.unwrap().tables.is_empty());
    }
}
