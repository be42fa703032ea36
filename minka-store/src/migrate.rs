//! Schema creation and additive migration.
//!
//! Tables are created on first use of a kind. Migrations only ever add
//! `field_*` columns (when a type declares more indexable fields than the
//! existing schema has); nothing is dropped. Callers serialize access, so
//! concurrent registration of the same kind cannot interleave DDL.
use crate::{
    dialect::Dialect,
    error::Result,
    table::TableDefinition,
    templates::Templates,
};
use sqlx::{AnyPool, Row};
use std::collections::HashSet;
use tracing::{debug, info};

/// Ensure the per-database compaction watermark table exists
pub(crate) async fn ensure_compaction_table(pool: &AnyPool) -> Result<()> {
    sqlx::query(&Templates::create_compaction_table())
        .execute(pool)
        .await?;
    Ok(())
}

/// Create or migrate the table for one resource kind
pub(crate) async fn migrate_table(
    pool: &AnyPool,
    dialect: Dialect,
    templates: &Templates,
    def: &TableDefinition,
) -> Result<()> {
    let table = def.table_name();
    sqlx::query(&templates.create_table()).execute(pool).await?;

    let existing = existing_columns(pool, dialect, &table).await?;
    for column in def.field_columns() {
        if !existing.contains(&column) {
            info!(table = %table, column = %column, "adding indexed field column");
            sqlx::query(&templates.add_field_column(&column))
                .execute(pool)
                .await?;
        }
    }

    for stmt in templates.create_indexes() {
        sqlx::query(&stmt).execute(pool).await?;
    }
    debug!(table = %table, fields = def.indexed_fields.len(), "table ready");
    Ok(())
}

async fn existing_columns(
    pool: &AnyPool,
    dialect: Dialect,
    table: &str,
) -> Result<HashSet<String>> {
    let (sql, bind) = dialect.columns_query(table);
    let mut query = sqlx::query(&sql);
    if let Some(value) = bind {
        query = query.bind(value);
    }
    let rows = query.fetch_all(pool).await?;
    let mut columns = HashSet::new();
    for row in rows {
        let name: String = row.try_get("name")?;
        columns.insert(name);
    }
    Ok(columns)
}
