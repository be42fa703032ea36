//! Parameterized SQL fragments, rendered per resource table and dialect.
//!
//! Every statement the engine executes is produced here; the store,
//! migrator and compactor never concatenate SQL themselves. Placeholders
//! are positional and dialect-rendered (`?` for SQLite, `$n` for
//! PostgreSQL), and bind values travel alongside the text as [`Arg`]s so
//! statements stay inspectable in tests and logs.
use crate::dialect::Dialect;
use sqlx::{any::AnyArguments, query::Query, Any};

/// The revision columns every statement selects, in decode order
const REVISION_COLUMNS: &str = "id, name, namespace, uid, previous_id, created, deleted, value";

/// Name of the per-database watermark table
pub(crate) const COMPACTION_TABLE: &str = "compaction";

/// A positional bind value
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Arg {
    /// A 64-bit integer
    Int(i64),
    /// A text value
    Text(String),
    /// SQL NULL typed as a 64-bit integer
    NullInt,
}

/// A rendered statement plus its bind values
#[derive(Clone, Debug)]
pub(crate) struct Sql {
    pub(crate) text: String,
    pub(crate) args: Vec<Arg>,
}

impl Sql {
    /// Bind the arguments onto a sqlx query for execution
    pub(crate) fn query(&self) -> Query<'_, Any, AnyArguments<'_>> {
        let mut query = sqlx::query(&self.text);
        for arg in &self.args {
            query = match arg {
                Arg::Int(v) => query.bind(*v),
                Arg::Text(s) => query.bind(s.clone()),
                Arg::NullInt => query.bind(None::<i64>),
            };
        }
        query
    }
}

/// Incremental statement builder tracking placeholder positions
pub(crate) struct SqlBuilder {
    dialect: Dialect,
    text: String,
    args: Vec<Arg>,
}

impl SqlBuilder {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            text: String::new(),
            args: Vec::new(),
        }
    }

    /// Append literal SQL text
    pub(crate) fn push(&mut self, sql: &str) -> &mut Self {
        self.text.push_str(sql);
        self
    }

    /// Append a placeholder and record its bind value
    pub(crate) fn bind(&mut self, arg: Arg) -> &mut Self {
        let placeholder = self.dialect.placeholder(self.args.len() + 1);
        self.text.push_str(&placeholder);
        self.args.push(arg);
        self
    }

    pub(crate) fn finish(self) -> Sql {
        Sql {
            text: self.text,
            args: self.args,
        }
    }
}

/// Indexed predicates a list or watch query pushes into SQL
#[derive(Clone, Debug, Default)]
pub(crate) struct Predicates {
    /// Restrict to one namespace; `None` lists across namespaces
    pub(crate) namespace: Option<String>,
    /// Equality predicates on `field_*` columns: `(column, value)`
    pub(crate) fields: Vec<(String, String)>,
}

impl Predicates {
    fn render(&self, b: &mut SqlBuilder, prefix: &str) {
        if let Some(ns) = &self.namespace {
            b.push(&format!(" AND {prefix}namespace = "));
            b.bind(Arg::Text(ns.clone()));
        }
        for (column, value) in &self.fields {
            b.push(&format!(" AND {prefix}{column} = "));
            b.bind(Arg::Text(value.clone()));
        }
    }
}

/// The per-table statement registry
#[derive(Clone, Debug)]
pub(crate) struct Templates {
    dialect: Dialect,
    table: String,
    field_columns: Vec<String>,
}

impl Templates {
    pub(crate) fn new(dialect: Dialect, table: &str, field_columns: Vec<String>) -> Self {
        Self {
            dialect,
            table: table.to_string(),
            field_columns,
        }
    }

    fn quoted(&self) -> String {
        format!("\"{}\"", self.table)
    }

    // --- DDL ---

    pub(crate) fn create_table(&self) -> String {
        let mut columns = vec![
            format!("id {}", self.dialect.autoincrement_pk()),
            "name TEXT NOT NULL".into(),
            "namespace TEXT NOT NULL".into(),
            "uid TEXT NOT NULL".into(),
            "previous_id BIGINT".into(),
            "created BIGINT".into(),
            "deleted BIGINT NOT NULL DEFAULT 0".into(),
            "value TEXT NOT NULL".into(),
        ];
        for column in &self.field_columns {
            columns.push(format!("{column} TEXT"));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quoted(),
            columns.join(", ")
        )
    }

    pub(crate) fn create_indexes(&self) -> Vec<String> {
        let mut stmts = vec![
            format!(
                "CREATE INDEX IF NOT EXISTS \"{t}_key_idx\" ON {q} (namespace, name, id DESC)",
                t = self.table,
                q = self.quoted()
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS \"{t}_previous_idx\" ON {q} (previous_id)",
                t = self.table,
                q = self.quoted()
            ),
        ];
        for column in &self.field_columns {
            stmts.push(self.create_field_index(column));
        }
        stmts
    }

    pub(crate) fn create_field_index(&self, column: &str) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS \"{t}_{column}_idx\" ON {q} ({column})",
            t = self.table,
            q = self.quoted()
        )
    }

    pub(crate) fn add_field_column(&self, column: &str) -> String {
        format!("ALTER TABLE {} ADD COLUMN {column} TEXT", self.quoted())
    }

    pub(crate) fn create_compaction_table() -> String {
        format!("CREATE TABLE IF NOT EXISTS {COMPACTION_TABLE} (name TEXT PRIMARY KEY, id BIGINT NOT NULL)")
    }

    // --- writes ---

    /// Insert one revision row, returning its assigned id.
    ///
    /// Bind order: name, namespace, uid, previous_id, created, deleted,
    /// value, then one value per declared field column.
    pub(crate) fn insert(&self, row: InsertRow) -> Sql {
        let mut b = SqlBuilder::new(self.dialect);
        b.push(&format!("INSERT INTO {} ({}) VALUES (", self.quoted(), self.insert_columns()));
        self.bind_insert_values(&mut b, row);
        b.push(") RETURNING id");
        b.finish()
    }

    /// Insert a create revision only if no live current revision exists
    /// for the key; returns zero rows to a loser of a create race.
    pub(crate) fn insert_if_absent(&self, row: InsertRow) -> Sql {
        let namespace = row.namespace.clone();
        let name = row.name.clone();
        let mut b = SqlBuilder::new(self.dialect);
        b.push(&format!("INSERT INTO {} ({}) SELECT ", self.quoted(), self.insert_columns()));
        self.bind_insert_values(&mut b, row);
        b.push(&format!(
            " WHERE NOT EXISTS (SELECT 1 FROM {q} c WHERE c.namespace = ",
            q = self.quoted()
        ));
        b.bind(Arg::Text(namespace));
        b.push(" AND c.name = ");
        b.bind(Arg::Text(name));
        b.push(&format!(
            " AND c.deleted = 0 AND c.id = (SELECT MAX(m.id) FROM {q} m WHERE m.namespace = c.namespace AND m.name = c.name)) RETURNING id",
            q = self.quoted()
        ));
        b.finish()
    }

    fn insert_columns(&self) -> String {
        let mut columns = vec![
            "name", "namespace", "uid", "previous_id", "created", "deleted", "value",
        ]
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
        columns.extend(self.field_columns.iter().cloned());
        columns.join(", ")
    }

    fn bind_insert_values(&self, b: &mut SqlBuilder, row: InsertRow) {
        let mut first = true;
        let mut bind = |b: &mut SqlBuilder, arg: Arg| {
            if !first {
                b.push(", ");
            }
            first = false;
            b.bind(arg);
        };
        let InsertRow {
            name,
            namespace,
            uid,
            previous_id,
            created,
            deleted,
            value,
            fields,
        } = row;
        bind(b, Arg::Text(name));
        bind(b, Arg::Text(namespace));
        bind(b, Arg::Text(uid));
        bind(
            b,
            previous_id.map(Arg::Int).unwrap_or(Arg::NullInt),
        );
        bind(b, created.map(Arg::Int).unwrap_or(Arg::NullInt));
        bind(b, Arg::Int(deleted));
        bind(b, Arg::Text(value));
        for field in fields {
            bind(b, field.map(Arg::Text).unwrap_or(Arg::NullInt));
        }
    }

    // --- reads ---

    /// The newest revision (live or tombstone) for one key
    pub(crate) fn latest(&self, namespace: &str, name: &str, lock: bool) -> Sql {
        let mut b = SqlBuilder::new(self.dialect);
        b.push(&format!(
            "SELECT {REVISION_COLUMNS} FROM {} WHERE namespace = ",
            self.quoted()
        ));
        b.bind(Arg::Text(namespace.to_string()));
        b.push(" AND name = ");
        b.bind(Arg::Text(name.to_string()));
        b.push(" ORDER BY id DESC LIMIT 1");
        if lock {
            b.push(self.dialect.for_update());
        }
        b.finish()
    }

    /// The highest assigned revision id, or 0 for an empty table
    pub(crate) fn max_id(&self) -> Sql {
        Sql {
            text: format!("SELECT COALESCE(MAX(id), 0) AS id FROM {}", self.quoted()),
            args: vec![],
        }
    }

    /// One page of the current live revisions as of `snapshot`, ordered by
    /// `(namespace, name)`, optionally resuming after a key
    pub(crate) fn select_current(
        &self,
        snapshot: i64,
        predicates: &Predicates,
        after: Option<(&str, &str)>,
        limit: i64,
    ) -> Sql {
        let q = self.quoted();
        let mut b = SqlBuilder::new(self.dialect);
        b.push(&format!(
            "SELECT t.id, t.name, t.namespace, t.uid, t.previous_id, t.created, t.deleted, t.value \
             FROM {q} t JOIN (SELECT namespace, name, MAX(id) AS max_id FROM {q} WHERE id <= "
        ));
        b.bind(Arg::Int(snapshot));
        b.push(
            " GROUP BY namespace, name) cur ON cur.namespace = t.namespace AND cur.name = t.name \
             AND cur.max_id = t.id WHERE t.deleted = 0",
        );
        predicates.render(&mut b, "t.");
        if let Some((namespace, name)) = after {
            b.push(" AND (t.namespace > ");
            b.bind(Arg::Text(namespace.to_string()));
            b.push(" OR (t.namespace = ");
            b.bind(Arg::Text(namespace.to_string()));
            b.push(" AND t.name > ");
            b.bind(Arg::Text(name.to_string()));
            b.push("))");
        }
        b.push(" ORDER BY t.namespace, t.name LIMIT ");
        b.bind(Arg::Int(limit));
        b.finish()
    }

    /// Revisions strictly after `cursor` in commit order, bounded by `limit`
    pub(crate) fn select_since(&self, cursor: i64, predicates: &Predicates, limit: i64) -> Sql {
        let mut b = SqlBuilder::new(self.dialect);
        b.push(&format!(
            "SELECT {REVISION_COLUMNS} FROM {} WHERE id > ",
            self.quoted()
        ));
        b.bind(Arg::Int(cursor));
        predicates.render(&mut b, "");
        b.push(" ORDER BY id LIMIT ");
        b.bind(Arg::Int(limit));
        b.finish()
    }

    // --- compaction ---

    /// The stored watermark for this table, if any
    pub(crate) fn watermark_get(&self) -> Sql {
        let mut b = SqlBuilder::new(self.dialect);
        b.push(&format!("SELECT id FROM {COMPACTION_TABLE} WHERE name = "));
        b.bind(Arg::Text(self.table.clone()));
        b.finish()
    }

    /// Publish a new watermark for this table
    pub(crate) fn watermark_upsert(&self, watermark: i64) -> Sql {
        let mut b = SqlBuilder::new(self.dialect);
        b.push(&format!("INSERT INTO {COMPACTION_TABLE} (name, id) VALUES ("));
        b.bind(Arg::Text(self.table.clone()));
        b.push(", ");
        b.bind(Arg::Int(watermark));
        b.push(") ON CONFLICT (name) DO UPDATE SET id = excluded.id");
        b.finish()
    }

    /// The highest id among revisions that already have a successor
    pub(crate) fn compaction_candidate(&self) -> Sql {
        let q = self.quoted();
        Sql {
            text: format!(
                "SELECT COALESCE(MAX(p.id), 0) AS id FROM {q} p \
                 WHERE EXISTS (SELECT 1 FROM {q} s WHERE s.previous_id = p.id)"
            ),
            args: vec![],
        }
    }

    /// Delete superseded revisions at or below the watermark
    pub(crate) fn delete_superseded(&self, watermark: i64) -> Sql {
        let q = self.quoted();
        let mut b = SqlBuilder::new(self.dialect);
        b.push(&format!("DELETE FROM {q} WHERE id <= "));
        b.bind(Arg::Int(watermark));
        b.push(&format!(
            " AND EXISTS (SELECT 1 FROM {q} s WHERE s.previous_id = {q}.id)"
        ));
        b.finish()
    }

    /// Delete tombstones at or below the watermark whose key has since been
    /// re-created; the newest tombstone of a dead chain is never touched
    pub(crate) fn delete_reclaimed_tombstones(&self, watermark: i64) -> Sql {
        let q = self.quoted();
        let mut b = SqlBuilder::new(self.dialect);
        b.push(&format!("DELETE FROM {q} WHERE deleted = 1 AND id <= "));
        b.bind(Arg::Int(watermark));
        b.push(&format!(
            " AND EXISTS (SELECT 1 FROM {q} n WHERE n.namespace = {q}.namespace \
             AND n.name = {q}.name AND n.id > {q}.id)"
        ));
        b.finish()
    }
}

/// One revision row about to be inserted
pub(crate) struct InsertRow {
    pub(crate) name: String,
    pub(crate) namespace: String,
    pub(crate) uid: String,
    pub(crate) previous_id: Option<i64>,
    pub(crate) created: Option<i64>,
    pub(crate) deleted: i64,
    pub(crate) value: String,
    /// Extracted values for each declared field column, in order
    pub(crate) fields: Vec<Option<String>>,
}

/// Mask the contents of single-quoted literals for logging.
///
/// Doubled quotes inside a literal are treated as escapes.
pub(crate) fn redact(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c != '\'' {
            continue;
        }
        // inside a literal; swallow until the closing quote
        while let Some(inner) = chars.next() {
            if inner == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    continue;
                }
                out.push_str("?'");
                break;
            }
        }
    }
    out
}
