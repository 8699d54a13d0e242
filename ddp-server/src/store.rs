//! Store adapter: the PostgreSQL-backed boundary between DDP semantics and
//! SQL. Owns one pooled connection (`sqlx::PgPool`) for queries and one
//! dedicated connection (`sqlx::postgres::PgListener`) for `LISTEN`.
//!
//! `filter_visible` is the one place `user_rel` visibility and the
//! snapshot-upper-bound (`xmin`) cutoff are applied; every other module
//! that needs "what rows can this user see as of this point in time" goes
//! through it rather than building its own SQL.

use crate::registry::CollectionDef;
use ddp_core::{Error, Result};
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::{PgPool, Row};
use std::sync::Arc;

/// A parameterized filter over a collection's rows, produced by a
/// publication. `clause` is a SQL boolean expression referencing the
/// collection's own columns (no table-qualification); `args` are bound
/// positionally as `$1, $2, …` following any adapter-added predicates.
#[derive(Debug, Clone)]
pub struct Query {
    pub clause: Option<String>,
    pub args: Vec<Value>,
}

impl Query {
    /// A query matching every row (subject only to visibility filtering).
    pub fn all() -> Self {
        Self {
            clause: None,
            args: Vec::new(),
        }
    }

    pub fn with_clause(clause: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            clause: Some(clause.into()),
            args,
        }
    }
}

/// A single row read back from the store, identified by primary key.
#[derive(Debug, Clone)]
pub struct StoreRow {
    pub pk: String,
    pub fields: Value,
}

/// Kind of change a routed frame carries: see [`crate::change_router::write_and_route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Collection name prefixes that never generate traffic: internal
/// bookkeeping tables, never a DDP collection.
const RESERVED_PREFIXES: &[&str] = &["ddp_", "migrations_"];

pub fn is_reserved_collection(name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// The PostgreSQL-backed store adapter.
pub struct StoreAdapter {
    pool: PgPool,
}

impl StoreAdapter {
    /// Connect the pooled query connection. The dedicated LISTEN connection
    /// is opened separately via [`StoreAdapter::listen`], since it has its
    /// own lifecycle (one task owns it for the process's lifetime).
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| Error::Store(format!("failed to connect to postgres: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The current transaction id, used as a subscription's snapshot upper
    /// bound: rows created by a transaction newer than this are excluded
    /// from initial sync and only ever arrive as live updates.
    pub async fn snapshot_id(&self) -> Result<i64> {
        let row = sqlx::query("SELECT txid_current_snapshot()::text AS snap")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("failed to read snapshot id: {e}")))?;
        let snap: String = row
            .try_get("snap")
            .map_err(|e| Error::Store(format!("malformed snapshot id: {e}")))?;
        // txid_current_snapshot() is "xmin:xmax:xip_list"; xmax is the
        // watermark below which every transaction has already committed or
        // aborted, so it's the value we want as an upper bound.
        let xmax = snap
            .split(':')
            .nth(1)
            .ok_or_else(|| Error::Store(format!("unparseable snapshot id: {snap}")))?;
        xmax.parse()
            .map_err(|e| Error::Store(format!("non-numeric snapshot xmax {xmax:?}: {e}")))
    }

    /// Rows of `collection` visible to `acting_user`, subject to the
    /// collection's `user_rel` restriction, the publication's `query`, and
    /// an optional `snapshot_upper` transaction-id cutoff.
    ///
    /// `user_rel` traversals are rewritten as `pk IN (SELECT …)` subqueries
    /// rather than joins, so the planner evaluates each relation path
    /// independently instead of producing a join product across all of
    /// them.
    pub async fn filter_visible(
        &self,
        collection: &CollectionDef,
        query: &Query,
        acting_user: Option<&str>,
        snapshot_upper: Option<i64>,
    ) -> Result<Vec<StoreRow>> {
        let mut args: Vec<Value> = Vec::new();
        let Some(where_clause) = visibility_clause(collection, query, acting_user, snapshot_upper, &mut args) else {
            return Ok(Vec::new());
        };

        let order_clause = collection
            .order_by
            .as_ref()
            .map(|o| format!(" ORDER BY {o}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT pk, row_to_json({table}.*) AS fields FROM {table} WHERE {where}{order}",
            table = collection.table,
            where = where_clause,
            order = order_clause,
        );

        self.rows_for(&sql, &args, &collection.name).await
    }

    /// Rows of `collection` visible to `target_query`/`target_user` but not
    /// visible to any of `shadows`, expressed as a single SQL statement: the
    /// target's own visibility clause combined with a `pk NOT IN (…)`
    /// anti-join over the union of each shadow's visibility clause. This is
    /// the mergebox `unique()` primitive; it exists so the "other
    /// subscriptions" side of the diff never has to be materialized in
    /// memory.
    ///
    /// A shadow under which nothing is visible (a restricted collection with
    /// no acting user) contributes no rows to the anti-join rather than
    /// failing the whole query. It simply shadows nothing.
    #[allow(clippy::too_many_arguments)]
    pub async fn unique_visible(
        &self,
        collection: &CollectionDef,
        target_query: &Query,
        target_user: Option<&str>,
        target_snapshot_upper: Option<i64>,
        shadows: &[(Query, Option<String>, i64)],
    ) -> Result<Vec<StoreRow>> {
        let mut args: Vec<Value> = Vec::new();
        let Some(target_clause) =
            visibility_clause(collection, target_query, target_user, target_snapshot_upper, &mut args)
        else {
            return Ok(Vec::new());
        };

        let mut shadow_selects: Vec<String> = Vec::new();
        for (query, user, snapshot_upper) in shadows {
            if let Some(clause) = visibility_clause(collection, query, user.as_deref(), Some(*snapshot_upper), &mut args) {
                shadow_selects.push(format!("SELECT pk FROM {} WHERE {}", collection.table, clause));
            }
        }

        let anti_join = if shadow_selects.is_empty() {
            String::new()
        } else {
            format!(" AND pk NOT IN ({})", shadow_selects.join(" UNION "))
        };
        let order_clause = collection
            .order_by
            .as_ref()
            .map(|o| format!(" ORDER BY {o}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT pk, row_to_json({table}.*) AS fields FROM {table} WHERE {target}{anti_join}{order}",
            table = collection.table,
            target = target_clause,
            anti_join = anti_join,
            order = order_clause,
        );

        self.rows_for(&sql, &args, &collection.name).await
    }

    async fn rows_for(&self, sql: &str, args: &[Value], collection_name: &str) -> Result<Vec<StoreRow>> {
        let mut q = sqlx::query(sql);
        for arg in args {
            q = bind_json_value(q, arg);
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("query failed for {collection_name}: {e}")))?;

        rows.into_iter()
            .map(|row| {
                let pk: String = row
                    .try_get("pk")
                    .map_err(|e| Error::Store(format!("missing pk column: {e}")))?;
                let fields: Value = row
                    .try_get("fields")
                    .map_err(|e| Error::Store(format!("malformed row json: {e}")))?;
                Ok(StoreRow { pk, fields })
            })
            .collect()
    }

    /// Publish a pre-chunked NOTIFY payload. Chunking itself lives in
    /// [`crate::notify`]; this just issues the SQL `NOTIFY`.
    pub async fn notify(&self, channel: &str, payload: &str) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("NOTIFY failed: {e}")))?;
        Ok(())
    }

    /// Open the dedicated LISTEN connection. Its task owns it for the
    /// process's lifetime; its death is fatal (the caller should treat an
    /// error here as cause for process restart).
    pub async fn listen(&self, channel: &str) -> Result<PgListener> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("failed to open LISTEN connection: {e}")))?;
        listener
            .listen(channel)
            .await
            .map_err(|e| Error::Store(format!("LISTEN {channel} failed: {e}")))?;
        Ok(listener)
    }
}

/// Build the `WHERE`-clause fragment (no leading `WHERE` keyword) and
/// positional args for one `(collection, query, acting_user,
/// snapshot_upper)` combination, appending placeholders and args onto the
/// end of `args` so the fragment can be spliced into a larger statement
/// alongside other fragments built the same way. Returns `None` when the
/// collection is restricted and no acting user is given: nothing is
/// visible, and callers should treat that as "no rows" rather than emit a
/// clause.
fn visibility_clause(
    collection: &CollectionDef,
    query: &Query,
    acting_user: Option<&str>,
    snapshot_upper: Option<i64>,
    args: &mut Vec<Value>,
) -> Option<String> {
    let start = args.len();
    let mut clauses: Vec<String> = Vec::new();
    let mut local_args: Vec<Value> = Vec::new();

    if let Some(clause) = &query.clause {
        clauses.push(format!("({})", renumber_placeholders(clause, start)));
        local_args.extend(query.args.iter().cloned());
    }

    if collection.is_restricted() {
        match acting_user {
            Some(user) => {
                let subqueries: Vec<String> = collection
                    .user_rel
                    .iter()
                    .enumerate()
                    .map(|(i, rel)| {
                        let placeholder = start + local_args.len() + i + 1;
                        format!("pk IN (SELECT pk FROM {} WHERE {rel} = ${placeholder})", collection.table)
                    })
                    .collect();
                clauses.push(format!("({})", subqueries.join(" OR ")));
                for _ in &collection.user_rel {
                    local_args.push(Value::String(user.to_string()));
                }
            }
            None => return None,
        }
    }

    if let Some(upper) = snapshot_upper {
        clauses.push(format!("xmin::text::bigint <= {upper}"));
    }

    args.extend(local_args);

    Some(if clauses.is_empty() {
        "TRUE".to_string()
    } else {
        clauses.join(" AND ")
    })
}

/// Shift every `$N` placeholder in `clause` up by `offset`. A publication's
/// `Query::clause` is authored assuming it owns `$1, $2, …` on its own; once
/// it's spliced into a statement alongside other fragments (the anti-join's
/// target clause and each shadow clause), its placeholders need to land
/// where its own `args` actually ended up in the combined argument list.
fn renumber_placeholders(clause: &str, offset: usize) -> String {
    if offset == 0 {
        return clause.to_string();
    }
    let mut out = String::with_capacity(clause.len());
    let mut chars = clause.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(|d| d.is_ascii_digit()) {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let n: usize = digits.parse().expect("scanned only ascii digits");
            out.push('$');
            out.push_str(&(n + offset).to_string());
        } else {
            out.push(c);
        }
    }
    out
}

fn bind_json_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::String(s) => query.bind(s.as_str()),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        Value::Number(n) => query.bind(n.as_f64()),
        Value::Bool(b) => query.bind(*b),
        other => query.bind(other.to_string()),
    }
}

/// Shared, cloneable handle to the store adapter, for passing into
/// connection tasks and the change router.
pub type SharedStore = Arc<StoreAdapter>;
