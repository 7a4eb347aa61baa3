//! SQL statement text shared by the relational stores.
//!
//! Every ledger write is one statement. The consume upsert decides on the
//! database side whether the stored window is stale, and whether the write
//! crosses the budget and must install the block expiry, so concurrent
//! callers in different processes are serialized by the row lock alone.

/// SQL flavour a statement set is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `$1`-style placeholders
    Postgres,
    /// `?1`-style placeholders
    Sqlite,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => format!("?{}", index),
        }
    }
}

/// The statements a store issues against one counter table.
///
/// Parameter order for `upsert`: key, points, fresh expire, now, block
/// expire, max points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statements {
    /// Create the table if missing
    pub create_table: String,
    /// Atomic consume-style write, returning `points, expire`
    pub upsert: String,
    /// Unconditional overwrite (key, points, expire), returning `points, expire`
    pub force_set: String,
    /// Read a live row (key, now)
    pub fetch: String,
    /// Remove one row (key)
    pub delete: String,
    /// Remove rows expired before a cutoff (cutoff)
    pub clear_expired: String,
}

impl Statements {
    /// Render the statement set for `table`, optionally qualified by `schema`.
    ///
    /// Identifiers must already be validated as plain SQL identifiers.
    pub fn new(dialect: Dialect, table: &str, schema: Option<&str>) -> Self {
        let table = qualified_table(table, schema);
        let p = |index: usize| dialect.placeholder(index);

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             \"key\" TEXT PRIMARY KEY, \
             points BIGINT NOT NULL DEFAULT 0, \
             expire BIGINT)"
        );

        let upsert = format!(
            "INSERT INTO {table} AS cur (\"key\", points, expire) VALUES ({key}, {points}, {fresh}) \
             ON CONFLICT (\"key\") DO UPDATE SET \
             points = CASE \
               WHEN cur.expire IS NOT NULL AND cur.expire <= {now} THEN {points} \
               ELSE cur.points + {points} \
             END, \
             expire = CASE \
               WHEN cur.expire IS NOT NULL AND cur.expire <= {now} THEN {fresh} \
               WHEN {block} IS NOT NULL AND cur.points <= {max} AND cur.points + {points} > {max} THEN {block} \
               ELSE cur.expire \
             END \
             RETURNING points, expire",
            key = p(1),
            points = p(2),
            fresh = p(3),
            now = p(4),
            block = p(5),
            max = p(6),
        );

        let force_set = format!(
            "INSERT INTO {table} AS cur (\"key\", points, expire) VALUES ({}, {}, {}) \
             ON CONFLICT (\"key\") DO UPDATE SET points = EXCLUDED.points, expire = EXCLUDED.expire \
             RETURNING points, expire",
            p(1),
            p(2),
            p(3),
        );

        let fetch = format!(
            "SELECT points, expire FROM {table} WHERE \"key\" = {} AND (expire IS NULL OR expire > {})",
            p(1),
            p(2),
        );

        let delete = format!("DELETE FROM {table} WHERE \"key\" = {}", p(1));

        let clear_expired = format!(
            "DELETE FROM {table} WHERE expire IS NOT NULL AND expire < {}",
            p(1)
        );

        Self {
            create_table,
            upsert,
            force_set,
            fetch,
            delete,
            clear_expired,
        }
    }
}

fn qualified_table(table: &str, schema: Option<&str>) -> String {
    match schema {
        Some(schema) => format!("\"{}\".\"{}\"", schema, table),
        None => format!("\"{}\"", table),
    }
}
