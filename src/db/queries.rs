//! SQL query constants and builders
//!
//! Contains all SQL used by the PostgreSQL record store. Every record type
//! gets its own table; table names are validated before they reach these
//! builders, values always travel as bind parameters.

/// Connection check
pub const PING: &str = "SELECT 1 AS ok";

/// Does a table exist in the current schema
pub const TABLE_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT 1
        FROM information_schema.tables
        WHERE table_schema = current_schema()
            AND table_name = $1
    )
"#;

/// Create the table backing one record type
pub fn create_table(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{table}" (
            id TEXT PRIMARY KEY,
            id_value JSONB NOT NULL,
            data JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#
    )
}

/// Load a single row by id
pub fn select_by_id(table: &str) -> String {
    format!(r#"SELECT id_value, data FROM "{table}" WHERE id = $1"#)
}

/// Insert or fully replace a row: $1 id, $2 id value, $3 data
pub fn upsert(table: &str) -> String {
    format!(
        r#"
        INSERT INTO "{table}" (id, id_value, data)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE
            SET data = EXCLUDED.data,
                updated_at = CURRENT_TIMESTAMP
        "#
    )
}

/// Merge a patch into an existing row: $1 id, $2 patch, $3 keys to drop
pub fn merge_fields(table: &str) -> String {
    format!(
        r#"
        UPDATE "{table}"
            SET data = (data || $2::jsonb) - $3::text[],
                updated_at = CURRENT_TIMESTAMP
        WHERE id = $1
        "#
    )
}

/// Build a filtered, ordered, paginated select.
///
/// Parameters are numbered in the order: filter (field, value) pairs,
/// ordering fields, then limit and offset.
pub fn select_matching(
    table: &str,
    filter_count: usize,
    ordering: &[&'static str],
    with_limit: bool,
) -> String {
    let mut sql = format!(r#"SELECT id_value, data FROM "{table}""#);
    let mut param = 1;

    if filter_count > 0 {
        let clauses: Vec<String> = (0..filter_count)
            .map(|_| {
                let clause = format!(
                    "COALESCE(data -> ${}::text, 'null'::jsonb) = ${}::jsonb",
                    param,
                    param + 1
                );
                param += 2;
                clause
            })
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if !ordering.is_empty() {
        let keys: Vec<String> = ordering
            .iter()
            .map(|direction| {
                let nulls = if *direction == "DESC" { "LAST" } else { "FIRST" };
                let key = format!("data -> ${}::text {} NULLS {}", param, direction, nulls);
                param += 1;
                key
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    } else {
        sql.push_str(" ORDER BY id ASC");
    }

    if with_limit {
        sql.push_str(&format!(" LIMIT ${}::bigint", param));
        param += 1;
    }
    sql.push_str(&format!(" OFFSET ${}::bigint", param));

    sql
}
