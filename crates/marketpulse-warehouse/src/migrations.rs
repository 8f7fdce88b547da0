use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_snapshots_latest",
        sql: r#"
CREATE TABLE IF NOT EXISTS snapshots_latest (
    domain TEXT NOT NULL,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    price DOUBLE NOT NULL,
    change_24h DOUBLE,
    volume DOUBLE,
    market_cap DOUBLE,
    as_of_ms BIGINT NOT NULL,
    source TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(domain, symbol)
);
"#,
    },
    Migration {
        version: "0002_snapshots_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_snapshots_latest_as_of ON snapshots_latest(domain, as_of_ms);
"#,
    },
];

/// Applies pending migrations; already-applied versions are skipped.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

/// Versions recorded as applied, oldest first.
pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}
