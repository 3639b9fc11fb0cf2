#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_scrape_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS scrape_tasks (
    task_id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword TEXT NOT NULL,
    location TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at_unix INTEGER NOT NULL,
    updated_at_unix INTEGER NOT NULL,
    results_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS business_results (
    result_id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    address TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    website TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL DEFAULT '',
    rating TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    scraped_at_unix INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_business_results_task
    ON business_results (task_id, result_id);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_business_results_task;
DROP TABLE IF EXISTS business_results;
DROP TABLE IF EXISTS scrape_tasks;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_results_scraped_at_index",
    up_sql: r#"
CREATE INDEX IF NOT EXISTS idx_business_results_scraped_at
    ON business_results (scraped_at_unix DESC, result_id DESC);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_business_results_scraped_at;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
