use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::config::ScraperConfig;
use crate::models::{
    BusinessRecord, CoreError, CoreErrorKind, TaskId, TaskRecord, TaskStatus,
};
use crate::persistence::{MigrationStore, PersistenceResult, ResultStore, TaskStore};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "leadscrape_schema_migrations";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TASK_COLUMNS: &str = "task_id, keyword, location, status, created_at_unix, updated_at_unix, \
                            results_count, error_message";
const RESULT_COLUMNS: &str =
    "task_id, name, address, phone, website, email, rating, category, scraped_at_unix";

pub struct SqliteStore {
    database_path: PathBuf,
}

impl SqliteStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self::new(config.database_path.clone())
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            Ok(())
        })
    }
}

impl TaskStore for SqliteStore {
    fn create_task(&self, keyword: &str, location: &str) -> PersistenceResult<TaskId> {
        let task_id = self.with_connection("create_task", |connection| {
            ensure_schema_ready(connection)?;
            let now = to_unix_seconds(SystemTime::now())?;
            connection.execute(
                "
INSERT INTO scrape_tasks (
    keyword, location, status, created_at_unix, updated_at_unix, results_count, error_message
) VALUES (?1, ?2, ?3, ?4, ?4, 0, NULL)
",
                params![
                    keyword,
                    location,
                    task_status_to_str(TaskStatus::Created),
                    now
                ],
            )?;
            Ok(TaskId(i64_to_u64(connection.last_insert_rowid())?))
        })?;

        tracing::info!(task_id = task_id.0, keyword, location, "created scrape task");
        Ok(task_id)
    }

    fn get_task(&self, task_id: TaskId) -> PersistenceResult<Option<TaskRecord>> {
        self.with_connection("get_task", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM scrape_tasks WHERE task_id = ?1"),
                    params![task_id_to_i64(task_id)?],
                    task_from_row,
                )
                .optional()
        })
    }

    fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> PersistenceResult<()> {
        let storage = |error: rusqlite::Error| storage_error("update_task_status", error);

        let mut connection = open_connection(&self.database_path).map_err(storage)?;
        ensure_schema_ready(&connection).map_err(storage)?;
        let transaction = connection.transaction().map_err(storage)?;

        let raw_id = task_id_to_i64(task_id).map_err(storage)?;
        let current_raw: Option<String> = transaction
            .query_row(
                "SELECT status FROM scrape_tasks WHERE task_id = ?1",
                params![raw_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        let Some(current_raw) = current_raw else {
            return Err(storage_error_text(
                "update_task_status",
                format!("unknown task id '{task_id}'"),
            )
            .for_task(task_id));
        };
        let current = parse_task_status(&current_raw).map_err(storage)?;

        if !current.can_transition_to(status) {
            return Err(CoreError {
                task: Some(task_id),
                kind: CoreErrorKind::InvalidTransition,
                message: format!("task '{task_id}' cannot move from {current} to {status}"),
            });
        }

        let now = to_unix_seconds(SystemTime::now()).map_err(storage)?;
        transaction
            .execute(
                "
UPDATE scrape_tasks
SET status = ?2,
    updated_at_unix = ?3,
    error_message = COALESCE(?4, error_message)
WHERE task_id = ?1
",
                params![raw_id, task_status_to_str(status), now, error_message],
            )
            .map_err(storage)?;
        transaction.commit().map_err(storage)?;

        tracing::info!(task_id = task_id.0, status = %status, "updated task status");
        Ok(())
    }

    fn get_all_tasks(&self) -> PersistenceResult<Vec<TaskRecord>> {
        self.with_connection("get_all_tasks", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM scrape_tasks
                 ORDER BY created_at_unix DESC, task_id DESC"
            ))?;
            let rows = statement.query_map([], task_from_row)?;
            rows.collect()
        })
    }

    fn delete_task(&self, task_id: TaskId) -> PersistenceResult<bool> {
        let deleted = self.with_connection("delete_task", |connection| {
            ensure_schema_ready(connection)?;
            let raw_id = task_id_to_i64(task_id)?;
            let transaction = connection.transaction()?;
            transaction.execute(
                "DELETE FROM business_results WHERE task_id = ?1",
                params![raw_id],
            )?;
            let deleted =
                transaction.execute("DELETE FROM scrape_tasks WHERE task_id = ?1", params![raw_id])?;
            transaction.commit()?;
            Ok(deleted > 0)
        })?;

        if deleted {
            tracing::info!(task_id = task_id.0, "deleted task and its results");
        }
        Ok(deleted)
    }
}

impl ResultStore for SqliteStore {
    fn save_results(
        &self,
        task_id: TaskId,
        records: &[BusinessRecord],
    ) -> PersistenceResult<usize> {
        let saved = self.with_connection("save_results", |connection| {
            ensure_schema_ready(connection)?;
            let raw_id = task_id_to_i64(task_id)?;
            let now = to_unix_seconds(SystemTime::now())?;
            let transaction = connection.transaction()?;
            {
                let mut statement = transaction.prepare(
                    "
INSERT INTO business_results (
    task_id, name, address, phone, website, email, rating, category, scraped_at_unix
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
",
                )?;

                for record in records {
                    statement.execute(params![
                        raw_id,
                        record.name.as_str(),
                        record.address.as_str(),
                        record.phone.as_str(),
                        record.website.as_str(),
                        record.email.as_str(),
                        record.rating.as_str(),
                        record.category.as_str(),
                        now,
                    ])?;
                }
            }

            let updated = transaction.execute(
                "
UPDATE scrape_tasks
SET results_count = ?2, updated_at_unix = ?3
WHERE task_id = ?1
",
                params![raw_id, to_i64(records.len())?, now],
            )?;
            if updated == 0 {
                return Err(storage_error_sqlite("task id was not found for save_results"));
            }

            transaction.commit()?;
            Ok(records.len())
        })?;

        tracing::info!(task_id = task_id.0, saved, "saved task results");
        Ok(saved)
    }

    fn get_task_results(&self, task_id: TaskId) -> PersistenceResult<Vec<BusinessRecord>> {
        self.with_connection("get_task_results", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "SELECT {RESULT_COLUMNS} FROM business_results
                 WHERE task_id = ?1
                 ORDER BY result_id ASC"
            ))?;
            let rows = statement.query_map(params![task_id_to_i64(task_id)?], result_from_row)?;
            rows.collect()
        })
    }

    fn get_all_results(&self) -> PersistenceResult<Vec<BusinessRecord>> {
        self.with_connection("get_all_results", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "SELECT {RESULT_COLUMNS} FROM business_results
                 ORDER BY scraped_at_unix DESC, result_id DESC"
            ))?;
            let rows = statement.query_map([], result_from_row)?;
            rows.collect()
        })
    }

    fn clear_task_results(&self, task_id: TaskId) -> PersistenceResult<usize> {
        let cleared = self.with_connection("clear_task_results", |connection| {
            ensure_schema_ready(connection)?;
            let raw_id = task_id_to_i64(task_id)?;
            let now = to_unix_seconds(SystemTime::now())?;
            let transaction = connection.transaction()?;
            let deleted = transaction.execute(
                "DELETE FROM business_results WHERE task_id = ?1",
                params![raw_id],
            )?;
            let updated = transaction.execute(
                "
UPDATE scrape_tasks
SET results_count = 0, updated_at_unix = ?2
WHERE task_id = ?1
",
                params![raw_id, now],
            )?;
            if updated == 0 {
                return Err(storage_error_sqlite(
                    "task id was not found for clear_task_results",
                ));
            }
            transaction.commit()?;
            Ok(deleted)
        })?;

        tracing::info!(task_id = task_id.0, cleared, "cleared task results");
        Ok(cleared)
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version <= 0 {
        return Err(storage_error_sqlite(
            "database schema is not initialized; apply migrations before task operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let task_id_raw: i64 = row.get(0)?;
    let status_raw: String = row.get(3)?;
    let created_at_unix: i64 = row.get(4)?;
    let updated_at_unix: i64 = row.get(5)?;
    let results_count: i64 = row.get(6)?;

    Ok(TaskRecord {
        id: TaskId(i64_to_u64(task_id_raw)?),
        keyword: row.get(1)?,
        location: row.get(2)?,
        status: parse_task_status(&status_raw)?,
        created_at: from_unix_seconds(created_at_unix)?,
        updated_at: from_unix_seconds(updated_at_unix)?,
        results_count: i64_to_u64(results_count)?,
        error_message: row.get(7)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<BusinessRecord> {
    let task_id_raw: i64 = row.get(0)?;
    let scraped_at_unix: i64 = row.get(8)?;

    Ok(BusinessRecord {
        name: row.get(1)?,
        address: row.get(2)?,
        phone: row.get(3)?,
        website: row.get(4)?,
        email: row.get(5)?,
        rating: row.get(6)?,
        category: row.get(7)?,
        task_id: Some(TaskId(i64_to_u64(task_id_raw)?)),
        scraped_at: Some(from_unix_seconds(scraped_at_unix)?),
    })
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn task_status_to_str(value: TaskStatus) -> &'static str {
    match value {
        TaskStatus::Created => "created",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn parse_task_status(raw: &str) -> rusqlite::Result<TaskStatus> {
    match raw {
        "created" => Ok(TaskStatus::Created),
        "running" => Ok(TaskStatus::Running),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        _ => Err(storage_error_sqlite(&format!(
            "unknown task status '{raw}' in sqlite record"
        ))),
    }
}

fn to_unix_seconds(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    let seconds = i64::try_from(duration.as_secs())
        .map_err(|_| storage_error_sqlite("unix timestamp seconds exceed i64 range"))?;
    Ok(seconds)
}

fn from_unix_seconds(value: i64) -> rusqlite::Result<SystemTime> {
    if value < 0 {
        return Err(storage_error_sqlite(
            "negative unix timestamps are not supported",
        ));
    }
    let seconds = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("failed to convert unix timestamp to u64"))?;
    Ok(UNIX_EPOCH + Duration::from_secs(seconds))
}

fn task_id_to_i64(value: TaskId) -> rusqlite::Result<i64> {
    i64::try_from(value.0).map_err(|_| storage_error_sqlite("task id exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative value in sqlite record"))
}

fn to_i64(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}
