// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;
use dynfn_api::function::{FunctionKind, FunctionRecord};
use sqlx::Row;

pub mod legacy;

const COLUMNS: &str = "name, description, parameters, function_type, body, compiled_artifact, output_instructions";

/// Durable storage of the function records in an embedded SQLite database.
///
/// Names are unique ignoring ASCII case: the primary key is declared with
/// `COLLATE NOCASE`, so every lookup by name is case-insensitive too.
#[derive(Clone)]
pub struct FunctionStore {
    pool: sqlx::SqlitePool,
    path: std::path::PathBuf,
}

impl FunctionStore {
    /// Open (or create) the database file. Concurrent writers from other
    /// processes wait on the busy timeout instead of failing.
    pub async fn open(path: &std::path::Path) -> Result<Self, DynFnError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(10));
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(DynFnError::storage)?;
        log::info!("Function store opened at {}", path.display());
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Create the table if needed and add the columns introduced after the
    /// first release. Idempotent.
    pub async fn ensure_schema(&self) -> Result<(), DynFnError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS functions (
                name                TEXT PRIMARY KEY COLLATE NOCASE,
                description         TEXT NOT NULL,
                parameters          TEXT NOT NULL,
                function_type       TEXT NOT NULL DEFAULT 'code',
                body                TEXT NOT NULL,
                compiled_artifact   BLOB,
                output_instructions TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(DynFnError::storage)?;

        let columns = sqlx::query("PRAGMA table_info(functions)")
            .fetch_all(&self.pool)
            .await
            .map_err(DynFnError::storage)?;
        let has_output_instructions = columns
            .iter()
            .any(|row| row.try_get::<String, _>("name").map(|n| n.eq_ignore_ascii_case("output_instructions")).unwrap_or(false));
        if !has_output_instructions {
            log::info!("Adding column output_instructions to {}", self.path.display());
            sqlx::query("ALTER TABLE functions ADD COLUMN output_instructions TEXT")
                .execute(&self.pool)
                .await
                .map_err(DynFnError::storage)?;
        }
        Ok(())
    }

    /// Insert or fully replace the record with the same (case-insensitive) name.
    pub async fn upsert(&self, record: &FunctionRecord) -> Result<(), DynFnError> {
        sqlx::query(&format!("INSERT OR REPLACE INTO functions ({}) VALUES (?, ?, ?, ?, ?, ?, ?)", COLUMNS))
            .bind(&record.name)
            .bind(&record.description)
            .bind(dynfn_api::function::parameters_to_json(&record.parameters))
            .bind(record.kind.as_str())
            .bind(&record.body)
            .bind(record.compiled_artifact.as_deref())
            .bind(record.output_instructions.as_deref())
            .execute(&self.pool)
            .await
            .map_err(DynFnError::storage)?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<FunctionRecord>, DynFnError> {
        let row = sqlx::query(&format!("SELECT {} FROM functions WHERE name = ?", COLUMNS))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(DynFnError::storage)?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    /// All records ordered by name.
    pub async fn list(&self) -> Result<Vec<FunctionRecord>, DynFnError> {
        let rows = sqlx::query(&format!("SELECT {} FROM functions ORDER BY name", COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(DynFnError::storage)?;
        rows.iter().map(record_from_row).collect()
    }

    /// Returns whether a record was removed.
    pub async fn delete(&self, name: &str) -> Result<bool, DynFnError> {
        let res = sqlx::query("DELETE FROM functions WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(DynFnError::storage)?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<u64, DynFnError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM functions")
            .fetch_one(&self.pool)
            .await
            .map_err(DynFnError::storage)?;
        Ok(count.max(0) as u64)
    }

    pub async fn set_artifact(&self, name: &str, artifact: Option<&[u8]>) -> Result<(), DynFnError> {
        let res = sqlx::query("UPDATE functions SET compiled_artifact = ? WHERE name = ?")
            .bind(artifact)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(DynFnError::storage)?;
        match res.rows_affected() {
            0 => Err(DynFnError::NotFound(name.to_string())),
            _ => Ok(()),
        }
    }

    /// Overwrite the record `original_name` with `record`, possibly renaming it.
    /// Runs in a single transaction: either every column changes or none does.
    pub async fn replace(&self, original_name: &str, record: &FunctionRecord) -> Result<(), DynFnError> {
        let mut tx = self.pool.begin().await.map_err(DynFnError::storage)?;

        if !record.name.eq_ignore_ascii_case(original_name) {
            let taken: Option<String> = sqlx::query_scalar("SELECT name FROM functions WHERE name = ?")
                .bind(&record.name)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DynFnError::storage)?;
            if taken.is_some() {
                return Err(DynFnError::Conflict(record.name.clone()));
            }
        }

        let res = sqlx::query(
            "UPDATE functions
             SET name = ?, description = ?, parameters = ?, function_type = ?,
                 body = ?, compiled_artifact = ?, output_instructions = ?
             WHERE name = ?",
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(dynfn_api::function::parameters_to_json(&record.parameters))
        .bind(record.kind.as_str())
        .bind(&record.body)
        .bind(record.compiled_artifact.as_deref())
        .bind(record.output_instructions.as_deref())
        .bind(original_name)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            let unique = err.as_database_error().map(|e| e.is_unique_violation()).unwrap_or(false);
            match unique {
                true => DynFnError::Conflict(record.name.clone()),
                false => DynFnError::storage(err),
            }
        })?;

        if res.rows_affected() == 0 {
            return Err(DynFnError::NotFound(original_name.to_string()));
        }
        tx.commit().await.map_err(DynFnError::storage)?;
        Ok(())
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FunctionRecord, DynFnError> {
    let parameters: String = row.try_get("parameters").map_err(DynFnError::storage)?;
    let function_type: String = row.try_get("function_type").map_err(DynFnError::storage)?;
    Ok(FunctionRecord {
        name: row.try_get("name").map_err(DynFnError::storage)?,
        description: row.try_get("description").map_err(DynFnError::storage)?,
        // A corrupt schema must not make the record unreachable.
        parameters: dynfn_api::function::parse_parameters(&parameters).unwrap_or_default(),
        kind: FunctionKind::parse(&function_type).unwrap_or(FunctionKind::Code),
        body: row.try_get("body").map_err(DynFnError::storage)?,
        compiled_artifact: row.try_get("compiled_artifact").map_err(DynFnError::storage)?,
        output_instructions: row.try_get("output_instructions").map_err(DynFnError::storage)?,
    })
}
