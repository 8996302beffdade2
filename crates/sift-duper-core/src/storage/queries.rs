use super::models::*;
use super::sqlite::Database;
use crate::config::RevalidationPolicy;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Result, Row};
use std::path::{Path, PathBuf};
use tracing::debug;

const ENTRY_COLUMNS: &str = "f.id, f.source_id, f.relative_dir, f.name, f.ext, f.last_seen, \
     s.path, a.size, a.modified_date, a.content_hash, a.histogram_correlation, \
     a.histogram_chi_square, a.histogram_intersection, a.histogram_distance, a.embedding";

const ENTRY_JOIN: &str = "FROM files f \
     JOIN sources s ON s.id = f.source_id \
     JOIN file_attributes a ON a.file_id = f.id";

fn vector_column(row: &Row, idx: usize) -> Result<Option<Vec<f32>>> {
    Ok(row
        .get::<_, Option<Vec<u8>>>(idx)?
        .map(|bytes| blob_to_vector(&bytes)))
}

fn entry_from_row(row: &Row) -> Result<FileEntry> {
    let record = FileRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        relative_dir: row.get(2)?,
        name: row.get(3)?,
        ext: row.get(4)?,
        last_seen: row.get(5)?,
    };
    let source_path: String = row.get(6)?;
    let path = resolve_path(&source_path, &record.relative_dir, &record.name);
    Ok(FileEntry {
        record,
        attributes: FileAttributes {
            size: row.get(7)?,
            modified_date: row.get(8)?,
            content_hash: row.get(9)?,
            histogram_correlation: vector_column(row, 10)?,
            histogram_chi_square: vector_column(row, 11)?,
            histogram_intersection: vector_column(row, 12)?,
            histogram_distance: vector_column(row, 13)?,
            embedding: vector_column(row, 14)?,
        },
        path,
    })
}

/// Absolute path of a stored file.
pub fn resolve_path(source_path: &str, relative_dir: &str, name: &str) -> PathBuf {
    let mut path = PathBuf::from(source_path);
    for component in relative_dir.split('/').filter(|c| !c.is_empty()) {
        path.push(component);
    }
    path.push(name);
    path
}

/// Builds `AND ...` clauses for a filter, appending bound values to `values`.
fn filter_clause(filter: &FileFilter, values: &mut Vec<Value>) -> String {
    let mut clause = String::new();

    let placeholders = vec!["?"; filter.source_ids.len()].join(", ");
    clause.push_str(&format!(" AND f.source_id IN ({})", placeholders));
    values.extend(filter.source_ids.iter().map(|id| Value::Integer(*id)));

    if let Some(exts) = &filter.extensions {
        let placeholders = vec!["?"; exts.len()].join(", ");
        clause.push_str(&format!(" AND f.ext IN ({})", placeholders));
        values.extend(exts.iter().map(|e| Value::Text(e.clone())));
    }

    clause
}

impl Database {
    // ── Sources ──────────────────────────────────────────────────

    /// Register a root directory, returning the existing id if already registered.
    pub fn add_source(&self, path: &str) -> Result<i64> {
        self.connection().execute(
            "INSERT OR IGNORE INTO sources (path) VALUES (?1)",
            params![path],
        )?;
        self.connection().query_row(
            "SELECT id FROM sources WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
    }

    pub fn get_source(&self, source_id: i64) -> Result<Option<Source>> {
        self.connection()
            .query_row(
                "SELECT id, path FROM sources WHERE id = ?1",
                params![source_id],
                |row| {
                    Ok(Source {
                        id: row.get(0)?,
                        path: row.get(1)?,
                    })
                },
            )
            .optional()
    }

    pub fn list_sources(&self) -> Result<Vec<Source>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id, path FROM sources ORDER BY id")?;
        let sources = stmt
            .query_map([], |row| {
                Ok(Source {
                    id: row.get(0)?,
                    path: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(sources)
    }

    /// Remove every source. Files and attributes cascade.
    pub fn clear_sources(&self) -> Result<usize> {
        let removed = self.connection().execute("DELETE FROM sources", [])?;
        debug!("Cleared {} sources", removed);
        Ok(removed)
    }

    // ── Sync bookkeeping ─────────────────────────────────────────

    pub fn max_last_seen(&self, source_id: i64) -> Result<Option<i64>> {
        self.connection().query_row(
            "SELECT MAX(last_seen) FROM files WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )
    }

    /// Insert or refresh one scanned file together with its attributes row.
    ///
    /// Callers group these into a transaction; the two rows are never written separately.
    pub fn upsert_scanned_file(
        &self,
        source_id: i64,
        file: &ScannedFile,
        last_seen: i64,
        policy: RevalidationPolicy,
    ) -> Result<UpsertOutcome> {
        let existing: Option<(i64, Option<i64>, Option<i64>)> = self
            .connection()
            .prepare_cached(
                "SELECT f.id, a.size, a.modified_date FROM files f \
                 JOIN file_attributes a ON a.file_id = f.id \
                 WHERE f.source_id = ?1 AND f.relative_dir = ?2 AND f.name = ?3",
            )?
            .query_row(params![source_id, file.relative_dir, file.name], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?;

        match existing {
            None => {
                self.connection()
                    .prepare_cached(
                        "INSERT INTO files (source_id, relative_dir, name, ext, last_seen) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?
                    .execute(params![
                        source_id,
                        file.relative_dir,
                        file.name,
                        file.ext,
                        last_seen
                    ])?;
                let file_id = self.connection().last_insert_rowid();
                self.connection()
                    .prepare_cached(
                        "INSERT INTO file_attributes (file_id, size, modified_date) \
                         VALUES (?1, ?2, ?3)",
                    )?
                    .execute(params![file_id, file.size, file.modified_date])?;
                Ok(UpsertOutcome::Inserted)
            }
            Some((file_id, size, modified_date)) => {
                self.connection()
                    .prepare_cached("UPDATE files SET last_seen = ?1, ext = ?2 WHERE id = ?3")?
                    .execute(params![last_seen, file.ext, file_id])?;

                let changed =
                    size != Some(file.size) || modified_date != Some(file.modified_date);
                if !changed {
                    return Ok(UpsertOutcome::Unchanged);
                }

                self.connection()
                    .prepare_cached(
                        "UPDATE file_attributes SET size = ?1, modified_date = ?2 \
                         WHERE file_id = ?3",
                    )?
                    .execute(params![file.size, file.modified_date, file_id])?;
                self.clear_calculation_failures(file_id)?;

                if policy == RevalidationPolicy::OnChange {
                    self.clear_derived_attributes(file_id)?;
                }
                Ok(UpsertOutcome::Changed)
            }
        }
    }

    /// Drop every content-derived attribute of a file so it is recomputed.
    pub fn clear_derived_attributes(&self, file_id: i64) -> Result<()> {
        let assignments = Attribute::all()
            .iter()
            .filter(|a| a.is_content_derived())
            .map(|a| format!("{} = NULL", a.column()))
            .collect::<Vec<_>>()
            .join(", ");
        self.connection().execute(
            &format!(
                "UPDATE file_attributes SET {} WHERE file_id = ?1",
                assignments
            ),
            params![file_id],
        )?;
        debug!("Cleared derived attributes for file {}", file_id);
        Ok(())
    }

    /// Forget earlier calculation failures of a file whose content may have changed.
    pub fn clear_calculation_failures(&self, file_id: i64) -> Result<usize> {
        self.connection()
            .prepare_cached("DELETE FROM calculation_failures WHERE file_id = ?1")?
            .execute(params![file_id])
    }

    /// Files of a source not refreshed since `scan_start`: (id, relative_dir, name).
    pub fn stale_files(
        &self,
        source_id: i64,
        scan_start: i64,
    ) -> Result<Vec<(i64, String, String)>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, relative_dir, name FROM files \
             WHERE source_id = ?1 AND last_seen < ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![source_id, scan_start], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_files(&self, file_ids: &[i64]) -> Result<usize> {
        let mut stmt = self
            .connection()
            .prepare_cached("DELETE FROM files WHERE id = ?1")?;
        let mut count = 0;
        for id in file_ids {
            count += stmt.execute(params![id])?;
        }
        Ok(count)
    }

    // ── Files ────────────────────────────────────────────────────

    pub fn get_file(&self, file_id: i64) -> Result<Option<FileEntry>> {
        self.connection()
            .query_row(
                &format!("SELECT {} {} WHERE f.id = ?1", ENTRY_COLUMNS, ENTRY_JOIN),
                params![file_id],
                entry_from_row,
            )
            .optional()
    }

    /// Load entries for the given ids, ordered by id. Unknown ids are skipped.
    pub fn get_files(&self, file_ids: &[i64]) -> Result<Vec<FileEntry>> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "SELECT {} {} WHERE f.id = ?1",
            ENTRY_COLUMNS, ENTRY_JOIN
        ))?;
        let mut ids = file_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = stmt.query_row(params![id], entry_from_row).optional()? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub fn find_file_id(
        &self,
        source_id: i64,
        relative_dir: &str,
        name: &str,
    ) -> Result<Option<i64>> {
        self.connection()
            .query_row(
                "SELECT id FROM files WHERE source_id = ?1 AND relative_dir = ?2 AND name = ?3",
                params![source_id, relative_dir, name],
                |row| row.get(0),
            )
            .optional()
    }

    /// Forget a file by its absolute directory and name. The file on disk is not touched.
    /// Returns whether a record was removed.
    pub fn delete_file_record(&self, dir: &Path, name: &str) -> Result<bool> {
        for source in self.list_sources()? {
            let Ok(relative) = dir.strip_prefix(&source.path) else {
                continue;
            };
            let relative_dir = relative_dir_string(relative);
            if let Some(file_id) = self.find_file_id(source.id, &relative_dir, name)? {
                self.delete_files(&[file_id])?;
                debug!("Deleted record {} for {}/{}", file_id, dir.display(), name);
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn count_files(&self, source_id: i64) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM files WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )
    }

    /// Ids of every file matching the filter, ascending.
    pub fn filtered_file_ids(&self, filter: &FileFilter) -> Result<Vec<i64>> {
        let mut values = Vec::new();
        let clause = filter_clause(filter, &mut values);
        let mut stmt = self.connection().prepare(&format!(
            "SELECT f.id FROM files f WHERE 1 = 1{} ORDER BY f.id",
            clause
        ))?;
        let ids = stmt
            .query_map(params_from_iter(values), |row| row.get(0))?
            .collect::<Result<Vec<i64>>>()?;
        Ok(ids)
    }

    // ── Attributes ───────────────────────────────────────────────

    /// Files matching the filter whose `attribute` is still NULL and has not failed for
    /// their current content: (id, absolute path).
    pub fn files_missing_attribute(
        &self,
        attribute: Attribute,
        filter: &FileFilter,
    ) -> Result<Vec<(i64, PathBuf)>> {
        let mut values = Vec::new();
        let clause = filter_clause(filter, &mut values);
        let mut stmt = self.connection().prepare(&format!(
            "SELECT f.id, s.path, f.relative_dir, f.name {join} \
             WHERE a.{col} IS NULL \
             AND NOT EXISTS (SELECT 1 FROM calculation_failures cf \
                             WHERE cf.file_id = f.id AND cf.attribute = '{col}'){clause} \
             ORDER BY f.id",
            join = ENTRY_JOIN,
            col = attribute.column(),
            clause = clause
        ))?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                let source_path: String = row.get(1)?;
                let relative_dir: String = row.get(2)?;
                let name: String = row.get(3)?;
                Ok((row.get(0)?, resolve_path(&source_path, &relative_dir, &name)))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Remember that `attribute` cannot be derived for these files until they change.
    pub fn record_calculation_failures(
        &self,
        attribute: Attribute,
        file_ids: &[i64],
    ) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO calculation_failures (file_id, attribute) VALUES (?1, ?2)",
            )?;
            for file_id in file_ids {
                count += stmt.execute(params![file_id, attribute.column()])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    /// Write computed values in one transaction. A column that already holds a value is
    /// left as is. Returns the number of values actually stored.
    pub fn write_attributes(
        &self,
        attribute: Attribute,
        values: &[(i64, AttributeValue)],
    ) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "UPDATE file_attributes SET {col} = ?1 WHERE file_id = ?2 AND {col} IS NULL",
                col = attribute.column()
            ))?;
            for (file_id, value) in values {
                let bound = match value {
                    AttributeValue::Integer(v) => Value::Integer(*v),
                    AttributeValue::Text(v) => Value::Text(v.clone()),
                    AttributeValue::Vector(v) => Value::Blob(vector_to_blob(v)),
                };
                count += stmt.execute(params![bound, file_id])?;
            }
        }
        tx.commit()?;
        debug!("Stored {} {} values", count, attribute.column());
        Ok(count)
    }

    pub fn read_attribute(
        &self,
        file_id: i64,
        attribute: Attribute,
    ) -> Result<Option<AttributeValue>> {
        let sql = format!(
            "SELECT {} FROM file_attributes WHERE file_id = ?1",
            attribute.column()
        );
        let value: Option<Option<Value>> = self
            .connection()
            .query_row(&sql, params![file_id], |row| row.get(0))
            .optional()?;

        Ok(match (attribute, value.flatten()) {
            (_, None) | (_, Some(Value::Null)) => None,
            (Attribute::Size | Attribute::ModifiedDate, Some(Value::Integer(v))) => {
                Some(AttributeValue::Integer(v))
            }
            (Attribute::ContentHash, Some(Value::Text(v))) => Some(AttributeValue::Text(v)),
            (Attribute::Histogram(_) | Attribute::Embedding, Some(Value::Blob(bytes))) => {
                Some(AttributeValue::Vector(blob_to_vector(&bytes)))
            }
            (attribute, Some(other)) => {
                return Err(rusqlite::Error::InvalidColumnType(
                    0,
                    attribute.column().to_string(),
                    other.data_type(),
                ))
            }
        })
    }

    // ── Grouping ─────────────────────────────────────────────────

    /// Aggregate files matching the filter by equality over `key_columns`.
    ///
    /// `key_columns` are qualified column expressions (`f.name`, `a.size`, ...). Rows with a
    /// NULL in any key are excluded. Only keys shared by more than one file are returned,
    /// each as an ascending id list.
    pub fn group_ids_by_keys(
        &self,
        key_columns: &[&str],
        filter: &FileFilter,
    ) -> Result<Vec<Vec<i64>>> {
        let mut values = Vec::new();
        let clause = filter_clause(filter, &mut values);
        let not_null = key_columns
            .iter()
            .map(|c| format!(" AND {} IS NOT NULL", c))
            .collect::<String>();
        let sql = format!(
            "SELECT GROUP_CONCAT(f.id) FROM files f \
             JOIN file_attributes a ON a.file_id = f.id \
             WHERE 1 = 1{}{} \
             GROUP BY {} \
             HAVING COUNT(*) > 1 \
             ORDER BY MIN(f.id)",
            clause,
            not_null,
            key_columns.join(", ")
        );
        debug!("Exact grouping query: {}", sql);

        let mut stmt = self.connection().prepare(&sql)?;
        let groups = stmt
            .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
            .map(|concat| {
                concat.map(|ids| {
                    let mut ids: Vec<i64> = ids
                        .split(',')
                        .filter_map(|id| id.trim().parse().ok())
                        .collect();
                    ids.sort_unstable();
                    ids
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(groups)
    }
}

/// `/`-joined form of a path relative to a source root.
pub fn relative_dir_string(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
