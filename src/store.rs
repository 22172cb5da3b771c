use std::fs;

use camino::Utf8Path;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;

use crate::domain::{Accession, AnnotationRecord, Association, EvidenceSource, SampleId, SourceKind};
use crate::error::LoaderError;

pub trait AnnotationStore {
    fn annotation_ids(&self) -> Result<Vec<(Accession, i64)>, LoaderError>;
    fn annotation_id(&self, accession: &Accession) -> Result<Option<i64>, LoaderError>;
    fn insert_annotations(
        &self,
        records: &[AnnotationRecord],
    ) -> Result<AnnotationBatch, LoaderError>;
    fn count_associations(&self, sample_id: SampleId) -> Result<u64, LoaderError>;
    // A row that violates a constraint is reported and skipped.
    fn insert_associations(
        &self,
        evidence: EvidenceSource,
        rows: &[Association],
    ) -> Result<AssociationBatch, LoaderError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnnotationBatch {
    pub inserted: Vec<(Accession, i64)>,
    pub existing: Vec<(Accession, i64)>,
    pub rejected: Vec<(Accession, String)>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssociationBatch {
    pub inserted: usize,
    pub duplicates: Vec<Accession>,
    pub failed: Vec<(Accession, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssociationRow {
    pub id: i64,
    pub sample_id: i64,
    pub accession: String,
    pub source_kind: String,
    pub evidence: String,
    pub read_count: i64,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Utf8Path) -> Result<Self, LoaderError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| LoaderError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(path.as_std_path())
            .map_err(|err| LoaderError::StoreUnavailable(format!("open {path}: {err}")))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, LoaderError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| LoaderError::StoreUnavailable(err.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, LoaderError> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(store_error)?;
        Ok(Self { conn })
    }

    pub fn create_schema(&self) -> Result<(), LoaderError> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS protein_type (
                    protein_type_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    type TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS protein_evidence_type (
                    protein_evidence_type_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    type TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS protein (
                    protein_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    protein_type_id INTEGER NOT NULL
                        REFERENCES protein_type (protein_type_id) ON DELETE CASCADE,
                    accession TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    definition TEXT NOT NULL,
                    pathway TEXT,
                    module TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sample_to_protein (
                    sample_to_protein_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    sample_id INTEGER NOT NULL,
                    protein_id INTEGER NOT NULL
                        REFERENCES protein (protein_id) ON DELETE CASCADE,
                    protein_evidence_type_id INTEGER NOT NULL
                        REFERENCES protein_evidence_type (protein_evidence_type_id) ON DELETE CASCADE,
                    read_count INTEGER NOT NULL,
                    UNIQUE (sample_id, protein_id)
                );

                CREATE INDEX IF NOT EXISTS idx_sample_to_protein_sample
                    ON sample_to_protein (sample_id);
                "#,
            )
            .map_err(store_error)?;

        for kind in SourceKind::all() {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO protein_type (type) VALUES (?1)",
                    params![kind.type_name()],
                )
                .map_err(store_error)?;
        }
        for evidence in EvidenceSource::all() {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO protein_evidence_type (type) VALUES (?1)",
                    params![evidence.type_name()],
                )
                .map_err(store_error)?;
        }
        tracing::info!("schema ready");
        Ok(())
    }

    pub fn drop_results_tables(&self) -> Result<(), LoaderError> {
        self.conn
            .execute_batch(
                "DROP TABLE IF EXISTS sample_to_protein;
                 DROP TABLE IF EXISTS protein_evidence_type;",
            )
            .map_err(store_error)?;
        tracing::info!("dropped results tables");
        Ok(())
    }

    pub fn drop_annotation_tables(&self) -> Result<(), LoaderError> {
        self.drop_results_tables()?;
        self.conn
            .execute_batch(
                "DROP TABLE IF EXISTS protein;
                 DROP TABLE IF EXISTS protein_type;",
            )
            .map_err(store_error)?;
        tracing::info!("dropped annotation tables");
        Ok(())
    }

    pub fn list_associations(&self, limit: Option<usize>) -> Result<Vec<AssociationRow>, LoaderError> {
        let limit = limit.map(|value| value as i64).unwrap_or(-1);
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT s.sample_to_protein_id, s.sample_id, p.accession, pt.type, et.type, s.read_count
                FROM sample_to_protein s
                JOIN protein p ON p.protein_id = s.protein_id
                JOIN protein_type pt ON pt.protein_type_id = p.protein_type_id
                JOIN protein_evidence_type et
                    ON et.protein_evidence_type_id = s.protein_evidence_type_id
                ORDER BY s.sample_to_protein_id
                LIMIT ?1
                "#,
            )
            .map_err(store_error)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(AssociationRow {
                    id: row.get(0)?,
                    sample_id: row.get(1)?,
                    accession: row.get(2)?,
                    source_kind: row.get(3)?,
                    evidence: row.get(4)?,
                    read_count: row.get(5)?,
                })
            })
            .map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    pub fn count_annotations(&self, kind: SourceKind) -> Result<u64, LoaderError> {
        let count: i64 = self
            .conn
            .query_row(
                r#"
                SELECT COUNT(*) FROM protein p
                JOIN protein_type pt ON pt.protein_type_id = p.protein_type_id
                WHERE pt.type = ?1
                "#,
                params![kind.type_name()],
                |row| row.get(0),
            )
            .map_err(store_error)?;
        Ok(count as u64)
    }

    pub fn count_associations_by_kind(&self, kind: SourceKind) -> Result<u64, LoaderError> {
        let count: i64 = self
            .conn
            .query_row(
                r#"
                SELECT COUNT(*) FROM sample_to_protein s
                JOIN protein p ON p.protein_id = s.protein_id
                JOIN protein_type pt ON pt.protein_type_id = p.protein_type_id
                WHERE pt.type = ?1
                "#,
                params![kind.type_name()],
                |row| row.get(0),
            )
            .map_err(store_error)?;
        Ok(count as u64)
    }
}

impl AnnotationStore for SqliteStore {
    fn annotation_ids(&self) -> Result<Vec<(Accession, i64)>, LoaderError> {
        let mut stmt = self
            .conn
            .prepare("SELECT accession, protein_id FROM protein")
            .map_err(store_error)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(store_error)?;
        let mut ids = Vec::new();
        for row in rows {
            let (accession, id) = row.map_err(store_error)?;
            match accession.parse::<Accession>() {
                Ok(accession) => ids.push((accession, id)),
                Err(err) => tracing::warn!(%err, protein_id = id, "skipping stored annotation"),
            }
        }
        Ok(ids)
    }

    fn annotation_id(&self, accession: &Accession) -> Result<Option<i64>, LoaderError> {
        self.conn
            .query_row(
                "SELECT protein_id FROM protein WHERE accession = ?1",
                params![accession.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)
    }

    fn insert_annotations(
        &self,
        records: &[AnnotationRecord],
    ) -> Result<AnnotationBatch, LoaderError> {
        let tx = self.conn.unchecked_transaction().map_err(store_error)?;
        let created_at = chrono::Utc::now().to_rfc3339();
        let mut batch = AnnotationBatch::default();
        for record in records {
            let type_id = lookup_id(
                &tx,
                "SELECT protein_type_id FROM protein_type WHERE type = ?1",
                record.source_kind.type_name(),
            )?;
            let result = tx.execute(
                r#"
                INSERT INTO protein
                    (protein_type_id, accession, name, definition, pathway, module, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (accession) DO NOTHING
                "#,
                params![
                    type_id,
                    record.accession.as_str(),
                    record.name,
                    record.definition,
                    record.pathway,
                    record.module,
                    created_at,
                ],
            );
            match result {
                Ok(1) => batch
                    .inserted
                    .push((record.accession.clone(), tx.last_insert_rowid())),
                Ok(_) => {
                    let id: i64 = tx
                        .query_row(
                            "SELECT protein_id FROM protein WHERE accession = ?1",
                            params![record.accession.as_str()],
                            |row| row.get(0),
                        )
                        .map_err(store_error)?;
                    batch.existing.push((record.accession.clone(), id));
                }
                Err(err) if is_constraint_violation(&err) => {
                    batch
                        .rejected
                        .push((record.accession.clone(), err.to_string()));
                }
                Err(err) => return Err(store_error(err)),
            }
        }
        tx.commit().map_err(store_error)?;
        Ok(batch)
    }

    fn count_associations(&self, sample_id: SampleId) -> Result<u64, LoaderError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sample_to_protein WHERE sample_id = ?1",
                params![sample_id.get()],
                |row| row.get(0),
            )
            .map_err(store_error)?;
        Ok(count as u64)
    }

    fn insert_associations(
        &self,
        evidence: EvidenceSource,
        rows: &[Association],
    ) -> Result<AssociationBatch, LoaderError> {
        let tx = self.conn.unchecked_transaction().map_err(store_error)?;
        let evidence_id = lookup_id(
            &tx,
            "SELECT protein_evidence_type_id FROM protein_evidence_type WHERE type = ?1",
            evidence.type_name(),
        )?;
        let mut batch = AssociationBatch::default();
        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO sample_to_protein
                        (sample_id, protein_id, protein_evidence_type_id, read_count)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                )
                .map_err(store_error)?;
            for row in rows {
                let Ok(read_count) = i64::try_from(row.read_count) else {
                    batch.failed.push((
                        row.accession.clone(),
                        format!("read count {} does not fit the store", row.read_count),
                    ));
                    continue;
                };
                match stmt.execute(params![
                    row.sample_id.get(),
                    row.annotation_id,
                    evidence_id,
                    read_count
                ]) {
                    Ok(_) => batch.inserted += 1,
                    Err(err) if is_unique_violation(&err) => {
                        batch.duplicates.push(row.accession.clone());
                    }
                    Err(err) if is_constraint_violation(&err) => {
                        batch.failed.push((row.accession.clone(), err.to_string()));
                    }
                    Err(err) => return Err(store_error(err)),
                }
            }
        }
        tx.commit().map_err(store_error)?;
        Ok(batch)
    }
}

fn lookup_id(conn: &Connection, sql: &str, value: &str) -> Result<i64, LoaderError> {
    conn.query_row(sql, params![value], |row| row.get(0))
        .optional()
        .map_err(store_error)?
        .ok_or_else(|| {
            LoaderError::Store(format!(
                "lookup row {value:?} is missing; run create-schema first"
            ))
        })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn store_error(err: rusqlite::Error) -> LoaderError {
    match err.sqlite_error_code() {
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::NotADatabase
            | ErrorCode::DiskFull
            | ErrorCode::ReadOnly,
        ) => LoaderError::StoreUnavailable(err.to_string()),
        _ => LoaderError::Store(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_schema().unwrap();
        store
    }

    fn record(accession: &str) -> AnnotationRecord {
        let accession: Accession = accession.parse().unwrap();
        AnnotationRecord {
            source_kind: SourceKind::classify(&accession).unwrap(),
            accession,
            name: "ampC".to_string(),
            definition: "beta-lactamase class C".to_string(),
            pathway: None,
            module: None,
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let store = store();
        store.create_schema().unwrap();
        let types: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM protein_type", [], |row| row.get(0))
            .unwrap();
        assert_eq!(types, 2);
    }

    #[test]
    fn existing_annotation_is_not_rewritten() {
        let store = store();
        let first = store.insert_annotations(&[record("K01467")]).unwrap();
        assert_eq!(first.inserted.len(), 1);

        let second = store.insert_annotations(&[record("K01467")]).unwrap();
        assert!(second.inserted.is_empty());
        assert_eq!(second.existing, first.inserted);
    }

    #[test]
    fn insert_requires_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.insert_annotations(&[record("K01467")]).is_err());
    }

    #[test]
    fn drop_annotation_tables_removes_everything() {
        let store = store();
        store.drop_annotation_tables().unwrap();
        let tables: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'protein%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }
}
