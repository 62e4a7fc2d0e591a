//! Job loading and updating
//!
//! Rows are inserted once the scheduler has accepted a submission. After that only the lifecycle
//! columns change (see [JobStore::save_lifecycle]); calculation parameters are never rewritten.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::calculation::{Calculation, CalculationType};
use crate::job::{Job, JobStatus, JobStore, StoreError};

const COLUMNS: &str = "job_id, job_name, input_file, calculation_type, method, basis_set, charge, \
    multiplicity, scheduler_id, status, submitted_at, completed_at, runtime_seconds, is_uploaded, upload_error";

pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn new(conn: Connection) -> Self {
        SqliteJobStore { conn: Mutex::new(conn) }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic while holding the lock can't leave a half-applied statement behind
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn query(&self, sql: &str, param: Option<&str>) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = match param {
            Some(p) => stmt.query_map([p], RawJob::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt.query_map([], RawJob::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
        };
        rows.into_iter().map(RawJob::into_job).collect()
    }

    fn query_one(&self, sql: &str, param: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.conn();
        let raw = conn
            .query_row(sql, [param], RawJob::from_row)
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &Job) -> Result<(), StoreError> {
        info!("Adding job {} to db", job.job_id);
        let result = self.conn().execute(
            &format!("INSERT INTO job ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"),
            params![
                job.job_id,
                job.job_name,
                job.input_file,
                job.calculation.calculation_type.as_str(),
                job.calculation.method,
                job.calculation.basis_set,
                job.calculation.charge,
                job.calculation.multiplicity,
                job.scheduler_id,
                job.status.as_str(),
                job.submitted_at.to_rfc3339(),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.runtime_seconds,
                job.is_uploaded,
                job.upload_error,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Duplicate(job.job_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        self.query_one(&format!("SELECT {COLUMNS} FROM job WHERE job_id = ?1"), job_id)
    }

    fn find_by_scheduler_id(&self, scheduler_id: &str) -> Result<Option<Job>, StoreError> {
        self.query_one(
            &format!("SELECT {COLUMNS} FROM job WHERE scheduler_id = ?1 ORDER BY submitted_at DESC, rowid DESC LIMIT 1"),
            scheduler_id,
        )
    }

    fn active(&self) -> Result<Vec<Job>, StoreError> {
        self.query(
            &format!("SELECT {COLUMNS} FROM job WHERE status IN ('pending', 'running') ORDER BY submitted_at ASC, rowid ASC"),
            None,
        )
    }

    fn list(&self) -> Result<Vec<Job>, StoreError> {
        self.query(&format!("SELECT {COLUMNS} FROM job ORDER BY submitted_at DESC, rowid DESC"), None)
    }

    fn save_lifecycle(&self, job: &Job) -> Result<(), StoreError> {
        info!("Updating {} with state {} (uploaded: {})", job.job_id, job.status, job.is_uploaded);
        let updated = self.conn().execute(
            "UPDATE job SET status = ?1, completed_at = ?2, runtime_seconds = ?3, is_uploaded = ?4, \
             upload_error = ?5 WHERE job_id = ?6",
            params![
                job.status.as_str(),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.runtime_seconds,
                job.is_uploaded,
                job.upload_error,
                job.job_id,
            ],
        )?;
        match updated {
            1 => Ok(()),
            _ => Err(StoreError::Corrupt { job_id: job.job_id.clone(), reason: "no such row".to_string() }),
        }
    }
}

/// Column values as stored, before parsing into domain types
struct RawJob {
    job_id: String,
    job_name: Option<String>,
    input_file: String,
    calculation_type: String,
    method: String,
    basis_set: String,
    charge: i32,
    multiplicity: u8,
    scheduler_id: Option<String>,
    status: String,
    submitted_at: String,
    completed_at: Option<String>,
    runtime_seconds: Option<i64>,
    is_uploaded: bool,
    upload_error: Option<String>,
}

impl RawJob {
    fn from_row(row: &Row) -> rusqlite::Result<RawJob> {
        Ok(RawJob {
            job_id: row.get(0)?,
            job_name: row.get(1)?,
            input_file: row.get(2)?,
            calculation_type: row.get(3)?,
            method: row.get(4)?,
            basis_set: row.get(5)?,
            charge: row.get(6)?,
            multiplicity: row.get(7)?,
            scheduler_id: row.get(8)?,
            status: row.get(9)?,
            submitted_at: row.get(10)?,
            completed_at: row.get(11)?,
            runtime_seconds: row.get(12)?,
            is_uploaded: row.get(13)?,
            upload_error: row.get(14)?,
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        let job_id = self.job_id;
        let corrupt = |reason: String| StoreError::Corrupt { job_id: job_id.clone(), reason };

        let status: JobStatus = self.status.parse().map_err(|e| corrupt(format!("{e}")))?;
        let submitted_at = parse_time(&self.submitted_at).map_err(&corrupt)?;
        let completed_at = self.completed_at.as_deref().map(parse_time).transpose().map_err(&corrupt)?;

        Ok(Job {
            job_id: job_id.clone(),
            job_name: self.job_name,
            input_file: self.input_file,
            calculation: Calculation {
                calculation_type: CalculationType::from(self.calculation_type),
                method: self.method,
                basis_set: self.basis_set,
                charge: self.charge,
                multiplicity: self.multiplicity,
            },
            scheduler_id: self.scheduler_id,
            status,
            submitted_at,
            completed_at,
            runtime_seconds: self.runtime_seconds,
            is_uploaded: self.is_uploaded,
            upload_error: self.upload_error,
        })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {value:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open::open_in_memory;

    fn store() -> SqliteJobStore {
        SqliteJobStore::new(open_in_memory().unwrap())
    }

    fn job(job_id: &str, scheduler_id: &str) -> Job {
        let mut job = Job::pending(
            job_id.to_string(),
            Some("water".to_string()),
            "water.xyz".to_string(),
            Calculation {
                calculation_type: CalculationType::Energy,
                method: "HF".to_string(),
                basis_set: "6-311G(2d,p)".to_string(),
                charge: -1,
                multiplicity: 2,
            },
        );
        job.scheduler_id = Some(scheduler_id.to_string());
        job
    }

    #[test]
    fn test_insert_and_get() {
        let store = store();
        let job = job("j1", "12345");
        store.insert(&job).unwrap();

        let loaded = store.get("j1").unwrap().unwrap();
        assert_eq!(loaded.calculation, job.calculation);
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.scheduler_id.as_deref(), Some("12345"));
        assert_eq!(loaded.submitted_at.timestamp(), job.submitted_at.timestamp());
        assert!(!loaded.is_uploaded);

        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let store = store();
        store.insert(&job("j1", "1")).unwrap();
        assert!(matches!(store.insert(&job("j1", "2")), Err(StoreError::Duplicate(id)) if id == "j1"));
    }

    #[test]
    fn test_save_lifecycle_only_touches_lifecycle_fields() {
        let store = store();
        let mut job = job("j1", "12345");
        store.insert(&job).unwrap();

        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.runtime_seconds = Some(42);
        job.is_uploaded = true;
        job.calculation.method = "MP2".to_string();
        store.save_lifecycle(&job).unwrap();

        let loaded = store.get("j1").unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.runtime_seconds, Some(42));
        assert!(loaded.is_uploaded);
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.calculation.method, "HF");
    }

    #[test]
    fn test_save_lifecycle_of_missing_job() {
        let store = store();
        assert!(matches!(store.save_lifecycle(&job("ghost", "1")), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_active_and_lookup_by_scheduler_id() {
        let store = store();
        store.insert(&job("j1", "100")).unwrap();
        let mut done = job("j2", "200");
        done.status = JobStatus::Failed;
        store.insert(&done).unwrap();

        let active: Vec<String> = store.active().unwrap().into_iter().map(|j| j.job_id).collect();
        assert_eq!(active, vec!["j1".to_string()]);
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(store.find_by_scheduler_id("200").unwrap().unwrap().job_id, "j2");
        assert!(store.find_by_scheduler_id("300").unwrap().is_none());
    }
}
