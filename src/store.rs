//! Storage seams for attendance rows and leave applications.
//!
//! The aggregator only talks to these traits. `PgStore` in `db.rs` is the
//! production backing; `MemoryStore` keeps the same contracts in process.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::{AttendanceError, AttendanceResult};
use crate::models::{AggregationScope, AttendanceRecord, LeaveApplication, LeaveStatus};

#[async_trait]
pub trait AttendanceRecordStore: Send + Sync {
    /// All rows matching the scope, fully materialized.
    async fn scan(&self, scope: &AggregationScope) -> AttendanceResult<Vec<AttendanceRecord>>;

    /// Upsert every row as one unit. Either all rows are visible afterwards
    /// or none are; a failure is reported as `PartialBatchFailure`.
    async fn upsert_batch(&self, records: &[AttendanceRecord]) -> AttendanceResult<usize>;

    async fn exists(&self, student_id: &str, date: NaiveDate) -> AttendanceResult<bool>;
}

#[async_trait]
pub trait LeaveRecordStore: Send + Sync {
    async fn create_leave(&self, application: &LeaveApplication) -> AttendanceResult<()>;

    async fn get_leave(&self, id: Uuid) -> AttendanceResult<Option<LeaveApplication>>;

    /// Move a Pending application to its terminal status.
    async fn set_leave_status(&self, id: Uuid, status: LeaveStatus) -> AttendanceResult<()>;

    /// Approved applications for the given students. An empty slice means
    /// every student.
    async fn approved_leaves(&self, student_ids: &[String])
        -> AttendanceResult<Vec<LeaveApplication>>;

    async fn is_active_leave(&self, student_id: &str, date: NaiveDate) -> AttendanceResult<bool> {
        let leaves = self.approved_leaves(&[student_id.to_string()]).await?;
        Ok(leaves.iter().any(|leave| leave.covers(student_id, date)))
    }
}

type RecordKey = (String, String, NaiveDate);

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<RecordKey, AttendanceRecord>,
    leaves: BTreeMap<Uuid, LeaveApplication>,
}

/// In-process store. When a subject catalogue is registered, rows for
/// unknown subjects are rejected the way the database's foreign key would.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    subjects: Option<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subjects<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: RwLock::default(),
            subjects: Some(subjects.into_iter().map(Into::into).collect()),
        }
    }

    pub fn record_count(&self) -> AttendanceResult<usize> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.records.len())
    }

    fn poisoned() -> AttendanceError {
        AttendanceError::StoreUnavailable("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl AttendanceRecordStore for MemoryStore {
    async fn scan(&self, scope: &AggregationScope) -> AttendanceResult<Vec<AttendanceRecord>> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .records
            .values()
            .filter(|record| scope.matches(record))
            .cloned()
            .collect())
    }

    async fn upsert_batch(&self, records: &[AttendanceRecord]) -> AttendanceResult<usize> {
        if let Some(subjects) = &self.subjects {
            if let Some(bad) = records
                .iter()
                .find(|record| !subjects.contains(&record.subject_code))
            {
                return Err(AttendanceError::PartialBatchFailure {
                    attempted: records.len(),
                    reason: format!(
                        "unknown subject {} for student {}",
                        bad.subject_code, bad.student_id
                    ),
                });
            }
        }

        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        for record in records {
            let key = (
                record.student_id.clone(),
                record.subject_code.clone(),
                record.date,
            );
            state.records.insert(key, record.clone());
        }
        Ok(records.len())
    }

    async fn exists(&self, student_id: &str, date: NaiveDate) -> AttendanceResult<bool> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .records
            .values()
            .any(|record| record.student_id == student_id && record.date == date))
    }
}

#[async_trait]
impl LeaveRecordStore for MemoryStore {
    async fn create_leave(&self, application: &LeaveApplication) -> AttendanceResult<()> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        state.leaves.insert(application.id, application.clone());
        Ok(())
    }

    async fn get_leave(&self, id: Uuid) -> AttendanceResult<Option<LeaveApplication>> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.leaves.get(&id).cloned())
    }

    async fn set_leave_status(&self, id: Uuid, status: LeaveStatus) -> AttendanceResult<()> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let leave = state
            .leaves
            .get_mut(&id)
            .ok_or_else(|| AttendanceError::NotFound(format!("leave application {id}")))?;
        if leave.status != LeaveStatus::Pending {
            return Err(AttendanceError::InvalidTransition {
                id: id.to_string(),
                status: leave.status.to_string(),
            });
        }
        leave.status = status;
        Ok(())
    }

    async fn approved_leaves(
        &self,
        student_ids: &[String],
    ) -> AttendanceResult<Vec<LeaveApplication>> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .leaves
            .values()
            .filter(|leave| leave.status == LeaveStatus::Approved)
            .filter(|leave| student_ids.is_empty() || student_ids.contains(&leave.student_id))
            .cloned()
            .collect())
    }
}
