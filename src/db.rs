use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AttendanceError, AttendanceResult};
use crate::models::{
    AggregationScope, AttendanceRecord, AttendanceStatus, LeaveApplication, LeaveStatus,
};
use crate::store::{AttendanceRecordStore, LeaveRecordStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let subjects = vec![
        ("MATH101", "Calculus I", "SCI"),
        ("PHYS101", "Mechanics", "SCI"),
        ("ENG101", "Academic Writing", "HUM"),
    ];

    for (code, name, department) in subjects {
        sqlx::query(
            r#"
            INSERT INTO campus_attendance.subjects (code, name, department)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE
            SET name = EXCLUDED.name, department = EXCLUDED.department
            "#,
        )
        .bind(code)
        .bind(name)
        .bind(department)
        .execute(pool)
        .await?;
    }

    let rows = vec![
        ("STU-001", "MATH101", 3, "Present"),
        ("STU-001", "MATH101", 4, "Present"),
        ("STU-001", "MATH101", 5, "On-Leave"),
        ("STU-001", "PHYS101", 3, "Absent"),
        ("STU-002", "MATH101", 3, "Late"),
        ("STU-002", "MATH101", 4, "Present"),
        ("STU-002", "ENG101", 5, "Present"),
        ("STU-003", "ENG101", 3, "Absent"),
    ];

    let mut tx = pool.begin().await?;
    for (student_id, subject_code, day, status) in rows {
        let date = NaiveDate::from_ymd_opt(2026, 3, day).context("invalid date")?;
        sqlx::query(UPSERT_RECORD)
            .bind(student_id)
            .bind(subject_code)
            .bind("CS-2A")
            .bind(date)
            .bind("S2")
            .bind("2025-2026")
            .bind(status)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    sqlx::query(
        r#"
        INSERT INTO campus_attendance.leave_applications
        (id, student_id, from_date, to_date, reason, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(Uuid::parse_str("6a1f4c2e-8d53-4b8e-9a0c-2f7d1e5b9c31")?)
    .bind("STU-001")
    .bind(NaiveDate::from_ymd_opt(2026, 3, 5).context("invalid date")?)
    .bind(NaiveDate::from_ymd_opt(2026, 3, 5).context("invalid date")?)
    .bind("Medical appointment")
    .bind(LeaveStatus::Approved.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Import attendance rows from a CSV file as one batch.
pub async fn import_csv<S>(store: &S, csv_path: &Path) -> anyhow::Result<usize>
where
    S: AttendanceRecordStore + ?Sized,
{
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        subject_code: String,
        class_id: String,
        date: NaiveDate,
        semester: String,
        academic_year: String,
        status: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut records = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let status: AttendanceStatus = row
            .status
            .parse()
            .with_context(|| format!("row {}: bad status", line + 1))?;
        records.push(AttendanceRecord {
            student_id: row.student_id,
            subject_code: row.subject_code,
            class_id: row.class_id,
            date: row.date,
            semester: row.semester,
            academic_year: row.academic_year,
            status,
        });
    }

    let written = store.upsert_batch(&records).await?;
    Ok(written)
}

const UPSERT_RECORD: &str = r#"
    INSERT INTO campus_attendance.attendance
    (student_id, subject_code, class_id, date, semester, academic_year, status)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (student_id, subject_code, date) DO UPDATE
    SET status = EXCLUDED.status,
        class_id = EXCLUDED.class_id,
        semester = EXCLUDED.semester,
        academic_year = EXCLUDED.academic_year
"#;

/// Postgres-backed attendance and leave store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: &PgRow) -> AttendanceResult<AttendanceRecord> {
    let status: String = row.try_get("status")?;
    Ok(AttendanceRecord {
        student_id: row.try_get("student_id")?,
        subject_code: row.try_get("subject_code")?,
        class_id: row.try_get("class_id")?,
        date: row.try_get("date")?,
        semester: row.try_get("semester")?,
        academic_year: row.try_get("academic_year")?,
        status: status.parse()?,
    })
}

fn leave_from_row(row: &PgRow) -> AttendanceResult<LeaveApplication> {
    let status: String = row.try_get("status")?;
    Ok(LeaveApplication {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        from_date: row.try_get("from_date")?,
        to_date: row.try_get("to_date")?,
        reason: row.try_get("reason")?,
        status: status.parse()?,
    })
}

#[async_trait]
impl AttendanceRecordStore for PgStore {
    async fn scan(&self, scope: &AggregationScope) -> AttendanceResult<Vec<AttendanceRecord>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT student_id, subject_code, class_id, date, semester, academic_year, status \
             FROM campus_attendance.attendance WHERE TRUE",
        );

        if let Some(value) = &scope.student_id {
            query.push(" AND student_id = ").push_bind(value);
        }
        if let Some(value) = &scope.class_id {
            query.push(" AND class_id = ").push_bind(value);
        }
        if let Some(value) = &scope.subject_code {
            query.push(" AND subject_code = ").push_bind(value);
        }
        if let Some(value) = &scope.period.semester {
            query.push(" AND semester = ").push_bind(value);
        }
        if let Some(value) = &scope.period.academic_year {
            query.push(" AND academic_year = ").push_bind(value);
        }
        if let Some((from, to)) = scope.period.date_range {
            query
                .push(" AND date BETWEEN ")
                .push_bind(from)
                .push(" AND ")
                .push_bind(to);
        }
        query.push(" ORDER BY date, student_id, subject_code");

        let rows = query.build().fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), "scanned attendance rows");
        rows.iter().map(record_from_row).collect()
    }

    async fn upsert_batch(&self, records: &[AttendanceRecord]) -> AttendanceResult<usize> {
        let batch_failure = |err: sqlx::Error| AttendanceError::PartialBatchFailure {
            attempted: records.len(),
            reason: err.to_string(),
        };

        // Nothing is written yet, so a failed begin is a plain store error.
        let mut tx = self.pool.begin().await?;
        // Dropping the transaction without commit rolls the batch back.
        for record in records {
            sqlx::query(UPSERT_RECORD)
                .bind(&record.student_id)
                .bind(&record.subject_code)
                .bind(&record.class_id)
                .bind(record.date)
                .bind(&record.semester)
                .bind(&record.academic_year)
                .bind(record.status.as_str())
                .execute(&mut *tx)
                .await
                .map_err(batch_failure)?;
        }
        tx.commit().await.map_err(batch_failure)?;

        info!(rows = records.len(), "committed attendance batch");
        Ok(records.len())
    }

    async fn exists(&self, student_id: &str, date: NaiveDate) -> AttendanceResult<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM campus_attendance.attendance \
             WHERE student_id = $1 AND date = $2)",
        )
        .bind(student_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }
}

#[async_trait]
impl LeaveRecordStore for PgStore {
    async fn create_leave(&self, application: &LeaveApplication) -> AttendanceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO campus_attendance.leave_applications
            (id, student_id, from_date, to_date, reason, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(application.id)
        .bind(&application.student_id)
        .bind(application.from_date)
        .bind(application.to_date)
        .bind(&application.reason)
        .bind(application.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_leave(&self, id: Uuid) -> AttendanceResult<Option<LeaveApplication>> {
        let row = sqlx::query(
            "SELECT id, student_id, from_date, to_date, reason, status \
             FROM campus_attendance.leave_applications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(leave_from_row).transpose()
    }

    async fn set_leave_status(&self, id: Uuid, status: LeaveStatus) -> AttendanceResult<()> {
        let result = sqlx::query(
            "UPDATE campus_attendance.leave_applications SET status = $2 \
             WHERE id = $1 AND status = 'Pending'",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        match self.get_leave(id).await? {
            Some(existing) => Err(AttendanceError::InvalidTransition {
                id: id.to_string(),
                status: existing.status.to_string(),
            }),
            None => Err(AttendanceError::NotFound(format!("leave application {id}"))),
        }
    }

    async fn approved_leaves(
        &self,
        student_ids: &[String],
    ) -> AttendanceResult<Vec<LeaveApplication>> {
        let rows = sqlx::query(
            "SELECT id, student_id, from_date, to_date, reason, status \
             FROM campus_attendance.leave_applications \
             WHERE status = 'Approved' \
             AND (cardinality($1::text[]) = 0 OR student_id = ANY($1))",
        )
        .bind(student_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(leave_from_row).collect()
    }

    async fn is_active_leave(&self, student_id: &str, date: NaiveDate) -> AttendanceResult<bool> {
        let active: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM campus_attendance.leave_applications \
             WHERE student_id = $1 AND status = 'Approved' \
             AND $2 BETWEEN from_date AND to_date)",
        )
        .bind(student_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(active)
    }
}
