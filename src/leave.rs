use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

use crate::error::{AttendanceError, AttendanceResult};
use crate::models::{LeaveApplication, LeaveStatus};
use crate::store::LeaveRecordStore;

/// File a new leave application; it starts out Pending.
pub async fn apply_leave<L>(
    store: &L,
    student_id: &str,
    from_date: NaiveDate,
    to_date: NaiveDate,
    reason: &str,
) -> AttendanceResult<LeaveApplication>
where
    L: LeaveRecordStore + ?Sized,
{
    if from_date > to_date {
        return Err(AttendanceError::InvalidScope(format!(
            "leave starts {from_date} after it ends {to_date}"
        )));
    }

    let application = LeaveApplication {
        id: Uuid::new_v4(),
        student_id: student_id.to_string(),
        from_date,
        to_date,
        reason: reason.to_string(),
        status: LeaveStatus::Pending,
    };
    store.create_leave(&application).await?;
    info!(id = %application.id, student = student_id, "leave application filed");
    Ok(application)
}

/// Record the reviewer's decision. Only Pending applications can be
/// reviewed, and only once.
pub async fn review_leave<L>(
    store: &L,
    id: Uuid,
    decision: LeaveStatus,
) -> AttendanceResult<LeaveApplication>
where
    L: LeaveRecordStore + ?Sized,
{
    if decision == LeaveStatus::Pending {
        return Err(AttendanceError::InvalidStatus(
            "Pending is not a review decision".to_string(),
        ));
    }

    store.set_leave_status(id, decision).await?;
    let reviewed = store
        .get_leave(id)
        .await?
        .ok_or_else(|| AttendanceError::NotFound(format!("leave application {id}")))?;
    info!(id = %id, status = %reviewed.status, "leave application reviewed");
    Ok(reviewed)
}
