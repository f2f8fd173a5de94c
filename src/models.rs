use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AttendanceError, AttendanceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    #[serde(rename = "On-Leave")]
    OnLeave,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Late => "Late",
            AttendanceStatus::OnLeave => "On-Leave",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = AttendanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Present" => Ok(AttendanceStatus::Present),
            "Absent" => Ok(AttendanceStatus::Absent),
            "Late" => Ok(AttendanceStatus::Late),
            "On-Leave" => Ok(AttendanceStatus::OnLeave),
            other => Err(AttendanceError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "Pending",
            LeaveStatus::Approved => "Approved",
            LeaveStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaveStatus {
    type Err = AttendanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Pending" => Ok(LeaveStatus::Pending),
            "Approved" => Ok(LeaveStatus::Approved),
            "Rejected" => Ok(LeaveStatus::Rejected),
            other => Err(AttendanceError::InvalidStatus(other.to_string())),
        }
    }
}

/// Session roles, listed from most to least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Principal,
    #[serde(rename = "HOD")]
    Hod,
    ClassTeacher,
    Teacher,
    Student,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Principal,
        Role::Hod,
        Role::ClassTeacher,
        Role::Teacher,
        Role::Student,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Principal => "Principal",
            Role::Hod => "HOD",
            Role::ClassTeacher => "ClassTeacher",
            Role::Teacher => "Teacher",
            Role::Student => "Student",
        }
    }

    /// Path prefix owned by this role.
    pub fn path_prefix(&self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            Role::Principal => "/principal",
            Role::Hod => "/hod",
            Role::ClassTeacher => "/classteacher",
            Role::Teacher => "/teacher",
            Role::Student => "/student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AttendanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| AttendanceError::UnknownRole(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub subject_code: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub semester: String,
    pub academic_year: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveApplication {
    pub id: Uuid,
    pub student_id: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub reason: String,
    pub status: LeaveStatus,
}

impl LeaveApplication {
    pub fn covers(&self, student_id: &str, date: NaiveDate) -> bool {
        self.status == LeaveStatus::Approved
            && self.student_id == student_id
            && self.from_date <= date
            && date <= self.to_date
    }
}

/// What an aggregation is computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Student(String),
    Class(String),
    SubjectCode(String),
}

/// When an aggregation is computed over. An empty period matches every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Period {
    pub semester: Option<String>,
    pub academic_year: Option<String>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl Period {
    pub fn academic_year(year: &str) -> Self {
        Self {
            academic_year: Some(year.to_string()),
            ..Self::default()
        }
    }

    pub fn semester(semester: &str, year: &str) -> Self {
        Self {
            semester: Some(semester.to_string()),
            academic_year: Some(year.to_string()),
            date_range: None,
        }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            date_range: Some((from, to)),
            ..Self::default()
        }
    }

    pub fn contains(&self, record: &AttendanceRecord) -> bool {
        if let Some(semester) = &self.semester {
            if &record.semester != semester {
                return false;
            }
        }
        if let Some(year) = &self.academic_year {
            if &record.academic_year != year {
                return false;
            }
        }
        if let Some((from, to)) = self.date_range {
            if record.date < from || record.date > to {
                return false;
            }
        }
        true
    }
}

/// Filter handed to `AttendanceRecordStore::scan`.
///
/// Callers build one per request from raw parameters through
/// [`AggregationScope::new`], which rejects ambiguous scopes before any
/// query is issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationScope {
    pub student_id: Option<String>,
    pub class_id: Option<String>,
    pub subject_code: Option<String>,
    pub period: Period,
}

impl AggregationScope {
    pub fn new(
        student_id: Option<&str>,
        class_id: Option<&str>,
        subject_code: Option<&str>,
        period: Period,
    ) -> AttendanceResult<Self> {
        let dimensions = [student_id, class_id, subject_code]
            .iter()
            .filter(|value| value.is_some())
            .count();
        if dimensions != 1 {
            return Err(AttendanceError::InvalidScope(format!(
                "expected exactly one of student, class or subject, got {dimensions}"
            )));
        }
        let scope = Self {
            student_id: student_id.map(str::to_string),
            class_id: class_id.map(str::to_string),
            subject_code: subject_code.map(str::to_string),
            period,
        };
        scope.validate_period()?;
        Ok(scope)
    }

    pub fn of(subject: Subject, period: Period) -> AttendanceResult<Self> {
        match subject {
            Subject::Student(id) => Self::new(Some(&id), None, None, period),
            Subject::Class(id) => Self::new(None, Some(&id), None, period),
            Subject::SubjectCode(code) => Self::new(None, None, Some(&code), period),
        }
    }

    /// Scope over every record in a period, used by institution-wide trends.
    pub fn period_only(period: Period) -> AttendanceResult<Self> {
        let scope = Self {
            period,
            ..Self::default()
        };
        scope.validate_period()?;
        Ok(scope)
    }

    /// Narrow a student scope to a single subject.
    pub(crate) fn with_subject(mut self, subject_code: &str) -> Self {
        self.subject_code = Some(subject_code.to_string());
        self
    }

    fn validate_period(&self) -> AttendanceResult<()> {
        if let Some((from, to)) = self.period.date_range {
            if from > to {
                return Err(AttendanceError::InvalidScope(format!(
                    "date range starts {from} after it ends {to}"
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        if let Some(id) = &self.student_id {
            if &record.student_id != id {
                return false;
            }
        }
        if let Some(id) = &self.class_id {
            if &record.class_id != id {
                return false;
            }
        }
        if let Some(code) = &self.subject_code {
            if &record.subject_code != code {
                return false;
            }
        }
        self.period.contains(record)
    }
}

/// The fixed part of one marking session; every student in a bulk mark
/// shares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkSheet {
    pub subject_code: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub semester: String,
    pub academic_year: String,
}

impl MarkSheet {
    pub fn record_for(&self, student_id: &str, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            student_id: student_id.to_string(),
            subject_code: self.subject_code.clone(),
            class_id: self.class_id.clone(),
            date: self.date,
            semester: self.semester.clone(),
            academic_year: self.academic_year.clone(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub bucket: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentStanding {
    pub student_id: String,
    pub percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn statuses_parse_exact_strings_only() {
        assert_eq!("On-Leave".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::OnLeave);
        assert!("present".parse::<AttendanceStatus>().is_err());
        assert_eq!("Approved".parse::<LeaveStatus>().unwrap(), LeaveStatus::Approved);
        assert_eq!("HOD".parse::<Role>().unwrap(), Role::Hod);
        assert!("Janitor".parse::<Role>().is_err());
    }

    #[test]
    fn scope_requires_exactly_one_dimension() {
        assert!(AggregationScope::new(None, None, None, Period::default()).is_err());
        assert!(AggregationScope::new(Some("s1"), Some("c1"), None, Period::default()).is_err());
        assert!(AggregationScope::new(Some("s1"), None, None, Period::default()).is_ok());
    }

    #[test]
    fn scope_rejects_inverted_range() {
        let period = Period::between(date(2025, 3, 10), date(2025, 3, 1));
        let err = AggregationScope::new(None, Some("c1"), None, period).unwrap_err();
        assert!(matches!(err, AttendanceError::InvalidScope(_)));
    }

    #[test]
    fn approved_leave_covers_inclusive_range() {
        let leave = LeaveApplication {
            id: Uuid::new_v4(),
            student_id: "s1".to_string(),
            from_date: date(2025, 3, 3),
            to_date: date(2025, 3, 5),
            reason: "fever".to_string(),
            status: LeaveStatus::Approved,
        };
        assert!(leave.covers("s1", date(2025, 3, 3)));
        assert!(leave.covers("s1", date(2025, 3, 5)));
        assert!(!leave.covers("s1", date(2025, 3, 6)));
        assert!(!leave.covers("s2", date(2025, 3, 4)));

        let pending = LeaveApplication {
            status: LeaveStatus::Pending,
            ..leave
        };
        assert!(!pending.covers("s1", date(2025, 3, 4)));
    }
}
