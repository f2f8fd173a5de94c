use std::collections::BTreeMap;
use std::fmt::Write;

use crate::aggregate::AttendanceAggregator;
use crate::error::AttendanceResult;
use crate::models::{AggregationScope, Period, StudentStanding, TrendPoint};

/// Everything the class report renders, gathered before any text is written
/// so a failed read never yields a half-filled report.
#[derive(Debug, Clone)]
pub struct ClassReport {
    pub class_id: String,
    pub academic_year: String,
    pub threshold: f64,
    pub monthly: Vec<TrendPoint>,
    pub semesters: BTreeMap<String, f64>,
    pub students: BTreeMap<String, f64>,
    pub flagged: Vec<StudentStanding>,
}

pub async fn gather_class_report(
    aggregator: &AttendanceAggregator,
    class_id: &str,
    academic_year: &str,
    threshold: f64,
) -> AttendanceResult<ClassReport> {
    let scope = AggregationScope::new(
        None,
        Some(class_id),
        None,
        Period::academic_year(academic_year),
    )?;
    let monthly = aggregator.monthly_trend_for(&scope).await?;
    let semesters = aggregator.semester_trend_for(&scope).await?;
    let students = aggregator
        .summary_by_student(class_id, Period::academic_year(academic_year))
        .await?;
    let flagged = aggregator
        .below_threshold(class_id, Period::academic_year(academic_year), threshold)
        .await?;

    Ok(ClassReport {
        class_id: class_id.to_string(),
        academic_year: academic_year.to_string(),
        threshold,
        monthly,
        semesters,
        students,
        flagged,
    })
}

pub fn build_report(report: &ClassReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Class Attendance Report");
    let _ = writeln!(
        output,
        "Generated for class {} (academic year {})",
        report.class_id, report.academic_year
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Trend");

    if report.monthly.is_empty() {
        let _ = writeln!(output, "No attendance recorded for this year.");
    } else {
        for point in report.monthly.iter() {
            let _ = writeln!(output, "- {}: {:.1}%", point.bucket, point.percentage);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Semesters");

    if report.semesters.is_empty() {
        let _ = writeln!(output, "No attendance recorded for this year.");
    } else {
        for (semester, percentage) in report.semesters.iter() {
            let _ = writeln!(output, "- {}: {:.1}%", semester, percentage);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Below {:.0}% Attendance", report.threshold);

    if report.flagged.is_empty() {
        let _ = writeln!(output, "No students below the threshold.");
    } else {
        for standing in report.flagged.iter() {
            let _ = writeln!(
                output,
                "- {} at {:.1}%",
                standing.student_id, standing.percentage
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## All Students");

    if report.students.is_empty() {
        let _ = writeln!(output, "No students with attendance records.");
    } else {
        for (student_id, percentage) in report.students.iter() {
            let _ = writeln!(output, "- {}: {:.1}%", student_id, percentage);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;

    use crate::models::{AttendanceRecord, AttendanceStatus};
    use crate::store::{AttendanceRecordStore, MemoryStore};

    fn row(student: &str, month: u32, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            student_id: student.to_string(),
            subject_code: "MATH".to_string(),
            class_id: "10A".to_string(),
            date: NaiveDate::from_ymd_opt(2025, month, 3).unwrap(),
            semester: "S2".to_string(),
            academic_year: "2024-2025".to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn report_lists_flagged_students_and_months() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_batch(&[
                row("s1", 2, AttendanceStatus::Absent),
                row("s2", 2, AttendanceStatus::Present),
                row("s2", 4, AttendanceStatus::Present),
            ])
            .await
            .unwrap();
        let aggregator = AttendanceAggregator::new(store.clone(), store.clone());

        let gathered = gather_class_report(&aggregator, "10A", "2024-2025", 75.0)
            .await
            .unwrap();
        let text = build_report(&gathered);

        assert!(text.contains("- February: 50.0%"));
        assert!(text.contains("- March: 0.0%"));
        assert!(text.contains("- s1 at 0.0%"));
        assert!(!text.contains("- s2 at"));
        assert!(text.contains("- S2: 66.7%"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = ClassReport {
            class_id: "10A".to_string(),
            academic_year: "2024-2025".to_string(),
            threshold: 75.0,
            monthly: Vec::new(),
            semesters: BTreeMap::new(),
            students: BTreeMap::new(),
            flagged: Vec::new(),
        };
        let text = build_report(&report);
        assert!(text.contains("No attendance recorded for this year."));
        assert!(text.contains("No students below the threshold."));
    }
}
