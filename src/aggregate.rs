use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Datelike, Month, NaiveDate};
use tracing::{debug, info};

use crate::error::AttendanceResult;
use crate::models::{
    AggregationScope, AttendanceRecord, AttendanceStatus, LeaveApplication, LeaveStatus,
    MarkSheet, Period, StudentStanding, TrendPoint,
};
use crate::store::{AttendanceRecordStore, LeaveRecordStore};

/// Percentage with on-leave days removed from the denominator.
///
/// No records at all is 0%; records that were all on leave is 100%.
pub fn attendance_percentage(total: usize, present: usize, on_leave: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let effective_total = total.saturating_sub(on_leave);
    if effective_total == 0 {
        return 100.0;
    }
    100.0 * present as f64 / effective_total as f64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketTally {
    pub total: usize,
    pub present: usize,
    pub on_leave: usize,
}

impl BucketTally {
    pub fn add(&mut self, status: AttendanceStatus, leave_covered: bool) {
        self.total += 1;
        if status == AttendanceStatus::OnLeave || leave_covered {
            self.on_leave += 1;
        } else if status == AttendanceStatus::Present {
            self.present += 1;
        }
    }

    pub fn effective_total(&self) -> usize {
        self.total.saturating_sub(self.on_leave)
    }

    pub fn percentage(&self) -> f64 {
        attendance_percentage(self.total, self.present, self.on_leave)
    }
}

/// Approved leave applications for the students in one scan, indexed by
/// student. Coverage itself is decided by [`LeaveApplication::covers`].
#[derive(Debug, Default)]
pub struct LeaveCalendar {
    by_student: HashMap<String, Vec<LeaveApplication>>,
}

impl LeaveCalendar {
    pub fn from_applications(applications: &[LeaveApplication]) -> Self {
        let mut by_student: HashMap<String, Vec<LeaveApplication>> = HashMap::new();
        for leave in applications {
            // Pending and rejected applications never cover a date.
            if leave.status == LeaveStatus::Approved {
                by_student
                    .entry(leave.student_id.clone())
                    .or_default()
                    .push(leave.clone());
            }
        }
        Self { by_student }
    }

    pub fn covers(&self, student_id: &str, date: NaiveDate) -> bool {
        self.by_student
            .get(student_id)
            .map(|leaves| leaves.iter().any(|leave| leave.covers(student_id, date)))
            .unwrap_or(false)
    }
}

/// Group records into buckets and tally each one.
pub fn tally_by<K, F>(
    records: &[AttendanceRecord],
    leaves: &LeaveCalendar,
    key: F,
) -> BTreeMap<K, BucketTally>
where
    K: Ord,
    F: Fn(&AttendanceRecord) -> K,
{
    let mut buckets: BTreeMap<K, BucketTally> = BTreeMap::new();
    for record in records {
        let covered = leaves.covers(&record.student_id, record.date);
        buckets
            .entry(key(record))
            .or_default()
            .add(record.status, covered);
    }
    buckets
}

pub fn tally(records: &[AttendanceRecord], leaves: &LeaveCalendar) -> BucketTally {
    let mut tally = BucketTally::default();
    for record in records {
        tally.add(record.status, leaves.covers(&record.student_id, record.date));
    }
    tally
}

/// Calendar-month trend in chronological order.
///
/// Every month between the first and last observed month gets a point, so a
/// month without records shows up as 0%. Labels are bare month names unless
/// the span is longer than a year.
pub fn monthly_points(records: &[AttendanceRecord], leaves: &LeaveCalendar) -> Vec<TrendPoint> {
    let buckets = tally_by(records, leaves, |record| {
        (record.date.year(), record.date.month())
    });
    let (Some(first), Some(last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
        return Vec::new();
    };

    let span = month_index(*last) - month_index(*first) + 1;
    let label_year = span > 12;
    let mut points = Vec::with_capacity(span as usize);
    let (mut year, mut month) = *first;

    loop {
        let tally = buckets.get(&(year, month)).copied().unwrap_or_default();
        points.push(TrendPoint {
            bucket: month_label(year, month, label_year),
            percentage: tally.percentage(),
        });
        if (year, month) == *last {
            break;
        }
        (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    }
    points
}

fn month_index((year, month): (i32, u32)) -> i64 {
    year as i64 * 12 + month as i64 - 1
}

fn month_label(year: i32, month: u32, with_year: bool) -> String {
    let name = u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map(|m| m.name().to_string())
        .unwrap_or_else(|| month.to_string());
    if with_year {
        format!("{name} {year}")
    } else {
        name
    }
}

fn percentages<K: Ord>(buckets: BTreeMap<K, BucketTally>) -> BTreeMap<K, f64> {
    buckets
        .into_iter()
        .map(|(key, tally)| (key, tally.percentage()))
        .collect()
}

/// Turns attendance rows and leave coverage into percentages and trends.
///
/// Every call reads the stores afresh; nothing is cached between requests.
pub struct AttendanceAggregator {
    records: Arc<dyn AttendanceRecordStore>,
    leaves: Arc<dyn LeaveRecordStore>,
}

impl AttendanceAggregator {
    pub fn new(records: Arc<dyn AttendanceRecordStore>, leaves: Arc<dyn LeaveRecordStore>) -> Self {
        Self { records, leaves }
    }

    /// Scan the scope and resolve leave coverage before any arithmetic runs.
    async fn load(
        &self,
        scope: &AggregationScope,
    ) -> AttendanceResult<(Vec<AttendanceRecord>, LeaveCalendar)> {
        let records = self.records.scan(scope).await?;
        if records.is_empty() {
            return Ok((records, LeaveCalendar::default()));
        }

        let students: Vec<String> = records
            .iter()
            .map(|record| record.student_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let applications = self.leaves.approved_leaves(&students).await?;
        debug!(
            records = records.len(),
            students = students.len(),
            leaves = applications.len(),
            "loaded aggregation scope"
        );
        Ok((records, LeaveCalendar::from_applications(&applications)))
    }

    pub async fn calculate_percentage(
        &self,
        student_id: &str,
        subject_code: &str,
        semester: &str,
        academic_year: &str,
    ) -> AttendanceResult<f64> {
        let scope = AggregationScope::new(
            Some(student_id),
            None,
            None,
            Period::semester(semester, academic_year),
        )?
        .with_subject(subject_code);
        self.percentage_for(&scope).await
    }

    pub async fn percentage_for(&self, scope: &AggregationScope) -> AttendanceResult<f64> {
        let (records, leaves) = self.load(scope).await?;
        Ok(tally(&records, &leaves).percentage())
    }

    /// Institution-wide monthly trend for an academic year.
    pub async fn monthly_trend(&self, academic_year: &str) -> AttendanceResult<Vec<TrendPoint>> {
        let scope = AggregationScope::period_only(Period::academic_year(academic_year))?;
        self.monthly_trend_for(&scope).await
    }

    pub async fn monthly_trend_for(
        &self,
        scope: &AggregationScope,
    ) -> AttendanceResult<Vec<TrendPoint>> {
        let (records, leaves) = self.load(scope).await?;
        Ok(monthly_points(&records, &leaves))
    }

    /// Institution-wide trend keyed by semester for an academic year.
    pub async fn semester_trend(
        &self,
        academic_year: &str,
    ) -> AttendanceResult<BTreeMap<String, f64>> {
        let scope = AggregationScope::period_only(Period::academic_year(academic_year))?;
        self.semester_trend_for(&scope).await
    }

    pub async fn semester_trend_for(
        &self,
        scope: &AggregationScope,
    ) -> AttendanceResult<BTreeMap<String, f64>> {
        let (records, leaves) = self.load(scope).await?;
        Ok(percentages(tally_by(&records, &leaves, |record| {
            record.semester.clone()
        })))
    }

    /// Per-subject percentages for one student. Subjects without records
    /// are absent from the map rather than reported as 0%.
    pub async fn summary_by_subject(
        &self,
        student_id: &str,
        semester: &str,
        academic_year: &str,
    ) -> AttendanceResult<BTreeMap<String, f64>> {
        let scope = AggregationScope::new(
            Some(student_id),
            None,
            None,
            Period::semester(semester, academic_year),
        )?;
        let (records, leaves) = self.load(&scope).await?;
        Ok(percentages(tally_by(&records, &leaves, |record| {
            record.subject_code.clone()
        })))
    }

    /// Per-student percentages for a class, same omission rule as
    /// [`Self::summary_by_subject`].
    pub async fn summary_by_student(
        &self,
        class_id: &str,
        period: Period,
    ) -> AttendanceResult<BTreeMap<String, f64>> {
        let scope = AggregationScope::new(None, Some(class_id), None, period)?;
        let (records, leaves) = self.load(&scope).await?;
        Ok(percentages(tally_by(&records, &leaves, |record| {
            record.student_id.clone()
        })))
    }

    /// Students of a class whose attendance is under `threshold`, lowest first.
    pub async fn below_threshold(
        &self,
        class_id: &str,
        period: Period,
        threshold: f64,
    ) -> AttendanceResult<Vec<StudentStanding>> {
        let summary = self.summary_by_student(class_id, period).await?;
        let mut flagged: Vec<StudentStanding> = summary
            .into_iter()
            .filter(|(_, percentage)| *percentage < threshold)
            .map(|(student_id, percentage)| StudentStanding {
                student_id,
                percentage,
            })
            .collect();
        flagged.sort_by(|a, b| {
            a.percentage
                .partial_cmp(&b.percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.student_id.cmp(&b.student_id))
        });
        Ok(flagged)
    }

    /// Mark a whole session in one atomic batch. Re-marking a student for
    /// the same subject and date replaces the earlier status.
    pub async fn bulk_mark(
        &self,
        sheet: &MarkSheet,
        status_by_student: &HashMap<String, AttendanceStatus>,
    ) -> AttendanceResult<usize> {
        if status_by_student.is_empty() {
            return Ok(0);
        }

        let mut records: Vec<AttendanceRecord> = status_by_student
            .iter()
            .map(|(student_id, status)| sheet.record_for(student_id, *status))
            .collect();
        records.sort_by(|a, b| a.student_id.cmp(&b.student_id));

        let written = self.records.upsert_batch(&records).await?;
        info!(
            subject = %sheet.subject_code,
            class = %sheet.class_id,
            date = %sheet.date,
            rows = written,
            "marked attendance"
        );
        Ok(written)
    }

    pub async fn exists(&self, student_id: &str, date: NaiveDate) -> AttendanceResult<bool> {
        self.records.exists(student_id, date).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttendanceError;
    use crate::models::Subject;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn row(student: &str, subject: &str, day: NaiveDate, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            student_id: student.to_string(),
            subject_code: subject.to_string(),
            class_id: "10A".to_string(),
            date: day,
            semester: (if day.month() >= 7 { "S1" } else { "S2" }).to_string(),
            academic_year: "2024-2025".to_string(),
            status,
        }
    }

    fn approved(student: &str, from: NaiveDate, to: NaiveDate) -> LeaveApplication {
        LeaveApplication {
            id: Uuid::new_v4(),
            student_id: student.to_string(),
            from_date: from,
            to_date: to,
            reason: "medical".to_string(),
            status: LeaveStatus::Approved,
        }
    }

    fn aggregator(store: &Arc<MemoryStore>) -> AttendanceAggregator {
        AttendanceAggregator::new(store.clone(), store.clone())
    }

    #[test]
    fn percentage_rule_edges() {
        assert_eq!(attendance_percentage(0, 0, 0), 0.0);
        assert_eq!(attendance_percentage(3, 0, 3), 100.0);
        assert_eq!(attendance_percentage(10, 6, 2), 75.0);
        assert_eq!(attendance_percentage(3, 1, 0), 100.0 / 3.0);
    }

    #[test]
    fn late_is_neither_present_nor_leave() {
        let mut tally = BucketTally::default();
        tally.add(AttendanceStatus::Present, false);
        tally.add(AttendanceStatus::Late, false);
        assert_eq!(tally.effective_total(), 2);
        assert_eq!(tally.percentage(), 50.0);
    }

    #[test]
    fn approved_leave_turns_absence_into_leave() {
        let calendar = LeaveCalendar::from_applications(&[LeaveApplication {
            id: Uuid::new_v4(),
            student_id: "s1".to_string(),
            from_date: date(3, 4),
            to_date: date(3, 5),
            reason: "surgery".to_string(),
            status: LeaveStatus::Approved,
        }]);
        let records = vec![
            row("s1", "MATH", date(3, 3), AttendanceStatus::Present),
            row("s1", "MATH", date(3, 4), AttendanceStatus::Absent),
            row("s1", "MATH", date(3, 5), AttendanceStatus::Absent),
        ];
        let counted = tally(&records, &calendar);
        assert_eq!(counted.on_leave, 2);
        assert_eq!(counted.percentage(), 100.0);
    }

    #[test]
    fn monthly_points_fill_gaps_in_order() {
        let records = vec![
            row("s1", "MATH", date(3, 3), AttendanceStatus::Present),
            row("s1", "MATH", date(1, 10), AttendanceStatus::Absent),
            row("s1", "MATH", date(1, 11), AttendanceStatus::Present),
        ];
        let points = monthly_points(&records, &LeaveCalendar::default());
        let labels: Vec<&str> = points.iter().map(|p| p.bucket.as_str()).collect();
        assert_eq!(labels, vec!["January", "February", "March"]);
        assert_eq!(points[0].percentage, 50.0);
        assert_eq!(points[1].percentage, 0.0);
        assert_eq!(points[2].percentage, 100.0);
    }

    #[tokio::test]
    async fn march_scenario_yields_seventy_five_percent() {
        let store = Arc::new(MemoryStore::new());
        let statuses = [
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Absent,
            AttendanceStatus::Absent,
            AttendanceStatus::OnLeave,
            AttendanceStatus::OnLeave,
        ];
        let rows: Vec<AttendanceRecord> = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| row("s1", "MATH", date(3, i as u32 + 1), *status))
            .collect();
        store.upsert_batch(&rows).await.unwrap();

        let pct = aggregator(&store)
            .calculate_percentage("s1", "MATH", "S2", "2024-2025")
            .await
            .unwrap();
        assert_eq!(pct, 75.0);
    }

    #[tokio::test]
    async fn summary_omits_subjects_without_records() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_batch(&[
                row("s1", "MATH", date(3, 3), AttendanceStatus::Absent),
                row("s2", "ART", date(3, 3), AttendanceStatus::Present),
            ])
            .await
            .unwrap();

        let summary = aggregator(&store)
            .summary_by_subject("s1", "S2", "2024-2025")
            .await
            .unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary.get("MATH"), Some(&0.0));
        assert!(!summary.contains_key("ART"));
    }

    #[tokio::test]
    async fn semester_trend_buckets_by_semester() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_batch(&[
                row("s1", "MATH", date(9, 3), AttendanceStatus::Present),
                row("s1", "MATH", date(9, 4), AttendanceStatus::Absent),
                row("s2", "MATH", date(2, 3), AttendanceStatus::Present),
            ])
            .await
            .unwrap();

        let trend = aggregator(&store).semester_trend("2024-2025").await.unwrap();
        assert_eq!(trend.get("S1"), Some(&50.0));
        assert_eq!(trend.get("S2"), Some(&100.0));
    }

    #[tokio::test]
    async fn below_threshold_sorts_lowest_first() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_batch(&[
                row("s1", "MATH", date(3, 3), AttendanceStatus::Absent),
                row("s2", "MATH", date(3, 3), AttendanceStatus::Present),
                row("s2", "MATH", date(3, 4), AttendanceStatus::Absent),
                row("s3", "MATH", date(3, 3), AttendanceStatus::Present),
            ])
            .await
            .unwrap();

        let flagged = aggregator(&store)
            .below_threshold("10A", Period::academic_year("2024-2025"), 75.0)
            .await
            .unwrap();
        let ids: Vec<&str> = flagged.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn bulk_mark_is_idempotent_per_student_subject_date() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(&store);
        let sheet = MarkSheet {
            subject_code: "MATH".to_string(),
            class_id: "10A".to_string(),
            date: date(3, 3),
            semester: "S2".to_string(),
            academic_year: "2024-2025".to_string(),
        };

        let mut first = HashMap::new();
        first.insert("s1".to_string(), AttendanceStatus::Absent);
        assert_eq!(agg.bulk_mark(&sheet, &first).await.unwrap(), 1);

        let mut second = HashMap::new();
        second.insert("s1".to_string(), AttendanceStatus::Present);
        agg.bulk_mark(&sheet, &second).await.unwrap();

        assert_eq!(store.record_count().unwrap(), 1);
        let scope = AggregationScope::of(
            Subject::Student("s1".to_string()),
            Period::default(),
        )
        .unwrap();
        assert_eq!(agg.percentage_for(&scope).await.unwrap(), 100.0);
        assert!(agg.exists("s1", date(3, 3)).await.unwrap());
        assert!(!agg.exists("s1", date(3, 4)).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_scope_is_rejected_before_scanning() {
        let store = Arc::new(MemoryStore::new());
        let err = aggregator(&store)
            .summary_by_student("10A", Period::between(date(3, 9), date(3, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::InvalidScope(_)));
    }

    #[tokio::test]
    async fn monthly_bucket_of_only_leave_reports_full_attendance() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_batch(&[
                row("s1", "MATH", date(1, 10), AttendanceStatus::OnLeave),
                row("s1", "MATH", date(1, 11), AttendanceStatus::Absent),
                row("s1", "MATH", date(2, 3), AttendanceStatus::Present),
                row("s1", "MATH", date(2, 4), AttendanceStatus::Absent),
            ])
            .await
            .unwrap();
        store
            .create_leave(&approved("s1", date(1, 11), date(1, 11)))
            .await
            .unwrap();

        let points = aggregator(&store).monthly_trend("2024-2025").await.unwrap();
        assert_eq!(
            points,
            vec![
                TrendPoint {
                    bucket: "January".to_string(),
                    percentage: 100.0,
                },
                TrendPoint {
                    bucket: "February".to_string(),
                    percentage: 50.0,
                },
            ]
        );
    }

    #[tokio::test]
    async fn semester_buckets_drop_approved_leave_from_denominator() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_batch(&[
                row("s1", "MATH", date(9, 3), AttendanceStatus::Present),
                row("s1", "MATH", date(9, 4), AttendanceStatus::Absent),
                row("s1", "MATH", date(9, 5), AttendanceStatus::Absent),
                row("s2", "MATH", date(2, 3), AttendanceStatus::OnLeave),
                row("s2", "MATH", date(2, 4), AttendanceStatus::Absent),
            ])
            .await
            .unwrap();
        store
            .create_leave(&approved("s1", date(9, 5), date(9, 5)))
            .await
            .unwrap();
        store
            .create_leave(&approved("s2", date(2, 4), date(2, 6)))
            .await
            .unwrap();

        let trend = aggregator(&store).semester_trend("2024-2025").await.unwrap();
        assert_eq!(trend.get("S1"), Some(&50.0));
        assert_eq!(trend.get("S2"), Some(&100.0));
    }

    #[tokio::test]
    async fn subject_summary_applies_leave_per_subject() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_batch(&[
                row("s1", "MATH", date(3, 3), AttendanceStatus::Present),
                row("s1", "MATH", date(3, 4), AttendanceStatus::Absent),
                row("s1", "MATH", date(3, 5), AttendanceStatus::OnLeave),
                row("s1", "ART", date(3, 3), AttendanceStatus::Present),
                row("s1", "ART", date(3, 4), AttendanceStatus::Absent),
                row("s1", "ART", date(3, 6), AttendanceStatus::Absent),
                row("s1", "PE", date(3, 5), AttendanceStatus::OnLeave),
            ])
            .await
            .unwrap();
        store
            .create_leave(&approved("s1", date(3, 4), date(3, 4)))
            .await
            .unwrap();

        let summary = aggregator(&store)
            .summary_by_subject("s1", "S2", "2024-2025")
            .await
            .unwrap();
        assert_eq!(summary.get("MATH"), Some(&100.0));
        assert_eq!(summary.get("ART"), Some(&50.0));
        assert_eq!(summary.get("PE"), Some(&100.0));
        assert_eq!(summary.len(), 3);
    }

    #[test]
    fn calendar_ignores_unapproved_applications() {
        let mut pending = approved("s1", date(3, 1), date(3, 31));
        pending.status = LeaveStatus::Pending;
        let calendar =
            LeaveCalendar::from_applications(&[pending, approved("s2", date(3, 2), date(3, 3))]);
        assert!(!calendar.covers("s1", date(3, 10)));
        assert!(calendar.covers("s2", date(3, 2)));
        assert!(calendar.covers("s2", date(3, 3)));
        assert!(!calendar.covers("s2", date(3, 4)));
        assert!(!calendar.covers("s1", date(3, 2)));
    }
}
