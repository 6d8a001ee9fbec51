//! Report-card builders: CA, end-of-term and weekly. Each one resolves the
//! student, collects raw records for the period, reduces them in memory,
//! ranks the class, and persists exactly one denormalized snapshot under a
//! deterministic id. Nothing is written until the whole report is assembled.

use crate::grading::{grade_for_score, round_to_1dp};
use crate::records::{self, AssessmentType, ResultEntry};
use crate::store::{Document, Store, StoreError};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone)]
pub struct Period {
    pub term: String,
    pub session: String,
}

impl Period {
    pub fn new(term: impl Into<String>, session: impl Into<String>) -> Self {
        Period {
            term: term.into(),
            session: session.into(),
        }
    }
}

#[derive(Debug)]
pub enum ReportError {
    NotFound(String),
    NoData(String),
    BadParams(String),
    Store(StoreError),
}

impl ReportError {
    pub fn code(&self) -> &'static str {
        match self {
            ReportError::NotFound(_) => "not_found",
            ReportError::NoData(_) => "no_data",
            ReportError::BadParams(_) => "bad_params",
            ReportError::Store(e) => e.code(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            ReportError::NotFound(m) | ReportError::NoData(m) | ReportError::BadParams(m) => {
                m.clone()
            }
            ReportError::Store(e) => e.message().to_string(),
        }
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for ReportError {}

impl From<StoreError> for ReportError {
    fn from(e: StoreError) -> Self {
        ReportError::Store(e)
    }
}

/// Sessions are written `2024/2025`; ids must stay path-safe.
pub fn sanitize_id_component(raw: &str) -> String {
    raw.replace('/', "-")
}

pub fn ca_report_id(assessment: AssessmentType, student_id: &str, period: &Period) -> String {
    format!(
        "{}_{}_{}_{}",
        assessment.as_str(),
        sanitize_id_component(student_id),
        sanitize_id_component(&period.term),
        sanitize_id_component(&period.session)
    )
}

pub fn term_report_id(student_id: &str, period: &Period) -> String {
    format!(
        "term_{}_{}_{}",
        sanitize_id_component(student_id),
        sanitize_id_component(&period.term),
        sanitize_id_component(&period.session)
    )
}

pub fn weekly_report_id(student_id: &str, week_start: i64, week_end: i64) -> String {
    format!(
        "weekly_{}_{}_{}",
        sanitize_id_component(student_id),
        week_start,
        week_end
    )
}

/// Collection a snapshot id belongs to, keyed off its kind prefix.
pub fn report_collection_for_id(report_id: &str) -> Option<&'static str> {
    if report_id.starts_with("ca1_") || report_id.starts_with("ca2_") {
        Some("caReports")
    } else if report_id.starts_with("term_") {
        Some("termReports")
    } else if report_id.starts_with("weekly_") {
        Some("weeklyReports")
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceBlock {
    pub total_days: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    pub percentage: f64,
}

impl From<records::AttendanceTally> for AttendanceBlock {
    fn from(tally: records::AttendanceTally) -> Self {
        AttendanceBlock {
            total_days: tally.total,
            present: tally.present,
            absent: tally.absent,
            late: tally.late,
            excused: tally.excused,
            percentage: round_to_1dp(tally.percentage()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaSubjectLine {
    pub subject_id: String,
    pub subject_name: String,
    pub score: f64,
    pub max_score: f64,
    pub grade: String,
    pub remark: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaReportCard {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub term: String,
    pub session: String,
    pub assessment_type: String,
    pub subjects: Vec<CaSubjectLine>,
    pub total_score: f64,
    pub average_score: f64,
    pub grade: String,
    pub remark: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_size: Option<usize>,
    pub attendance: AttendanceBlock,
    pub merit_points: i64,
    pub generated_at: String,
    pub generated_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermSubjectLine {
    pub subject_id: String,
    pub subject_name: String,
    pub ca1: f64,
    pub ca2: f64,
    pub exam: f64,
    pub total: f64,
    pub grade: String,
    pub remark: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermReportCard {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub term: String,
    pub session: String,
    pub subjects: Vec<TermSubjectLine>,
    pub total_score: f64,
    pub average_score: f64,
    pub grade: String,
    pub remark: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_size: Option<usize>,
    pub attendance: AttendanceBlock,
    pub merit_points: i64,
    pub promoted: bool,
    pub generated_at: String,
    pub generated_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStatus {
    pub date: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyAttendance {
    pub total_days: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    pub percentage: f64,
    pub days: Vec<DayStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySubjectLine {
    pub subject_id: String,
    pub subject_name: String,
    pub classwork_scores: Vec<f64>,
    pub classwork_average: f64,
    pub homework_scores: Vec<f64>,
    pub homework_average: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyReportCard {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub term: String,
    pub session: String,
    pub week_start: i64,
    pub week_end: i64,
    pub attendance: WeeklyAttendance,
    pub subjects: Vec<WeeklySubjectLine>,
    pub classwork_average: f64,
    pub homework_average: f64,
    pub merit_points: i64,
    pub demerit_points: i64,
    pub net_merit_points: i64,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub generated_at: String,
    pub generated_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
struct StudentContext {
    id: String,
    name: String,
    admission_no: Option<String>,
    class_id: Option<String>,
    class_name: Option<String>,
}

fn student_context(store: &Store, student_ref: &str) -> Result<StudentContext, ReportError> {
    let Some(doc) = records::resolve_student(store, student_ref)? else {
        return Err(ReportError::NotFound(format!(
            "student not found: {}",
            student_ref
        )));
    };
    let class_id = doc.str_field("classId").map(String::from);
    let class_name = match class_id.as_deref() {
        Some(cid) => store
            .get("classes", cid)?
            .and_then(|c| c.str_field("name").map(String::from)),
        None => None,
    };
    Ok(StudentContext {
        name: records::student_display_name(&doc),
        admission_no: doc.str_field("admissionNo").map(String::from),
        id: doc.id,
        class_id,
        class_name,
    })
}

/// Maximum score per subject for one assessment type. Duplicate records keep
/// the best score; running the reduction twice changes nothing.
pub fn max_score_by_subject(
    entries: &[ResultEntry],
    assessment: AssessmentType,
) -> BTreeMap<String, f64> {
    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.assessment == assessment) {
        let slot = scores.entry(entry.subject_id.clone()).or_insert(entry.score);
        if entry.score > *slot {
            *slot = entry.score;
        }
    }
    scores
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TermCells {
    pub ca1: f64,
    pub ca2: f64,
    pub exam: f64,
}

impl TermCells {
    pub fn total(&self) -> f64 {
        self.ca1 + self.ca2 + self.exam
    }
}

/// Best ca1/ca2/exam score per subject. Classwork and homework entries are
/// not part of the term total.
pub fn term_cells_by_subject(entries: &[ResultEntry]) -> BTreeMap<String, TermCells> {
    let mut cells: BTreeMap<String, TermCells> = BTreeMap::new();
    for entry in entries {
        let cell = match entry.assessment {
            AssessmentType::Classwork | AssessmentType::Homework => continue,
            _ => cells.entry(entry.subject_id.clone()).or_default(),
        };
        match entry.assessment {
            AssessmentType::Ca1 => {
                if entry.score > cell.ca1 {
                    cell.ca1 = entry.score;
                }
            }
            AssessmentType::Ca2 => {
                if entry.score > cell.ca2 {
                    cell.ca2 = entry.score;
                }
            }
            AssessmentType::Exam => {
                if entry.score > cell.exam {
                    cell.exam = entry.score;
                }
            }
            AssessmentType::Classwork | AssessmentType::Homework => {}
        }
    }
    cells
}

fn ca_average(entries: &[ResultEntry], assessment: AssessmentType) -> f64 {
    let scores = max_score_by_subject(entries, assessment);
    if scores.is_empty() {
        return 0.0;
    }
    scores.values().sum::<f64>() / scores.len() as f64
}

fn term_average(entries: &[ResultEntry]) -> f64 {
    let cells = term_cells_by_subject(entries);
    if cells.is_empty() {
        return 0.0;
    }
    cells.values().map(TermCells::total).sum::<f64>() / cells.len() as f64
}

#[derive(Debug, Clone, Copy)]
struct Ranking {
    position: usize,
    class_size: usize,
}

/// Rank the target among active classmates by the given average. Ranking uses
/// unrounded averages; equal averages order by student id so repeated runs
/// agree.
fn rank_in_class<F>(
    store: &Store,
    class_id: &str,
    target_id: &str,
    period: &Period,
    average_of: F,
) -> Result<Option<Ranking>, ReportError>
where
    F: Fn(&[ResultEntry]) -> f64,
{
    let classmates = records::active_students_in_class(store, class_id)?;
    if classmates.is_empty() {
        return Ok(None);
    }
    let mut averages: Vec<(String, f64)> = Vec::with_capacity(classmates.len());
    for mate in &classmates {
        let docs = records::results_for(store, &mate.id, &period.term, &period.session)?;
        let entries = records::normalize_results(&docs);
        averages.push((mate.id.clone(), average_of(&entries)));
    }
    averages.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let class_size = averages.len();
    Ok(averages
        .iter()
        .position(|(id, _)| id == target_id)
        .map(|idx| Ranking {
            position: idx + 1,
            class_size,
        }))
}

fn persist<T: Serialize>(
    store: &Store,
    collection: &'static str,
    id: &str,
    report: &T,
) -> Result<(), ReportError> {
    let body = serde_json::to_value(report)
        .map_err(|e| ReportError::Store(StoreError::Serialize(e.to_string())))?;
    store.set(collection, id, &body)?;
    Ok(())
}

pub fn generate_ca_report(
    store: &Store,
    student_ref: &str,
    period: &Period,
    assessment: AssessmentType,
    generated_by: &str,
) -> Result<CaReportCard, ReportError> {
    if !matches!(assessment, AssessmentType::Ca1 | AssessmentType::Ca2) {
        return Err(ReportError::BadParams(
            "assessmentType must be ca1 or ca2".to_string(),
        ));
    }
    let student = student_context(store, student_ref)?;
    let result_docs = records::results_for(store, &student.id, &period.term, &period.session)?;
    if result_docs.is_empty() {
        return Err(ReportError::NoData(format!(
            "no results recorded for {} in {} {}",
            student.name, period.term, period.session
        )));
    }
    let entries = records::normalize_results(&result_docs);
    let scores = max_score_by_subject(&entries, assessment);
    if scores.is_empty() {
        return Err(ReportError::NoData(format!(
            "no {} scores recorded for {} in {} {}",
            assessment.as_str(),
            student.name,
            period.term,
            period.session
        )));
    }

    let max_score = assessment.default_max();
    let mut subjects = Vec::with_capacity(scores.len());
    let mut total_score = 0.0;
    for (subject_id, score) in &scores {
        let grade = grade_for_score(*score, max_score);
        subjects.push(CaSubjectLine {
            subject_id: subject_id.clone(),
            subject_name: records::subject_display_name(store, subject_id),
            score: *score,
            max_score,
            grade: grade.as_str().to_string(),
            remark: grade.remark().to_string(),
        });
        total_score += *score;
    }
    let average = total_score / subjects.len() as f64;
    let overall = grade_for_score(average, max_score);

    let ranking = match student.class_id.as_deref() {
        Some(class_id) => rank_in_class(store, class_id, &student.id, period, |entries| {
            ca_average(entries, assessment)
        })?,
        None => None,
    };

    let attendance_docs =
        records::attendance_for(store, &student.id, &period.term, &period.session)?;
    let merit_docs = records::merit_records_for(store, &student.id, &period.term, &period.session)?;

    let report = CaReportCard {
        id: ca_report_id(assessment, &student.id, period),
        student_id: student.id,
        student_name: student.name,
        admission_no: student.admission_no,
        class_id: student.class_id,
        class_name: student.class_name,
        term: period.term.clone(),
        session: period.session.clone(),
        assessment_type: assessment.as_str().to_string(),
        subjects,
        total_score,
        average_score: round_to_1dp(average),
        grade: overall.as_str().to_string(),
        remark: overall.remark().to_string(),
        position: ranking.map(|r| r.position),
        class_size: ranking.map(|r| r.class_size),
        attendance: AttendanceBlock::from(records::tally_attendance(&attendance_docs)),
        merit_points: records::merit_points_total(&merit_docs),
        generated_at: records::now_rfc3339(),
        generated_by: generated_by.to_string(),
    };

    persist(store, "caReports", &report.id, &report)?;
    Ok(report)
}

pub fn generate_term_report(
    store: &Store,
    student_ref: &str,
    period: &Period,
    generated_by: &str,
) -> Result<TermReportCard, ReportError> {
    let student = student_context(store, student_ref)?;
    let result_docs = records::results_for(store, &student.id, &period.term, &period.session)?;
    if result_docs.is_empty() {
        return Err(ReportError::NoData(format!(
            "no results recorded for {} in {} {}",
            student.name, period.term, period.session
        )));
    }
    let entries = records::normalize_results(&result_docs);
    let cells = term_cells_by_subject(&entries);
    if cells.is_empty() {
        return Err(ReportError::NoData(format!(
            "no ca or exam scores recorded for {} in {} {}",
            student.name, period.term, period.session
        )));
    }

    let mut subjects = Vec::with_capacity(cells.len());
    let mut total_score = 0.0;
    for (subject_id, cell) in &cells {
        let total = cell.total();
        let grade = grade_for_score(total, 100.0);
        subjects.push(TermSubjectLine {
            subject_id: subject_id.clone(),
            subject_name: records::subject_display_name(store, subject_id),
            ca1: cell.ca1,
            ca2: cell.ca2,
            exam: cell.exam,
            total,
            grade: grade.as_str().to_string(),
            remark: grade.remark().to_string(),
        });
        total_score += total;
    }
    let average = total_score / subjects.len() as f64;
    let overall = grade_for_score(average, 100.0);

    let ranking = match student.class_id.as_deref() {
        Some(class_id) => rank_in_class(store, class_id, &student.id, period, term_average)?,
        None => None,
    };

    let attendance_docs =
        records::attendance_for(store, &student.id, &period.term, &period.session)?;
    let merit_docs = records::merit_records_for(store, &student.id, &period.term, &period.session)?;

    let report = TermReportCard {
        id: term_report_id(&student.id, period),
        student_id: student.id,
        student_name: student.name,
        admission_no: student.admission_no,
        class_id: student.class_id,
        class_name: student.class_name,
        term: period.term.clone(),
        session: period.session.clone(),
        subjects,
        total_score,
        average_score: round_to_1dp(average),
        grade: overall.as_str().to_string(),
        remark: overall.remark().to_string(),
        position: ranking.map(|r| r.position),
        class_size: ranking.map(|r| r.class_size),
        attendance: AttendanceBlock::from(records::tally_attendance(&attendance_docs)),
        merit_points: records::merit_points_total(&merit_docs),
        promoted: average >= 40.0,
        generated_at: records::now_rfc3339(),
        generated_by: generated_by.to_string(),
    };

    persist(store, "termReports", &report.id, &report)?;
    Ok(report)
}

/// Threshold inputs for the weekly strengths/improvements classifier. `None`
/// means the signal had no records this week and stays silent.
#[derive(Debug, Clone, Copy)]
pub struct WeekSignals {
    pub attendance_percentage: Option<f64>,
    pub classwork_average: Option<f64>,
    pub homework_average: Option<f64>,
    pub net_merit: i64,
}

pub fn classify_week(signals: &WeekSignals) -> (Vec<String>, Vec<String>) {
    let mut strengths = Vec::new();
    let mut improvements = Vec::new();
    if let Some(pct) = signals.attendance_percentage {
        if pct >= 90.0 {
            strengths.push("Excellent attendance record".to_string());
        } else if pct < 70.0 {
            improvements.push("Attendance needs improvement".to_string());
        }
    }
    if let Some(avg) = signals.classwork_average {
        if avg >= 8.0 {
            strengths.push("Strong classwork performance".to_string());
        } else if avg < 5.0 {
            improvements.push("Classwork performance needs attention".to_string());
        }
    }
    if let Some(avg) = signals.homework_average {
        if avg >= 8.0 {
            strengths.push("Consistent homework completion".to_string());
        } else if avg < 5.0 {
            improvements.push("Homework completion needs attention".to_string());
        }
    }
    if signals.net_merit > 0 {
        strengths.push("Positive behaviour record".to_string());
    } else if signals.net_merit < 0 {
        improvements.push("Behaviour needs improvement".to_string());
    }
    (strengths, improvements)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn generate_weekly_report(
    store: &Store,
    student_ref: &str,
    period: &Period,
    week_start: i64,
    week_end: i64,
    generated_by: &str,
) -> Result<WeeklyReportCard, ReportError> {
    if week_end < week_start {
        return Err(ReportError::BadParams(
            "weekEnd must not precede weekStart".to_string(),
        ));
    }
    let student = student_context(store, student_ref)?;
    let in_week = |millis: i64| millis >= week_start && millis <= week_end;

    // An empty week is a valid report, not an error.
    let attendance_docs =
        records::attendance_for(store, &student.id, &period.term, &period.session)?;
    let week_attendance: Vec<&Document> = attendance_docs
        .iter()
        .filter(|doc| {
            doc.str_field("date")
                .and_then(records::date_millis)
                .map(in_week)
                .unwrap_or(false)
        })
        .collect();
    let mut tally = records::AttendanceTally::default();
    let mut days = Vec::with_capacity(week_attendance.len());
    for doc in &week_attendance {
        tally.total += 1;
        let status = doc.str_field("status").unwrap_or("");
        match status {
            "present" => tally.present += 1,
            "absent" => tally.absent += 1,
            "late" => tally.late += 1,
            "excused" => tally.excused += 1,
            _ => {}
        }
        days.push(DayStatus {
            date: doc.str_field("date").unwrap_or("").to_string(),
            status: status.to_string(),
        });
    }
    days.sort_by(|a, b| a.date.cmp(&b.date));

    let result_docs = records::results_for(store, &student.id, &period.term, &period.session)?;
    let entries = records::normalize_results(&result_docs);
    // Entries with no usable recordedAt cannot be placed in a week and are left out.
    let mut by_subject: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for entry in &entries {
        let Some(millis) = entry.recorded_at_millis else {
            continue;
        };
        if !in_week(millis) {
            continue;
        }
        match entry.assessment {
            AssessmentType::Classwork => by_subject
                .entry(entry.subject_id.clone())
                .or_default()
                .0
                .push(entry.score),
            AssessmentType::Homework => by_subject
                .entry(entry.subject_id.clone())
                .or_default()
                .1
                .push(entry.score),
            _ => {}
        }
    }

    let mut subjects = Vec::with_capacity(by_subject.len());
    let mut all_classwork: Vec<f64> = Vec::new();
    let mut all_homework: Vec<f64> = Vec::new();
    for (subject_id, (classwork, homework)) in &by_subject {
        all_classwork.extend_from_slice(classwork);
        all_homework.extend_from_slice(homework);
        subjects.push(WeeklySubjectLine {
            subject_id: subject_id.clone(),
            subject_name: records::subject_display_name(store, subject_id),
            classwork_average: round_to_1dp(mean(classwork)),
            classwork_scores: classwork.clone(),
            homework_average: round_to_1dp(mean(homework)),
            homework_scores: homework.clone(),
        });
    }
    let classwork_average = round_to_1dp(mean(&all_classwork));
    let homework_average = round_to_1dp(mean(&all_homework));

    let merit_docs = records::merit_records_for(store, &student.id, &period.term, &period.session)?;
    let week_merit: Vec<Document> = merit_docs
        .into_iter()
        .filter(|doc| {
            doc.str_field("date")
                .and_then(records::date_millis)
                .map(in_week)
                .unwrap_or(false)
        })
        .collect();
    let merit_tally = records::tally_merit(&week_merit);

    let (strengths, areas_for_improvement) = classify_week(&WeekSignals {
        attendance_percentage: if tally.total > 0 {
            Some(tally.percentage())
        } else {
            None
        },
        classwork_average: if all_classwork.is_empty() {
            None
        } else {
            Some(classwork_average)
        },
        homework_average: if all_homework.is_empty() {
            None
        } else {
            Some(homework_average)
        },
        net_merit: merit_tally.net(),
    });

    let report = WeeklyReportCard {
        id: weekly_report_id(&student.id, week_start, week_end),
        student_id: student.id,
        student_name: student.name,
        admission_no: student.admission_no,
        class_id: student.class_id,
        class_name: student.class_name,
        term: period.term.clone(),
        session: period.session.clone(),
        week_start,
        week_end,
        attendance: WeeklyAttendance {
            total_days: tally.total,
            present: tally.present,
            absent: tally.absent,
            late: tally.late,
            excused: tally.excused,
            percentage: round_to_1dp(tally.percentage()),
            days,
        },
        subjects,
        classwork_average,
        homework_average,
        merit_points: merit_tally.merit,
        demerit_points: merit_tally.demerit,
        net_merit_points: merit_tally.net(),
        strengths,
        areas_for_improvement,
        generated_at: records::now_rfc3339(),
        generated_by: generated_by.to_string(),
    };

    persist(store, "weeklyReports", &report.id, &report)?;
    Ok(report)
}

/// Run one generator over every active student of a class. Per-student
/// failures go into the error list; the batch never aborts early.
pub fn bulk_generate<F>(
    store: &Store,
    class_id: &str,
    mut generate_one: F,
) -> Result<BulkOutcome, ReportError>
where
    F: FnMut(&Store, &Document) -> Result<(), ReportError>,
{
    let students = records::active_students_in_class(store, class_id)?;
    let mut outcome = BulkOutcome {
        success: 0,
        failed: 0,
        errors: Vec::new(),
    };
    for student in &students {
        match generate_one(store, student) {
            Ok(()) => outcome.success += 1,
            Err(e) => {
                outcome.failed += 1;
                outcome.errors.push(format!(
                    "{}: {}",
                    records::student_display_name(student),
                    e.message()
                ));
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed_student(store: &Store, id: &str, first: &str, last: &str, class_id: &str) {
        store
            .create(
                "students",
                Some(id),
                &json!({
                    "firstName": first,
                    "lastName": last,
                    "admissionNo": format!("SD/2024/{}", id),
                    "classId": class_id,
                    "subjects": [],
                    "active": true
                }),
            )
            .expect("seed student");
    }

    fn seed_result(
        store: &Store,
        student_id: &str,
        subject: &str,
        assessment: &str,
        score: f64,
        max: f64,
    ) {
        store
            .create(
                "results",
                None,
                &json!({
                    "studentId": student_id,
                    "subjectId": subject,
                    "term": "First Term",
                    "session": "2024/2025",
                    "assessmentType": assessment,
                    "score": score,
                    "maxScore": max,
                    "recordedAt": "2024-10-02T09:00:00Z"
                }),
            )
            .expect("seed result");
    }

    fn period() -> Period {
        Period::new("First Term", "2024/2025")
    }

    #[test]
    fn report_ids_are_deterministic_and_path_safe() {
        let p = period();
        assert_eq!(
            ca_report_id(AssessmentType::Ca1, "s1", &p),
            "ca1_s1_First Term_2024-2025"
        );
        assert_eq!(term_report_id("s1", &p), "term_s1_First Term_2024-2025");
        assert_eq!(weekly_report_id("s1", 100, 200), "weekly_s1_100_200");
        assert_eq!(report_collection_for_id("ca2_s1_x_y"), Some("caReports"));
        assert_eq!(report_collection_for_id("term_s1_x_y"), Some("termReports"));
        assert_eq!(report_collection_for_id("weekly_s1_1_2"), Some("weeklyReports"));
        assert_eq!(report_collection_for_id("nonsense"), None);
    }

    #[test]
    fn max_reduction_keeps_best_score_and_is_idempotent() {
        let entries = vec![
            ResultEntry {
                subject_id: "math".into(),
                assessment: AssessmentType::Ca1,
                score: 12.0,
                max_score: 20.0,
                recorded_at_millis: None,
            },
            ResultEntry {
                subject_id: "math".into(),
                assessment: AssessmentType::Ca1,
                score: 17.0,
                max_score: 20.0,
                recorded_at_millis: None,
            },
            ResultEntry {
                subject_id: "math".into(),
                assessment: AssessmentType::Ca2,
                score: 19.0,
                max_score: 20.0,
                recorded_at_millis: None,
            },
        ];
        let first = max_score_by_subject(&entries, AssessmentType::Ca1);
        assert_eq!(first.get("math"), Some(&17.0));
        let second = max_score_by_subject(&entries, AssessmentType::Ca1);
        assert_eq!(first, second);
    }

    #[test]
    fn term_cells_take_max_per_column_and_skip_weekly_types() {
        let mk = |assessment, score| ResultEntry {
            subject_id: "math".into(),
            assessment,
            score,
            max_score: 20.0,
            recorded_at_millis: None,
        };
        let entries = vec![
            mk(AssessmentType::Ca1, 15.0),
            mk(AssessmentType::Ca1, 18.0),
            mk(AssessmentType::Ca2, 16.0),
            mk(AssessmentType::Exam, 50.0),
            mk(AssessmentType::Classwork, 9.0),
        ];
        let cells = term_cells_by_subject(&entries);
        let math = cells.get("math").expect("math cells");
        assert_eq!(math.ca1, 18.0);
        assert_eq!(math.ca2, 16.0);
        assert_eq!(math.exam, 50.0);
        assert_eq!(math.total(), 84.0);
    }

    #[test]
    fn ca_report_matches_grade_table_end_to_end() {
        let store = Store::open_in_memory().expect("open store");
        store
            .create("classes", Some("jss1a"), &json!({ "name": "JSS 1A" }))
            .expect("seed class");
        seed_student(&store, "s1", "Ada", "Obi", "jss1a");
        seed_result(&store, "s1", "mathematics", "ca1", 18.0, 20.0);
        seed_result(&store, "s1", "english", "ca1", 15.0, 20.0);

        let report = generate_ca_report(&store, "s1", &period(), AssessmentType::Ca1, "admin-1")
            .expect("generate");

        assert_eq!(report.total_score, 33.0);
        assert_eq!(report.average_score, 16.5);
        assert_eq!(report.grade, "A");
        assert_eq!(report.remark, "Excellent");
        assert_eq!(report.subjects.len(), 2);
        assert!(report.subjects.iter().all(|s| s.grade == "A"));
        assert_eq!(report.position, Some(1));
        assert_eq!(report.class_size, Some(1));
        assert_eq!(report.class_name.as_deref(), Some("JSS 1A"));

        let saved = store
            .get("caReports", &report.id)
            .expect("get")
            .expect("persisted");
        assert_eq!(saved.f64_field("totalScore"), Some(33.0));
        assert_eq!(saved.str_field("assessmentType"), Some("ca1"));
    }

    #[test]
    fn regenerating_overwrites_the_same_snapshot() {
        let store = Store::open_in_memory().expect("open store");
        seed_student(&store, "s1", "Ada", "Obi", "jss1a");
        seed_result(&store, "s1", "mathematics", "ca1", 12.0, 20.0);

        let first = generate_ca_report(&store, "s1", &period(), AssessmentType::Ca1, "admin-1")
            .expect("generate");
        seed_result(&store, "s1", "mathematics", "ca1", 18.0, 20.0);
        let second = generate_ca_report(&store, "s1", &period(), AssessmentType::Ca1, "admin-1")
            .expect("regenerate");

        assert_eq!(first.id, second.id);
        assert_eq!(second.total_score, 18.0);
        let all = store
            .query(&crate::store::Query::collection("caReports"))
            .expect("query");
        assert_eq!(all.len(), 1, "regeneration must not duplicate");
    }

    #[test]
    fn ca_report_fails_fast_on_missing_student_or_data() {
        let store = Store::open_in_memory().expect("open store");
        let missing = generate_ca_report(&store, "ghost", &period(), AssessmentType::Ca1, "a");
        assert!(matches!(missing, Err(ReportError::NotFound(_))));

        seed_student(&store, "s1", "Ada", "Obi", "jss1a");
        let no_data = generate_ca_report(&store, "s1", &period(), AssessmentType::Ca1, "a");
        assert!(matches!(no_data, Err(ReportError::NoData(_))));
        assert!(
            store
                .query(&crate::store::Query::collection("caReports"))
                .expect("query")
                .is_empty(),
            "failed generation must write nothing"
        );

        let bad = generate_ca_report(&store, "s1", &period(), AssessmentType::Exam, "a");
        assert!(matches!(bad, Err(ReportError::BadParams(_))));
    }

    #[test]
    fn ranking_is_a_permutation_with_id_tie_break() {
        let store = Store::open_in_memory().expect("open store");
        for (id, score) in [("s1", 10.0), ("s2", 18.0), ("s3", 10.0)] {
            seed_student(&store, id, "Kid", id, "jss1a");
            seed_result(&store, id, "mathematics", "ca1", score, 20.0);
        }

        // s2 leads; s1 and s3 tie and order by id.
        let r1 = generate_ca_report(&store, "s1", &period(), AssessmentType::Ca1, "a")
            .expect("generate");
        let r2 = generate_ca_report(&store, "s2", &period(), AssessmentType::Ca1, "a")
            .expect("generate");
        let r3 = generate_ca_report(&store, "s3", &period(), AssessmentType::Ca1, "a")
            .expect("generate");

        assert_eq!(r2.position, Some(1));
        assert_eq!(r1.position, Some(2));
        assert_eq!(r3.position, Some(3));
        let mut positions = vec![r1.position, r2.position, r3.position];
        positions.sort();
        assert_eq!(positions, vec![Some(1), Some(2), Some(3)]);
        assert!(positions.iter().all(|p| {
            let p = p.expect("position");
            (1..=3).contains(&p)
        }));
    }

    #[test]
    fn term_report_sums_to_one_hundred_and_sets_promotion() {
        let store = Store::open_in_memory().expect("open store");
        store
            .create("classes", Some("jss1a"), &json!({ "name": "JSS 1A" }))
            .expect("seed class");
        seed_student(&store, "s1", "Ada", "Obi", "jss1a");
        seed_result(&store, "s1", "mathematics", "ca1", 15.0, 20.0);
        seed_result(&store, "s1", "mathematics", "ca2", 16.0, 20.0);
        seed_result(&store, "s1", "mathematics", "exam", 50.0, 60.0);
        seed_result(&store, "s1", "english", "ca1", 5.0, 20.0);
        seed_result(&store, "s1", "english", "exam", 20.0, 60.0);

        let report =
            generate_term_report(&store, "s1", &period(), "admin-1").expect("generate");

        assert_eq!(report.subjects.len(), 2);
        let math = report
            .subjects
            .iter()
            .find(|s| s.subject_id == "mathematics")
            .expect("math line");
        assert_eq!(math.total, 81.0);
        assert_eq!(math.grade, "A");
        let english = report
            .subjects
            .iter()
            .find(|s| s.subject_id == "english")
            .expect("english line");
        assert_eq!(english.ca2, 0.0, "missing type contributes zero");
        assert_eq!(english.total, 25.0);
        assert_eq!(english.grade, "F");

        assert_eq!(report.total_score, 106.0);
        assert_eq!(report.average_score, 53.0);
        assert_eq!(report.grade, "C");
        assert!(report.promoted);

        let saved = store
            .get("termReports", &report.id)
            .expect("get")
            .expect("persisted");
        assert_eq!(saved.bool_field("promoted"), Some(true));
    }

    #[test]
    fn term_report_below_forty_is_not_promoted() {
        let store = Store::open_in_memory().expect("open store");
        seed_student(&store, "s1", "Ada", "Obi", "jss1a");
        seed_result(&store, "s1", "mathematics", "ca1", 10.0, 20.0);
        seed_result(&store, "s1", "mathematics", "exam", 25.0, 60.0);

        let report = generate_term_report(&store, "s1", &period(), "admin-1").expect("generate");
        assert_eq!(report.average_score, 35.0);
        assert!(!report.promoted);
        assert_eq!(report.grade, "F");
    }

    #[test]
    fn weekly_report_with_no_records_is_all_zeroes() {
        let store = Store::open_in_memory().expect("open store");
        seed_student(&store, "s1", "Ada", "Obi", "jss1a");

        let report = generate_weekly_report(&store, "s1", &period(), 0, 604_800_000, "admin-1")
            .expect("generate");

        assert_eq!(report.attendance.total_days, 0);
        assert_eq!(report.attendance.percentage, 0.0);
        assert!(report.attendance.days.is_empty());
        assert!(report.subjects.is_empty());
        assert_eq!(report.classwork_average, 0.0);
        assert_eq!(report.net_merit_points, 0);
        assert!(report.strengths.is_empty());
        assert!(report.areas_for_improvement.is_empty());
        assert!(store
            .get("weeklyReports", &report.id)
            .expect("get")
            .is_some());
    }

    #[test]
    fn weekly_report_filters_to_the_week_and_classifies() {
        let store = Store::open_in_memory().expect("open store");
        seed_student(&store, "s1", "Ada", "Obi", "jss1a");
        // Week of 2024-10-07 .. 2024-10-11.
        let week_start = records::date_millis("2024-10-07").expect("start");
        let week_end = records::date_millis("2024-10-11").expect("end");

        for (date, status) in [
            ("2024-10-07", "present"),
            ("2024-10-08", "present"),
            ("2024-10-09", "present"),
            ("2024-10-10", "present"),
            ("2024-10-11", "late"),
            ("2024-10-14", "absent"), // outside the week
        ] {
            store
                .create(
                    "attendance",
                    None,
                    &json!({
                        "studentId": "s1",
                        "date": date,
                        "status": status,
                        "term": "First Term",
                        "session": "2024/2025"
                    }),
                )
                .expect("seed attendance");
        }

        for (recorded_at, assessment, score) in [
            ("2024-10-08T10:00:00Z", "classwork", 9.0),
            ("2024-10-10T10:00:00Z", "classwork", 8.0),
            ("2024-10-09T10:00:00Z", "homework", 4.0),
            ("2024-10-21T10:00:00Z", "classwork", 2.0), // outside the week
        ] {
            store
                .create(
                    "results",
                    None,
                    &json!({
                        "studentId": "s1",
                        "subjectId": "mathematics",
                        "term": "First Term",
                        "session": "2024/2025",
                        "assessmentType": assessment,
                        "score": score,
                        "maxScore": 10.0,
                        "recordedAt": recorded_at
                    }),
                )
                .expect("seed result");
        }

        store
            .create(
                "meritRecords",
                None,
                &json!({
                    "studentId": "s1",
                    "date": "2024-10-08",
                    "points": -5,
                    "term": "First Term",
                    "session": "2024/2025"
                }),
            )
            .expect("seed merit");

        let report =
            generate_weekly_report(&store, "s1", &period(), week_start, week_end, "admin-1")
                .expect("generate");

        assert_eq!(report.attendance.total_days, 5);
        assert_eq!(report.attendance.present, 4);
        assert_eq!(report.attendance.late, 1);
        assert_eq!(report.attendance.percentage, 80.0);
        assert_eq!(report.attendance.days.len(), 5);
        assert_eq!(report.attendance.days[0].date, "2024-10-07");

        assert_eq!(report.subjects.len(), 1);
        let math = &report.subjects[0];
        assert_eq!(math.classwork_scores, vec![9.0, 8.0]);
        assert_eq!(math.classwork_average, 8.5);
        assert_eq!(math.homework_scores, vec![4.0]);
        assert_eq!(report.classwork_average, 8.5);
        assert_eq!(report.homework_average, 4.0);

        assert_eq!(report.merit_points, 0);
        assert_eq!(report.demerit_points, 5);
        assert_eq!(report.net_merit_points, -5);

        assert!(report
            .strengths
            .contains(&"Strong classwork performance".to_string()));
        assert!(report
            .areas_for_improvement
            .contains(&"Homework completion needs attention".to_string()));
        assert!(report
            .areas_for_improvement
            .contains(&"Behaviour needs improvement".to_string()));
        // 80% sits between both attendance thresholds.
        assert!(!report
            .strengths
            .contains(&"Excellent attendance record".to_string()));
        assert!(!report
            .areas_for_improvement
            .contains(&"Attendance needs improvement".to_string()));
    }

    #[test]
    fn weekly_report_rejects_inverted_bounds() {
        let store = Store::open_in_memory().expect("open store");
        seed_student(&store, "s1", "Ada", "Obi", "jss1a");
        let result = generate_weekly_report(&store, "s1", &period(), 200, 100, "a");
        assert!(matches!(result, Err(ReportError::BadParams(_))));
    }

    #[test]
    fn bulk_generation_isolates_failures() {
        let store = Store::open_in_memory().expect("open store");
        for i in 0..5 {
            let id = format!("s{}", i);
            seed_student(&store, &id, "Kid", &id, "jss1a");
            if i != 1 && i != 3 {
                seed_result(&store, &id, "mathematics", "ca1", 10.0 + i as f64, 20.0);
            }
        }

        let p = period();
        let outcome = bulk_generate(&store, "jss1a", |store, student| {
            generate_term_report(store, &student.id, &p, "admin-1").map(|_| ())
        })
        .expect("bulk");

        assert_eq!(outcome.success, 3);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors.iter().all(|e| e.contains("no results")));
    }

    #[test]
    fn bulk_generation_over_empty_class_is_a_zero_outcome() {
        let store = Store::open_in_memory().expect("open store");
        let outcome = bulk_generate(&store, "empty", |_, _| Ok(())).expect("bulk");
        assert_eq!(outcome.success, 0);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn classifier_stays_silent_without_signals() {
        let (strengths, improvements) = classify_week(&WeekSignals {
            attendance_percentage: None,
            classwork_average: None,
            homework_average: None,
            net_merit: 0,
        });
        assert!(strengths.is_empty());
        assert!(improvements.is_empty());
    }
}
