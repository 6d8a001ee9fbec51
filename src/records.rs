//! Read-side helpers shared by the report builders and the domain handlers:
//! student resolution, per-period record collectors, and normalization of the
//! two raw-result shapes that coexist in migrated data.

use crate::store::{Document, Filter, Order, Query, Store, StoreError};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssessmentType {
    Classwork,
    Homework,
    Ca1,
    Ca2,
    Exam,
}

impl AssessmentType {
    pub fn parse(raw: &str) -> Option<AssessmentType> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "classwork" => Some(AssessmentType::Classwork),
            "homework" => Some(AssessmentType::Homework),
            "ca1" => Some(AssessmentType::Ca1),
            "ca2" => Some(AssessmentType::Ca2),
            "exam" => Some(AssessmentType::Exam),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentType::Classwork => "classwork",
            AssessmentType::Homework => "homework",
            AssessmentType::Ca1 => "ca1",
            AssessmentType::Ca2 => "ca2",
            AssessmentType::Exam => "exam",
        }
    }

    pub fn default_max(&self) -> f64 {
        match self {
            AssessmentType::Classwork | AssessmentType::Homework => 10.0,
            AssessmentType::Ca1 | AssessmentType::Ca2 => 20.0,
            AssessmentType::Exam => 60.0,
        }
    }
}

/// One normalized score. Raw result documents expand to one entry (tagged
/// shape) or up to three (flat ca1/ca2/exam shape).
#[derive(Debug, Clone)]
pub struct ResultEntry {
    pub subject_id: String,
    pub assessment: AssessmentType,
    pub score: f64,
    pub max_score: f64,
    pub recorded_at_millis: Option<i64>,
}

pub fn normalize_result(doc: &Document) -> Vec<ResultEntry> {
    let Some(subject_id) = doc.str_field("subjectId").map(|s| s.to_string()) else {
        return Vec::new();
    };
    let recorded_at_millis = doc
        .str_field("recordedAt")
        .and_then(rfc3339_millis);

    if let Some(tag) = doc.str_field("assessmentType") {
        let Some(assessment) = AssessmentType::parse(tag) else {
            return Vec::new();
        };
        let score = doc.f64_field("score").unwrap_or(0.0);
        let max_score = doc
            .f64_field("maxScore")
            .unwrap_or_else(|| assessment.default_max());
        return vec![ResultEntry {
            subject_id,
            assessment,
            score,
            max_score,
            recorded_at_millis,
        }];
    }

    // Flat legacy shape: fixed maxima per column.
    let mut entries = Vec::new();
    for assessment in [AssessmentType::Ca1, AssessmentType::Ca2, AssessmentType::Exam] {
        if let Some(score) = doc.f64_field(assessment.as_str()) {
            entries.push(ResultEntry {
                subject_id: subject_id.clone(),
                assessment,
                score,
                max_score: assessment.default_max(),
                recorded_at_millis,
            });
        }
    }
    entries
}

pub fn normalize_results(docs: &[Document]) -> Vec<ResultEntry> {
    docs.iter().flat_map(normalize_result).collect()
}

/// Resolve a student by internal id first, then by admission number. A miss
/// on both is `None`, never an error; callers degrade to empty results.
pub fn resolve_student(store: &Store, student_ref: &str) -> Result<Option<Document>, StoreError> {
    if let Some(doc) = store.get("students", student_ref)? {
        return Ok(Some(doc));
    }
    let hits = store.query(
        &Query::collection("students")
            .filter(Filter::Eq("admissionNo", json!(student_ref)))
            .limit(1),
    )?;
    Ok(hits.into_iter().next())
}

pub fn student_display_name(doc: &Document) -> String {
    let last = doc.str_field("lastName").unwrap_or("");
    let first = doc.str_field("firstName").unwrap_or("");
    match (last.is_empty(), first.is_empty()) {
        (false, false) => format!("{}, {}", last, first),
        (false, true) => last.to_string(),
        (true, false) => first.to_string(),
        (true, true) => doc.id.clone(),
    }
}

pub fn results_for(
    store: &Store,
    student_id: &str,
    term: &str,
    session: &str,
) -> Result<Vec<Document>, StoreError> {
    store.query(
        &Query::collection("results")
            .filter(Filter::Eq("studentId", json!(student_id)))
            .filter(Filter::Eq("term", json!(term)))
            .filter(Filter::Eq("session", json!(session))),
    )
}

pub fn attendance_for(
    store: &Store,
    student_id: &str,
    term: &str,
    session: &str,
) -> Result<Vec<Document>, StoreError> {
    store.query(
        &Query::collection("attendance")
            .filter(Filter::Eq("studentId", json!(student_id)))
            .filter(Filter::Eq("term", json!(term)))
            .filter(Filter::Eq("session", json!(session)))
            .order_by("date", Order::Asc),
    )
}

pub fn merit_records_for(
    store: &Store,
    student_id: &str,
    term: &str,
    session: &str,
) -> Result<Vec<Document>, StoreError> {
    store.query(
        &Query::collection("meritRecords")
            .filter(Filter::Eq("studentId", json!(student_id)))
            .filter(Filter::Eq("term", json!(term)))
            .filter(Filter::Eq("session", json!(session)))
            .order_by("date", Order::Asc),
    )
}

pub fn active_students_in_class(store: &Store, class_id: &str) -> Result<Vec<Document>, StoreError> {
    store.query(
        &Query::collection("students")
            .filter(Filter::Eq("classId", json!(class_id)))
            .filter(Filter::Eq("active", json!(true))),
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AttendanceTally {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
}

impl AttendanceTally {
    /// present / total * 100, 0 when there are no records.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.present as f64 / self.total as f64) * 100.0
    }
}

pub fn tally_attendance(docs: &[Document]) -> AttendanceTally {
    let mut tally = AttendanceTally::default();
    for doc in docs {
        tally.total += 1;
        match doc.str_field("status") {
            Some("present") => tally.present += 1,
            Some("absent") => tally.absent += 1,
            Some("late") => tally.late += 1,
            Some("excused") => tally.excused += 1,
            _ => {}
        }
    }
    tally
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeritTally {
    pub merit: i64,
    pub demerit: i64,
}

impl MeritTally {
    pub fn net(&self) -> i64 {
        self.merit - self.demerit
    }
}

pub fn tally_merit(docs: &[Document]) -> MeritTally {
    let mut tally = MeritTally::default();
    for doc in docs {
        let points = doc.i64_field("points").unwrap_or(0);
        if points >= 0 {
            tally.merit += points;
        } else {
            tally.demerit += -points;
        }
    }
    tally
}

pub fn merit_points_total(docs: &[Document]) -> i64 {
    docs.iter()
        .map(|doc| doc.i64_field("points").unwrap_or(0))
        .sum()
}

pub fn merit_tier(total: i64) -> &'static str {
    if total >= 100 {
        "Platinum"
    } else if total >= 60 {
        "Gold"
    } else if total >= 30 {
        "Silver"
    } else if total >= 10 {
        "Bronze"
    } else {
        "None"
    }
}

/// Display name from the subjects collection, falling back to a humanized
/// form of the id. Lookup failures fall back too; this path never errors.
pub fn subject_display_name(store: &Store, subject_id: &str) -> String {
    match store.get("subjects", subject_id) {
        Ok(Some(doc)) => doc
            .str_field("name")
            .map(|s| s.to_string())
            .unwrap_or_else(|| humanize_subject_id(subject_id)),
        _ => humanize_subject_id(subject_id),
    }
}

pub fn humanize_subject_id(id: &str) -> String {
    id.split(|c: char| c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn today_date() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Epoch millis for a YYYY-MM-DD date at UTC midnight.
pub fn date_millis(date: &str) -> Option<i64> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
}

pub fn rfc3339_millis(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.timestamp_millis())
}
