//! Pure grading rules. No storage access here so the scale can be unit tested
//! on its own and reused by every report builder.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::F => "F",
        }
    }

    pub fn remark(&self) -> &'static str {
        match self {
            Grade::A => "Excellent",
            Grade::B => "Very Good",
            Grade::C => "Good",
            Grade::D => "Fair",
            Grade::E => "Pass",
            Grade::F => "Fail",
        }
    }
}

/// Score as a percentage of the maximum. A non-positive maximum yields 0
/// rather than a division blowup.
pub fn percent(score: f64, max_score: f64) -> f64 {
    if max_score <= 0.0 {
        return 0.0;
    }
    (score / max_score) * 100.0
}

pub fn letter_grade(percent: f64) -> Grade {
    if percent >= 70.0 {
        Grade::A
    } else if percent >= 60.0 {
        Grade::B
    } else if percent >= 50.0 {
        Grade::C
    } else if percent >= 45.0 {
        Grade::D
    } else if percent >= 40.0 {
        Grade::E
    } else {
        Grade::F
    }
}

pub fn grade_for_score(score: f64, max_score: f64) -> Grade {
    letter_grade(percent(score, max_score))
}

pub fn round_to_1dp(value: f64) -> f64 {
    ((10.0 * value) + 0.5).floor() / 10.0
}
