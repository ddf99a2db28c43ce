use serde::Serialize;

pub const PASS_PERCENTAGE: f64 = 33.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectMark {
    pub subject: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkLine {
    pub subject: String,
    pub score: f64,
    pub grade: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSheet {
    pub marks: Vec<MarkLine>,
    pub total: f64,
    pub percentage: f64,
    pub status: &'static str,
    pub performance: &'static str,
}

/// Letter grade for a single subject score out of 100.
pub fn grade_for(score: f64) -> &'static str {
    if score >= 90.0 {
        "A+"
    } else if score >= 80.0 {
        "A"
    } else if score >= 70.0 {
        "B+"
    } else if score >= 60.0 {
        "B"
    } else if score >= 50.0 {
        "C"
    } else if score >= 40.0 {
        "D"
    } else {
        "F"
    }
}

pub fn performance_category(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "Excellent"
    } else if percentage >= 75.0 {
        "Good"
    } else if percentage >= 60.0 {
        "Average"
    } else {
        "Poor"
    }
}

fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Builds the computed part of a result sheet. Each subject is out of 100;
/// the overall percentage is total over `marks.len() * 100`, rounded to two
/// decimals, with PASS at 33% or above. No marks on file means 0% and FAIL.
pub fn build_result_sheet(marks: &[SubjectMark]) -> ResultSheet {
    let total: f64 = marks.iter().map(|m| m.score).sum();
    let percentage = if marks.is_empty() {
        0.0
    } else {
        round_2(total / (marks.len() as f64 * 100.0) * 100.0)
    };

    ResultSheet {
        marks: marks
            .iter()
            .map(|m| MarkLine {
                subject: m.subject.clone(),
                score: m.score,
                grade: grade_for(m.score),
            })
            .collect(),
        total,
        percentage,
        status: if percentage >= PASS_PERCENTAGE {
            "PASS"
        } else {
            "FAIL"
        },
        performance: performance_category(percentage),
    }
}
