use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub approval_grade: Option<f64>,
    #[serde(default)]
    pub qualification_grade: Option<f64>,
}

impl Course {
    /// Placeholder used when the course metadata fetch failed. Keeps the
    /// export filename fallback the shell already shows (`Curso_<id>`).
    pub fn fallback(id: i64) -> Self {
        Course {
            id,
            name: format!("Curso_{}", id),
            approval_grade: None,
            qualification_grade: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub course_id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl Student {
    pub fn display_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) if !last.trim().is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

/// The backend keeps the Spanish field name `nombre` on evaluations and
/// evaluation types; the wire format follows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: i64,
    pub course_id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub evaluation_type_id: Option<i64>,
    #[serde(default)]
    pub grade_scale_id: Option<i64>,
    #[serde(default)]
    pub subject_id: Option<i64>,
    #[serde(default)]
    pub approval_grade: Option<f64>,
    #[serde(default)]
    pub qualification_grade: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationType {
    pub id: i64,
    pub course_id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    /// Percentage weight for the final average (0-100); `None` means the
    /// remainder is shared equally with the other unset types.
    #[serde(default)]
    pub weight: Option<f64>,
}

/// A stored grade is either numeric (0-10) or a categorical label from a
/// grade scale. The REST wire carries two nullable fields; `GradeWire`
/// folds them into this variant at ingest so the ambiguous both-set /
/// both-unset states cannot survive past the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeValue {
    Numeric(f64),
    Categorical(String),
}

impl GradeValue {
    pub fn display(&self) -> String {
        match self {
            GradeValue::Numeric(v) => {
                if v.fract() == 0.0 {
                    format!("{}", *v as i64)
                } else {
                    format!("{}", v)
                }
            }
            GradeValue::Categorical(label) => label.clone(),
        }
    }
}

/// Snapshots key grades by (student, evaluation); backend ids are not
/// carried in memory.
#[derive(Debug, Clone)]
pub struct Grade {
    pub student_id: i64,
    pub evaluation_id: i64,
    pub value: GradeValue,
}

/// Wire shape of a grade as the backend serves it: `grade` and
/// `gradeValue` are both nullable and mutually exclusive by convention.
/// The backend's record id and course id are ignored on ingest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeWire {
    pub student_id: i64,
    pub evaluation_id: i64,
    #[serde(default)]
    pub grade: Option<f64>,
    #[serde(default)]
    pub grade_value: Option<String>,
}

impl GradeWire {
    /// Resolves the nullable pair into a tagged value. Numeric wins when
    /// both are set (the backend reads them in that order); both-unset
    /// records carry no information and are dropped.
    pub fn into_grade(self) -> Option<Grade> {
        let value = match (self.grade, self.grade_value) {
            (Some(v), _) => GradeValue::Numeric(v),
            (None, Some(label)) => GradeValue::Categorical(label),
            (None, None) => return None,
        };
        Some(Grade {
            student_id: self.student_id,
            evaluation_id: self.evaluation_id,
            value,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub course_id: i64,
    pub student_id: i64,
    pub date: NaiveDate,
    pub present: bool,
    #[serde(default)]
    pub subject_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeScaleOption {
    pub label: String,
    #[serde(default)]
    pub numeric_value: Option<f64>,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeScale {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub options: Vec<GradeScaleOption>,
}
