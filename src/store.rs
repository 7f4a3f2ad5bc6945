use serde::Serialize;
use std::collections::HashMap;

use chrono::NaiveDate;

use crate::model::{
    AttendanceRecord, Course, Evaluation, EvaluationType, Grade, GradeScale, GradeValue, Student,
};

/// One failed snapshot fetch. The source keeps loading with an empty
/// collection; the error is reported back to the shell alongside the
/// counts of what did arrive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceError {
    pub source: &'static str,
    pub message: String,
}

/// Logical contract for the per-course fetches. The IPC layer implements
/// it over the JSON payload the shell pushes; tests implement it directly.
pub trait SnapshotSource {
    fn course(&self, course_id: i64) -> anyhow::Result<Course>;
    fn students(&self, course_id: i64) -> anyhow::Result<Vec<Student>>;
    fn evaluations(&self, course_id: i64) -> anyhow::Result<Vec<Evaluation>>;
    fn evaluation_types(&self, course_id: i64) -> anyhow::Result<Vec<EvaluationType>>;
    fn grades(&self, course_id: i64) -> anyhow::Result<Vec<Grade>>;
    fn attendance(&self, course_id: i64) -> anyhow::Result<Vec<AttendanceRecord>>;
    fn grade_scales(&self) -> anyhow::Result<Vec<GradeScale>>;
}

/// Everything the daemon knows about one loaded course. Recomputed
/// aggregates are derived on demand; nothing here is persisted.
#[derive(Debug, Clone)]
pub struct CourseSnapshot {
    pub course: Course,
    pub students: Vec<Student>,
    pub evaluations: Vec<Evaluation>,
    pub evaluation_types: Vec<EvaluationType>,
    pub grades: Vec<Grade>,
    pub attendance: Vec<AttendanceRecord>,
    pub grade_scales: Vec<GradeScale>,
}

/// Loads a course snapshot with per-source failure isolation: each fetch
/// runs regardless of the others; a failed fetch contributes an empty
/// collection and a recorded error. A failed course-metadata fetch falls
/// back to a placeholder so exports and lookups still have a name.
pub fn load_snapshot(
    source: &dyn SnapshotSource,
    course_id: i64,
) -> (CourseSnapshot, Vec<SourceError>) {
    let mut errors: Vec<SourceError> = Vec::new();

    fn fetch<T>(
        name: &'static str,
        errors: &mut Vec<SourceError>,
        result: anyhow::Result<Vec<T>>,
    ) -> Vec<T> {
        match result {
            Ok(items) => items,
            Err(e) => {
                errors.push(SourceError {
                    source: name,
                    message: e.to_string(),
                });
                Vec::new()
            }
        }
    }

    let course = match source.course(course_id) {
        Ok(c) => c,
        Err(e) => {
            errors.push(SourceError {
                source: "course",
                message: e.to_string(),
            });
            Course::fallback(course_id)
        }
    };
    let students = fetch("students", &mut errors, source.students(course_id));
    let evaluations = fetch("evaluations", &mut errors, source.evaluations(course_id));
    let evaluation_types = fetch(
        "evaluationTypes",
        &mut errors,
        source.evaluation_types(course_id),
    );
    let grades = fetch("grades", &mut errors, source.grades(course_id));
    let attendance = fetch("attendance", &mut errors, source.attendance(course_id));
    // Scales are optional reference data; a miss degrades categorical
    // mapping but is not worth alarming the shell about.
    let grade_scales = source.grade_scales().unwrap_or_default();

    (
        CourseSnapshot {
            course,
            students,
            evaluations,
            evaluation_types,
            grades,
            attendance,
            grade_scales,
        },
        errors,
    )
}

#[derive(Debug, Clone)]
pub struct StoreError {
    pub code: &'static str,
    pub message: String,
}

impl StoreError {
    fn bad_params(message: impl Into<String>) -> Self {
        StoreError {
            code: "bad_params",
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        StoreError {
            code: "not_found",
            message: message.into(),
        }
    }
}

/// In-memory registry of loaded course snapshots, keyed by course id.
#[derive(Debug, Default)]
pub struct CourseStore {
    snapshots: HashMap<i64, CourseSnapshot>,
}

impl CourseStore {
    pub fn new() -> Self {
        CourseStore::default()
    }

    pub fn insert(&mut self, snapshot: CourseSnapshot) {
        self.snapshots.insert(snapshot.course.id, snapshot);
    }

    pub fn remove(&mut self, course_id: i64) -> bool {
        self.snapshots.remove(&course_id).is_some()
    }

    pub fn get(&self, course_id: i64) -> Option<&CourseSnapshot> {
        self.snapshots.get(&course_id)
    }

    pub fn get_mut(&mut self, course_id: i64) -> Option<&mut CourseSnapshot> {
        self.snapshots.get_mut(&course_id)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn course_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.snapshots.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl CourseSnapshot {
    fn check_membership(&self, student_id: i64, evaluation_id: i64) -> Result<(), StoreError> {
        if !self.students.iter().any(|s| s.id == student_id) {
            return Err(StoreError::not_found(format!(
                "student {} is not in course {}",
                student_id, self.course.id
            )));
        }
        if !self.evaluations.iter().any(|e| e.id == evaluation_id) {
            return Err(StoreError::not_found(format!(
                "evaluation {} is not in course {}",
                evaluation_id, self.course.id
            )));
        }
        Ok(())
    }

    fn upsert_value(&mut self, student_id: i64, evaluation_id: i64, value: GradeValue) {
        match self
            .grades
            .iter_mut()
            .find(|g| g.student_id == student_id && g.evaluation_id == evaluation_id)
        {
            Some(existing) => existing.value = value,
            None => self.grades.push(Grade {
                student_id,
                evaluation_id,
                value,
            }),
        }
    }

    /// Upserts a numeric grade. Values outside 0-10 or non-finite are
    /// rejected before the snapshot is touched; they are never clamped.
    pub fn upsert_numeric_grade(
        &mut self,
        student_id: i64,
        evaluation_id: i64,
        value: f64,
    ) -> Result<(), StoreError> {
        if !value.is_finite() || !(0.0..=10.0).contains(&value) {
            return Err(StoreError::bad_params(format!(
                "grade must be between 0 and 10, got {}",
                value
            )));
        }
        self.check_membership(student_id, evaluation_id)?;
        self.upsert_value(student_id, evaluation_id, GradeValue::Numeric(value));
        Ok(())
    }

    /// Upserts a categorical grade. The label must belong to the
    /// evaluation's grade scale (case-insensitive); the stored label is
    /// the scale's canonical spelling.
    pub fn upsert_categorical_grade(
        &mut self,
        student_id: i64,
        evaluation_id: i64,
        label: &str,
    ) -> Result<(), StoreError> {
        self.check_membership(student_id, evaluation_id)?;
        let scale_id = self
            .evaluations
            .iter()
            .find(|e| e.id == evaluation_id)
            .and_then(|e| e.grade_scale_id)
            .ok_or_else(|| {
                StoreError::bad_params(format!(
                    "evaluation {} has no grade scale",
                    evaluation_id
                ))
            })?;
        let scale = self
            .grade_scales
            .iter()
            .find(|s| s.id == scale_id)
            .ok_or_else(|| StoreError::not_found(format!("grade scale {} not loaded", scale_id)))?;
        let canonical = scale
            .options
            .iter()
            .find(|o| o.label.eq_ignore_ascii_case(label))
            .map(|o| o.label.clone())
            .ok_or_else(|| {
                StoreError::bad_params(format!(
                    "label {:?} is not an option of scale {}",
                    label, scale.name
                ))
            })?;
        self.upsert_value(student_id, evaluation_id, GradeValue::Categorical(canonical));
        Ok(())
    }

    /// Records attendance for one student on one date, replacing any
    /// existing record for that (student, date, subject) triple.
    pub fn record_attendance(
        &mut self,
        student_id: i64,
        date: NaiveDate,
        present: bool,
        subject_id: Option<i64>,
    ) -> Result<(), StoreError> {
        if !self.students.iter().any(|s| s.id == student_id) {
            return Err(StoreError::not_found(format!(
                "student {} is not in course {}",
                student_id, self.course.id
            )));
        }
        match self.attendance.iter_mut().find(|r| {
            r.student_id == student_id && r.date == date && r.subject_id == subject_id
        }) {
            Some(existing) => existing.present = present,
            None => self.attendance.push(AttendanceRecord {
                id: None,
                course_id: self.course.id,
                student_id,
                date,
                present,
                subject_id,
            }),
        }
        Ok(())
    }

    /// Sets or clears an evaluation type's explicit weight. Rejected when
    /// the explicit weights would sum past 100.
    pub fn set_type_weight(
        &mut self,
        type_id: i64,
        weight: Option<f64>,
    ) -> Result<(), StoreError> {
        if !self.evaluation_types.iter().any(|t| t.id == type_id) {
            return Err(StoreError::not_found(format!(
                "evaluation type {} is not in course {}",
                type_id, self.course.id
            )));
        }
        if let Some(w) = weight {
            if !w.is_finite() || w < 0.0 {
                return Err(StoreError::bad_params(format!(
                    "weight must be a non-negative number, got {}",
                    w
                )));
            }
            let bound = crate::calc::max_weight(&self.evaluation_types, type_id);
            if w > bound {
                return Err(StoreError::bad_params(format!(
                    "weight {} exceeds the remaining {} (explicit weights may not sum past 100)",
                    w, bound
                )));
            }
        }
        if let Some(t) = self.evaluation_types.iter_mut().find(|t| t.id == type_id) {
            t.weight = weight;
        }
        Ok(())
    }
}
