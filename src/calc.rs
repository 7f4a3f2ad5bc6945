use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;

use crate::model::{
    AttendanceRecord, Course, Evaluation, EvaluationType, Grade, GradeScale, GradeValue, Student,
};

/// Course-wide fallback when neither the evaluation nor the course defines
/// an approval threshold.
pub const DEFAULT_APPROVAL_GRADE: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeStatus {
    Failed,
    Passed,
    Promoted,
}

impl GradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeStatus::Failed => "failed",
            GradeStatus::Passed => "passed",
            GradeStatus::Promoted => "promoted",
        }
    }
}

/// Classifies a numeric grade against the approval threshold and, when the
/// course grades with promotion, the qualification threshold.
///
/// Without a qualification threshold the outcome is binary. With one:
/// below qualification the student failed, between the two they passed but
/// sit the final exam, at or above approval they are promoted. NaN is
/// failed by policy.
pub fn classify(grade: f64, approval: f64, qualification: Option<f64>) -> GradeStatus {
    if grade.is_nan() {
        return GradeStatus::Failed;
    }
    let Some(qualification) = qualification else {
        return if grade >= approval {
            GradeStatus::Passed
        } else {
            GradeStatus::Failed
        };
    };
    if grade < qualification {
        GradeStatus::Failed
    } else if grade < approval {
        GradeStatus::Passed
    } else {
        GradeStatus::Promoted
    }
}

/// Threshold cascade: evaluation-level override, then the course default,
/// then the fixed fallback for approval.
pub fn thresholds(evaluation: &Evaluation, course: &Course) -> (f64, Option<f64>) {
    let approval = evaluation
        .approval_grade
        .or(course.approval_grade)
        .unwrap_or(DEFAULT_APPROVAL_GRADE);
    let qualification = evaluation.qualification_grade.or(course.qualification_grade);
    (approval, qualification)
}

/// Display-only auto weight for a type without an explicit weight: the
/// remainder after the explicit weights, shared equally among the unset
/// types, rounded and floored at 0. Recomputed per call, never stored.
/// `None` when the type has an explicit weight or is unknown.
pub fn auto_weight(types: &[EvaluationType], type_id: i64) -> Option<u32> {
    let current = types.iter().find(|t| t.id == type_id)?;
    if current.weight.is_some() {
        return None;
    }
    let explicit_sum: f64 = types
        .iter()
        .filter(|t| t.id != type_id)
        .filter_map(|t| t.weight)
        .sum();
    let other_unset = types
        .iter()
        .filter(|t| t.id != type_id && t.weight.is_none())
        .count();
    let auto = (100.0 - explicit_sum) / (other_unset as f64 + 1.0);
    Some(auto.round().max(0.0) as u32)
}

/// Largest explicit weight a type may take without the course exceeding
/// 100 in total.
pub fn max_weight(types: &[EvaluationType], type_id: i64) -> f64 {
    let sum_other: f64 = types
        .iter()
        .filter(|t| t.id != type_id)
        .filter_map(|t| t.weight)
        .sum();
    (100.0 - sum_other).max(0.0)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveWeight {
    pub evaluation_type_id: i64,
    pub weight: f64,
    pub auto: bool,
}

/// Per-type weights as the weight editor shows them: explicit weights
/// verbatim, unset types with their auto share.
pub fn effective_weights(types: &[EvaluationType]) -> Vec<EffectiveWeight> {
    types
        .iter()
        .map(|t| match t.weight {
            Some(w) => EffectiveWeight {
                evaluation_type_id: t.id,
                weight: w,
                auto: false,
            },
            None => EffectiveWeight {
                evaluation_type_id: t.id,
                weight: auto_weight(types, t.id).unwrap_or(0) as f64,
                auto: true,
            },
        })
        .collect()
}

/// Numeric value of a grade: numeric grades verbatim, categorical grades
/// through their evaluation's grade-scale option (case-insensitive label
/// match). Unmapped categoricals have no numeric value.
pub fn numeric_grade_value(
    grade: &Grade,
    evaluation: Option<&Evaluation>,
    scales: &[GradeScale],
) -> Option<f64> {
    match &grade.value {
        GradeValue::Numeric(v) => Some(*v),
        GradeValue::Categorical(label) => {
            let scale_id = evaluation?.grade_scale_id?;
            let scale = scales.iter().find(|s| s.id == scale_id)?;
            scale
                .options
                .iter()
                .find(|o| o.label.eq_ignore_ascii_case(label))
                .and_then(|o| o.numeric_value)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedAverage {
    pub evaluation_type_id: i64,
    pub evaluation_type_name: String,
    pub average: f64,
    pub evaluations_count: usize,
    pub evaluation_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGroupedAverages {
    pub student_id: i64,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub grouped_averages: Vec<GroupedAverage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_average: Option<f64>,
}

/// Per-student grouped averages: for each evaluation type with at least
/// one graded evaluation, the unweighted mean of the student's numeric
/// grades of that type, then a weighted final average where types without
/// an explicit weight share 100 equally among the types present for that
/// student (weights renormalize over present types).
///
/// A student with no numeric grades gets no final average. Untyped
/// evaluations belong to no group. Groups are ordered by type id.
pub fn grouped_averages(
    students: &[Student],
    evaluations: &[Evaluation],
    types: &[EvaluationType],
    grades: &[Grade],
    scales: &[GradeScale],
    subject_id: Option<i64>,
) -> Vec<StudentGroupedAverages> {
    let evaluations: Vec<&Evaluation> = evaluations
        .iter()
        .filter(|e| subject_id.is_none() || e.subject_id == subject_id)
        .collect();
    let eval_ids: HashSet<i64> = evaluations.iter().map(|e| e.id).collect();
    let type_by_id: HashMap<i64, &EvaluationType> = types.iter().map(|t| (t.id, t)).collect();

    students
        .iter()
        .map(|student| {
            let grade_by_eval: HashMap<i64, &Grade> = grades
                .iter()
                .filter(|g| g.student_id == student.id && eval_ids.contains(&g.evaluation_id))
                .map(|g| (g.evaluation_id, g))
                .collect();

            // Numeric values grouped by type. BTreeMap keeps group order
            // stable across recomputes.
            let mut by_type: BTreeMap<i64, (Vec<f64>, Vec<i64>)> = BTreeMap::new();
            for e in &evaluations {
                let Some(type_id) = e.evaluation_type_id else {
                    continue;
                };
                let Some(grade) = grade_by_eval.get(&e.id) else {
                    continue;
                };
                let Some(value) = numeric_grade_value(grade, Some(e), scales) else {
                    continue;
                };
                let entry = by_type.entry(type_id).or_default();
                entry.0.push(value);
                entry.1.push(e.id);
            }

            let mut grouped: Vec<GroupedAverage> = Vec::new();
            for (type_id, (values, evaluation_ids)) in &by_type {
                let Some(ty) = type_by_id.get(type_id) else {
                    continue;
                };
                grouped.push(GroupedAverage {
                    evaluation_type_id: *type_id,
                    evaluation_type_name: ty.name.clone(),
                    average: values.iter().sum::<f64>() / values.len() as f64,
                    evaluations_count: evaluation_ids.len(),
                    evaluation_ids: evaluation_ids.clone(),
                });
            }

            let final_average = if grouped.is_empty() {
                None
            } else {
                let equal_share = 100.0 / grouped.len() as f64;
                let mut weighted_sum = 0.0;
                let mut total_weight = 0.0;
                for g in &grouped {
                    let weight = type_by_id
                        .get(&g.evaluation_type_id)
                        .and_then(|t| t.weight)
                        .unwrap_or(equal_share);
                    weighted_sum += g.average * weight;
                    total_weight += weight;
                }
                if total_weight > 0.0 {
                    Some(weighted_sum / total_weight)
                } else {
                    // All present types explicitly weighted 0: fall back to
                    // the plain mean of the group averages.
                    let sum: f64 = grouped.iter().map(|g| g.average).sum();
                    Some(sum / grouped.len() as f64)
                }
            };

            StudentGroupedAverages {
                student_id: student.id,
                first_name: student.first_name.clone(),
                last_name: student.last_name.clone(),
                grouped_averages: grouped,
                final_average,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendance {
    pub student_id: i64,
    pub present_count: usize,
    /// `None` when no dates are in scope: without a taken date the
    /// percentage is undefined, not zero.
    pub percentage: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatePresentCount {
    pub date: NaiveDate,
    pub present_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub dates: Vec<NaiveDate>,
    pub students: Vec<StudentAttendance>,
    pub present_by_date: Vec<DatePresentCount>,
}

/// Attendance percentages over the distinct dates that have at least one
/// in-scope record. A student with no record on a counted date is absent
/// by omission on that date.
pub fn attendance_summary(
    students: &[Student],
    records: &[AttendanceRecord],
    subject_id: Option<i64>,
) -> AttendanceSummary {
    let records: Vec<&AttendanceRecord> = records
        .iter()
        .filter(|r| subject_id.is_none() || r.subject_id == subject_id)
        .collect();

    let mut dates: Vec<NaiveDate> = records.iter().map(|r| r.date).collect();
    dates.sort();
    dates.dedup();

    let mut present: HashMap<(NaiveDate, i64), bool> = HashMap::new();
    for r in &records {
        present.insert((r.date, r.student_id), r.present);
    }

    let per_student: Vec<StudentAttendance> = students
        .iter()
        .map(|s| {
            let present_count = dates
                .iter()
                .filter(|d| present.get(&(**d, s.id)).copied().unwrap_or(false))
                .count();
            let percentage = if dates.is_empty() {
                None
            } else {
                Some((100.0 * present_count as f64 / dates.len() as f64).round() as u32)
            };
            StudentAttendance {
                student_id: s.id,
                present_count,
                percentage,
            }
        })
        .collect();

    let present_by_date: Vec<DatePresentCount> = dates
        .iter()
        .map(|d| DatePresentCount {
            date: *d,
            present_count: students
                .iter()
                .filter(|s| present.get(&(*d, s.id)).copied().unwrap_or(false))
                .count(),
        })
        .collect();

    AttendanceSummary {
        dates,
        students: per_student,
        present_by_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GradeScaleOption;

    fn student(id: i64) -> Student {
        Student {
            id,
            course_id: 1,
            first_name: format!("Alumno{}", id),
            last_name: None,
        }
    }

    fn evaluation(id: i64, type_id: Option<i64>) -> Evaluation {
        Evaluation {
            id,
            course_id: 1,
            name: format!("Eval {}", id),
            date: None,
            evaluation_type_id: type_id,
            grade_scale_id: None,
            subject_id: None,
            approval_grade: None,
            qualification_grade: None,
        }
    }

    fn eval_type(id: i64, name: &str, weight: Option<f64>) -> EvaluationType {
        EvaluationType {
            id,
            course_id: 1,
            name: name.to_string(),
            weight,
        }
    }

    fn numeric_grade(student_id: i64, evaluation_id: i64, value: f64) -> Grade {
        Grade {
            student_id,
            evaluation_id,
            value: GradeValue::Numeric(value),
        }
    }

    fn record(student_id: i64, date: &str, present: bool) -> AttendanceRecord {
        AttendanceRecord {
            id: None,
            course_id: 1,
            student_id,
            date: date.parse().expect("date"),
            present,
            subject_id: None,
        }
    }

    #[test]
    fn classify_without_qualification_is_binary() {
        assert_eq!(classify(6.0, 6.0, None), GradeStatus::Passed);
        assert_eq!(classify(5.99, 6.0, None), GradeStatus::Failed);
        assert_eq!(classify(10.0, 6.0, None), GradeStatus::Passed);
    }

    #[test]
    fn classify_with_qualification_has_three_bands() {
        assert_eq!(classify(3.9, 7.0, Some(4.0)), GradeStatus::Failed);
        assert_eq!(classify(4.0, 7.0, Some(4.0)), GradeStatus::Passed);
        assert_eq!(classify(6.99, 7.0, Some(4.0)), GradeStatus::Passed);
        assert_eq!(classify(7.0, 7.0, Some(4.0)), GradeStatus::Promoted);
    }

    #[test]
    fn classify_nan_is_failed_by_policy() {
        assert_eq!(classify(f64::NAN, 6.0, None), GradeStatus::Failed);
        assert_eq!(classify(f64::NAN, 6.0, Some(4.0)), GradeStatus::Failed);
    }

    #[test]
    fn thresholds_cascade_evaluation_then_course_then_default() {
        let mut course = Course::fallback(1);
        let mut eval = evaluation(10, None);
        assert_eq!(thresholds(&eval, &course), (DEFAULT_APPROVAL_GRADE, None));

        course.approval_grade = Some(7.0);
        course.qualification_grade = Some(4.0);
        assert_eq!(thresholds(&eval, &course), (7.0, Some(4.0)));

        eval.approval_grade = Some(8.0);
        eval.qualification_grade = Some(5.0);
        assert_eq!(thresholds(&eval, &course), (8.0, Some(5.0)));
    }

    #[test]
    fn auto_weight_shares_remainder_among_unset_types() {
        let types = vec![
            eval_type(1, "Parciales", Some(60.0)),
            eval_type(2, "TPs", None),
            eval_type(3, "Orales", None),
        ];
        assert_eq!(auto_weight(&types, 1), None);
        assert_eq!(auto_weight(&types, 2), Some(20));
        assert_eq!(auto_weight(&types, 3), Some(20));
    }

    #[test]
    fn auto_weight_all_unset_distributes_100_equally() {
        let types = vec![
            eval_type(1, "A", None),
            eval_type(2, "B", None),
            eval_type(3, "C", None),
            eval_type(4, "D", None),
        ];
        for t in &types {
            assert_eq!(auto_weight(&types, t.id), Some(25));
        }
    }

    #[test]
    fn auto_weight_never_goes_negative() {
        let types = vec![eval_type(1, "A", Some(100.0)), eval_type(2, "B", None)];
        assert_eq!(auto_weight(&types, 2), Some(0));
    }

    #[test]
    fn explicit_plus_auto_weights_sum_to_about_100() {
        let types = vec![
            eval_type(1, "A", Some(33.0)),
            eval_type(2, "B", None),
            eval_type(3, "C", None),
            eval_type(4, "D", None),
        ];
        let auto_count = types.iter().filter(|t| t.weight.is_none()).count() as f64;
        let total: f64 = effective_weights(&types).iter().map(|w| w.weight).sum();
        assert!((total - 100.0).abs() <= auto_count);
    }

    #[test]
    fn max_weight_is_bounded_by_other_explicit_weights() {
        let types = vec![
            eval_type(1, "A", Some(70.0)),
            eval_type(2, "B", Some(40.0)),
            eval_type(3, "C", None),
        ];
        assert_eq!(max_weight(&types, 2), 30.0);
        assert_eq!(max_weight(&types, 3), 0.0);
    }

    #[test]
    fn grouped_final_average_weights_type_means() {
        let students = vec![student(1)];
        let evaluations = vec![evaluation(10, Some(1)), evaluation(11, Some(2))];
        let types = vec![
            eval_type(1, "Parciales", Some(60.0)),
            eval_type(2, "TPs", Some(40.0)),
        ];
        let grades = vec![numeric_grade(1, 10, 8.0), numeric_grade(1, 11, 4.0)];

        let out = grouped_averages(&students, &evaluations, &types, &grades, &[], None);
        assert_eq!(out.len(), 1);
        let final_avg = out[0].final_average.expect("final average");
        assert!((final_avg - 6.4).abs() < 1e-9);
    }

    #[test]
    fn grouped_weights_renormalize_over_present_types() {
        // Type 2 (weight 40) has no grade for this student, so type 1's 60
        // is the whole denominator and the final equals the type mean.
        let students = vec![student(1)];
        let evaluations = vec![evaluation(10, Some(1)), evaluation(11, Some(2))];
        let types = vec![
            eval_type(1, "Parciales", Some(60.0)),
            eval_type(2, "TPs", Some(40.0)),
        ];
        let grades = vec![numeric_grade(1, 10, 8.0)];

        let out = grouped_averages(&students, &evaluations, &types, &grades, &[], None);
        assert_eq!(out[0].final_average, Some(8.0));
    }

    #[test]
    fn grouped_unset_weights_share_equally_among_present_types() {
        let students = vec![student(1)];
        let evaluations = vec![evaluation(10, Some(1)), evaluation(11, Some(2))];
        let types = vec![eval_type(1, "A", None), eval_type(2, "B", None)];
        let grades = vec![numeric_grade(1, 10, 8.0), numeric_grade(1, 11, 4.0)];

        let out = grouped_averages(&students, &evaluations, &types, &grades, &[], None);
        assert_eq!(out[0].final_average, Some(6.0));
    }

    #[test]
    fn student_without_grades_has_no_final_average() {
        let students = vec![student(1), student(2)];
        let evaluations = vec![evaluation(10, Some(1))];
        let types = vec![eval_type(1, "A", None)];
        let grades = vec![numeric_grade(1, 10, 9.0)];

        let out = grouped_averages(&students, &evaluations, &types, &grades, &[], None);
        assert_eq!(out[1].student_id, 2);
        assert!(out[1].grouped_averages.is_empty());
        assert_eq!(out[1].final_average, None);
    }

    #[test]
    fn untyped_evaluations_join_no_group() {
        let students = vec![student(1)];
        let evaluations = vec![evaluation(10, None), evaluation(11, Some(1))];
        let types = vec![eval_type(1, "A", None)];
        let grades = vec![numeric_grade(1, 10, 2.0), numeric_grade(1, 11, 8.0)];

        let out = grouped_averages(&students, &evaluations, &types, &grades, &[], None);
        assert_eq!(out[0].grouped_averages.len(), 1);
        assert_eq!(out[0].final_average, Some(8.0));
    }

    #[test]
    fn categorical_grades_use_the_scale_mapping() {
        let students = vec![student(1)];
        let mut eval = evaluation(10, Some(1));
        eval.grade_scale_id = Some(5);
        let evaluations = vec![eval];
        let types = vec![eval_type(1, "A", None)];
        let scales = vec![GradeScale {
            id: 5,
            name: "Conceptual".to_string(),
            options: vec![
                GradeScaleOption {
                    label: "Aprobado".to_string(),
                    numeric_value: Some(6.0),
                    order: 1,
                },
                GradeScaleOption {
                    label: "Distinguido".to_string(),
                    numeric_value: None,
                    order: 2,
                },
            ],
        }];
        let grades = vec![Grade {
            student_id: 1,
            evaluation_id: 10,
            value: GradeValue::Categorical("aprobado".to_string()),
        }];

        let out = grouped_averages(&students, &evaluations, &types, &grades, &scales, None);
        assert_eq!(out[0].final_average, Some(6.0));
    }

    #[test]
    fn unmapped_categorical_is_excluded_from_the_mean() {
        let students = vec![student(1)];
        let mut eval_a = evaluation(10, Some(1));
        eval_a.grade_scale_id = Some(5);
        let evaluations = vec![eval_a, evaluation(11, Some(1))];
        let types = vec![eval_type(1, "A", None)];
        let scales = vec![GradeScale {
            id: 5,
            name: "Conceptual".to_string(),
            options: vec![GradeScaleOption {
                label: "Distinguido".to_string(),
                numeric_value: None,
                order: 1,
            }],
        }];
        let grades = vec![
            Grade {
                student_id: 1,
                evaluation_id: 10,
                value: GradeValue::Categorical("Distinguido".to_string()),
            },
            numeric_grade(1, 11, 8.0),
        ];

        let out = grouped_averages(&students, &evaluations, &types, &grades, &scales, None);
        assert_eq!(out[0].grouped_averages[0].average, 8.0);
        assert_eq!(out[0].grouped_averages[0].evaluations_count, 1);
    }

    #[test]
    fn subject_filter_restricts_evaluations_and_grades() {
        let students = vec![student(1)];
        let mut in_subject = evaluation(10, Some(1));
        in_subject.subject_id = Some(7);
        let other = evaluation(11, Some(1));
        let evaluations = vec![in_subject, other];
        let types = vec![eval_type(1, "A", None)];
        let grades = vec![numeric_grade(1, 10, 10.0), numeric_grade(1, 11, 2.0)];

        let out = grouped_averages(&students, &evaluations, &types, &grades, &[], Some(7));
        assert_eq!(out[0].final_average, Some(10.0));
    }

    #[test]
    fn grouped_averages_recompute_is_identical() {
        let students = vec![student(1), student(2)];
        let evaluations = vec![evaluation(10, Some(1)), evaluation(11, Some(2))];
        let types = vec![eval_type(1, "A", Some(30.0)), eval_type(2, "B", None)];
        let grades = vec![
            numeric_grade(1, 10, 8.0),
            numeric_grade(1, 11, 4.0),
            numeric_grade(2, 10, 5.5),
        ];

        let a = grouped_averages(&students, &evaluations, &types, &grades, &[], None);
        let b = grouped_averages(&students, &evaluations, &types, &grades, &[], None);
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }

    #[test]
    fn attendance_two_of_three_dates_rounds_to_67() {
        let students = vec![student(1)];
        let records = vec![
            record(1, "2026-03-02", true),
            record(1, "2026-03-09", true),
            record(1, "2026-03-16", false),
        ];
        let out = attendance_summary(&students, &records, None);
        assert_eq!(out.dates.len(), 3);
        assert_eq!(out.students[0].percentage, Some(67));
    }

    #[test]
    fn attendance_missing_record_counts_as_absent() {
        // Student 2 has no record on the second date; it still counts
        // against them.
        let students = vec![student(1), student(2)];
        let records = vec![
            record(1, "2026-03-02", true),
            record(2, "2026-03-02", true),
            record(1, "2026-03-09", true),
        ];
        let out = attendance_summary(&students, &records, None);
        assert_eq!(out.students[0].percentage, Some(100));
        assert_eq!(out.students[1].percentage, Some(50));
    }

    #[test]
    fn attendance_without_dates_is_undefined() {
        let students = vec![student(1)];
        let out = attendance_summary(&students, &[], None);
        assert!(out.dates.is_empty());
        assert_eq!(out.students[0].percentage, None);
        assert_eq!(out.students[0].present_count, 0);
    }

    #[test]
    fn attendance_subject_filter_scopes_the_date_set() {
        let students = vec![student(1)];
        let mut scoped = record(1, "2026-03-02", true);
        scoped.subject_id = Some(3);
        let records = vec![scoped, record(1, "2026-03-09", false)];

        let all = attendance_summary(&students, &records, None);
        assert_eq!(all.dates.len(), 2);
        assert_eq!(all.students[0].percentage, Some(50));

        let filtered = attendance_summary(&students, &records, Some(3));
        assert_eq!(filtered.dates.len(), 1);
        assert_eq!(filtered.students[0].percentage, Some(100));
    }

    #[test]
    fn attendance_present_totals_per_date() {
        let students = vec![student(1), student(2)];
        let records = vec![
            record(1, "2026-03-02", true),
            record(2, "2026-03-02", true),
            record(1, "2026-03-09", false),
            record(2, "2026-03-09", true),
        ];
        let out = attendance_summary(&students, &records, None);
        assert_eq!(out.present_by_date[0].present_count, 2);
        assert_eq!(out.present_by_date[1].present_count, 1);
    }
}
