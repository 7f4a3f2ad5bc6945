use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }
}

fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
        })
}

fn get_optional_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed: Result<_, HandlerErr> = (|| {
        let course_id = get_required_i64(&req.params, "courseId")?;
        let student_id = get_required_i64(&req.params, "studentId")?;
        let evaluation_id = get_required_i64(&req.params, "evaluationId")?;
        let value = req
            .params
            .get("value")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| HandlerErr {
                code: "bad_params",
                message: "missing value".to_string(),
            })?;
        Ok((course_id, student_id, evaluation_id, value))
    })();
    let (course_id, student_id, evaluation_id, value) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let Some(snapshot) = state.store.get_mut(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };
    match snapshot.upsert_numeric_grade(student_id, evaluation_id, value) {
        Ok(()) => ok(&req.id, json!({ "updated": true })),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn handle_update_categorical(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed: Result<_, HandlerErr> = (|| {
        let course_id = get_required_i64(&req.params, "courseId")?;
        let student_id = get_required_i64(&req.params, "studentId")?;
        let evaluation_id = get_required_i64(&req.params, "evaluationId")?;
        let label = req
            .params
            .get("label")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| HandlerErr {
                code: "bad_params",
                message: "missing label".to_string(),
            })?;
        Ok((course_id, student_id, evaluation_id, label))
    })();
    let (course_id, student_id, evaluation_id, label) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let Some(snapshot) = state.store.get_mut(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };
    match snapshot.upsert_categorical_grade(student_id, evaluation_id, &label) {
        Ok(()) => ok(&req.id, json!({ "updated": true })),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn handle_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course_id = match get_required_i64(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = get_optional_i64(&req.params, "subjectId");

    let Some(snapshot) = state.store.get(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };

    let evaluations: Vec<&crate::model::Evaluation> = snapshot
        .evaluations
        .iter()
        .filter(|e| subject_id.is_none() || e.subject_id == subject_id)
        .collect();

    let eval_headers: Vec<serde_json::Value> = evaluations
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "nombre": e.name,
                "date": e.date,
                "evaluationTypeId": e.evaluation_type_id,
            })
        })
        .collect();

    let rows: Vec<serde_json::Value> = snapshot
        .students
        .iter()
        .map(|student| {
            let cells: Vec<serde_json::Value> = evaluations
                .iter()
                .map(|e| {
                    let grade = snapshot
                        .grades
                        .iter()
                        .find(|g| g.student_id == student.id && g.evaluation_id == e.id);
                    match grade {
                        Some(grade) => {
                            let status = calc::numeric_grade_value(
                                grade,
                                Some(e),
                                &snapshot.grade_scales,
                            )
                            .map(|value| {
                                let (approval, qualification) =
                                    calc::thresholds(e, &snapshot.course);
                                calc::classify(value, approval, qualification).as_str()
                            });
                            json!({
                                "value": grade.value.display(),
                                "status": status,
                            })
                        }
                        None => serde_json::Value::Null,
                    }
                })
                .collect();
            json!({
                "studentId": student.id,
                "name": student.display_name(),
                "cells": cells,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "evaluations": eval_headers,
            "rows": rows,
        }),
    )
}

fn handle_grouped_averages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course_id = match get_required_i64(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = get_optional_i64(&req.params, "subjectId");

    let Some(snapshot) = state.store.get(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };

    let averages = calc::grouped_averages(
        &snapshot.students,
        &snapshot.evaluations,
        &snapshot.evaluation_types,
        &snapshot.grades,
        &snapshot.grade_scales,
        subject_id,
    );
    match serde_json::to_value(&averages) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.update" => Some(handle_update(state, req)),
        "grades.updateCategorical" => Some(handle_update_categorical(state, req)),
        "grades.grid" => Some(handle_grid(state, req)),
        "grades.groupedAverages" => Some(handle_grouped_averages(state, req)),
        _ => None,
    }
}
