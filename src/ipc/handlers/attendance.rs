use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
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

fn get_required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
        })?;
    raw.parse::<NaiveDate>().map_err(|_| HandlerErr {
        code: "bad_params",
        message: format!("{} must be YYYY-MM-DD", key),
    })
}

fn get_required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
        })
}

fn handle_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed: Result<_, HandlerErr> = (|| {
        Ok((
            get_required_i64(&req.params, "courseId")?,
            get_required_i64(&req.params, "studentId")?,
            get_required_date(&req.params, "date")?,
            get_required_bool(&req.params, "present")?,
        ))
    })();
    let (course_id, student_id, date, present) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = req.params.get("subjectId").and_then(|v| v.as_i64());

    let Some(snapshot) = state.store.get_mut(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };
    match snapshot.record_attendance(student_id, date, present, subject_id) {
        Ok(()) => ok(&req.id, json!({ "recorded": true })),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn handle_bulk_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed: Result<_, HandlerErr> = (|| {
        Ok((
            get_required_i64(&req.params, "courseId")?,
            get_required_date(&req.params, "date")?,
        ))
    })();
    let (course_id, date) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = req.params.get("subjectId").and_then(|v| v.as_i64());
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries", None);
    };

    let Some(snapshot) = state.store.get_mut(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };

    // All-or-nothing: validate every entry before touching the snapshot.
    let mut pairs: Vec<(i64, bool)> = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_i64()) else {
            return err(&req.id, "bad_params", "entry missing studentId", None);
        };
        let Some(present) = entry.get("present").and_then(|v| v.as_bool()) else {
            return err(&req.id, "bad_params", "entry missing present", None);
        };
        if !snapshot.students.iter().any(|s| s.id == student_id) {
            return err(
                &req.id,
                "not_found",
                format!("student {} is not in course {}", student_id, course_id),
                None,
            );
        }
        pairs.push((student_id, present));
    }
    for (student_id, present) in &pairs {
        if let Err(e) = snapshot.record_attendance(*student_id, date, *present, subject_id) {
            return err(&req.id, e.code, e.message, None);
        }
    }

    ok(&req.id, json!({ "recorded": pairs.len() }))
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course_id = match get_required_i64(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = req.params.get("subjectId").and_then(|v| v.as_i64());

    let Some(snapshot) = state.store.get(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };
    let summary = calc::attendance_summary(&snapshot.students, &snapshot.attendance, subject_id);
    match serde_json::to_value(&summary) {
        Ok(summary) => ok(&req.id, summary),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(handle_record(state, req)),
        "attendance.bulkRecord" => Some(handle_bulk_record(state, req)),
        "attendance.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
