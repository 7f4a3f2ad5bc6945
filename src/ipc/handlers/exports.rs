use crate::export;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::jobs::JobState;
use chrono::Local;
use serde_json::json;
use std::path::PathBuf;

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

fn out_dir(params: &serde_json::Value) -> PathBuf {
    params
        .get("outDir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("gestiond-exports"))
}

#[derive(Clone, Copy)]
enum Kind {
    Grades,
    Attendance,
}

fn handle_export(state: &mut AppState, req: &Request, kind: Kind) -> serde_json::Value {
    let course_id = match get_required_i64(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = req.params.get("subjectId").and_then(|v| v.as_i64());
    let dir = out_dir(&req.params);

    let Some(snapshot) = state.store.get(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };
    // The worker gets its own copy; later snapshot edits don't bleed into
    // a running export.
    let snapshot = snapshot.clone();

    let prefix = match kind {
        Kind::Grades => "Notas",
        Kind::Attendance => "Asistencias",
    };
    let file_name =
        export::export_file_name(prefix, &snapshot.course.name, Local::now().date_naive());
    let job_file_name = file_name.clone();

    let job_id = state.jobs.start(move || {
        let bytes = match kind {
            Kind::Grades => export::build_grades_workbook(&snapshot, subject_id)?,
            Kind::Attendance => export::build_attendance_workbook(&snapshot, subject_id)?,
        };
        export::write_artifact(&dir, &job_file_name, &bytes)
    });

    ok(
        &req.id,
        json!({
            "jobId": job_id,
            "fileName": file_name,
        }),
    )
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(job_id) = req.params.get("jobId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.jobId", None);
    };
    match state.jobs.status(job_id) {
        None => err(&req.id, "not_found", format!("unknown job: {}", job_id), None),
        Some(JobState::Pending) => ok(&req.id, json!({ "status": "pending" })),
        Some(JobState::Done(artifact)) => ok(
            &req.id,
            json!({
                "status": "done",
                "fileName": artifact.file_name,
                "path": artifact.path,
                "bytes": artifact.bytes,
                "sha256": artifact.sha256,
            }),
        ),
        Some(JobState::Failed { message }) => err(&req.id, "export_failed", message, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.gradesXlsx" => Some(handle_export(state, req, Kind::Grades)),
        "export.attendanceXlsx" => Some(handle_export(state, req, Kind::Attendance)),
        "export.status" => Some(handle_status(state, req)),
        _ => None,
    }
}
