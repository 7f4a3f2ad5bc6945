use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{
    AttendanceRecord, Course, Evaluation, EvaluationType, Grade, GradeScale, GradeWire, Student,
};
use crate::store::{self, SnapshotSource};
use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde_json::json;

/// `SnapshotSource` over the JSON payload the shell pushes with
/// `course.load`. Each source key holds either the fetched data or
/// `{ "error": "…" }` when the shell's REST call failed; a missing key
/// counts as a failure too, so the isolation path is uniform.
struct PayloadSource<'a> {
    sources: &'a serde_json::Value,
}

impl<'a> PayloadSource<'a> {
    fn entry(&self, key: &str) -> anyhow::Result<&serde_json::Value> {
        let value = self
            .sources
            .get(key)
            .ok_or_else(|| anyhow!("source {} missing from payload", key))?;
        if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
            return Err(anyhow!("{}", message));
        }
        Ok(value)
    }

    fn list<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Vec<T>> {
        let value = self.entry(key)?;
        if !value.is_array() {
            return Err(anyhow!("source {} is not an array", key));
        }
        Ok(serde_json::from_value(value.clone())?)
    }
}

impl<'a> SnapshotSource for PayloadSource<'a> {
    fn course(&self, _course_id: i64) -> anyhow::Result<Course> {
        let value = self.entry("course")?;
        Ok(serde_json::from_value(value.clone())?)
    }

    fn students(&self, _course_id: i64) -> anyhow::Result<Vec<Student>> {
        self.list("students")
    }

    fn evaluations(&self, _course_id: i64) -> anyhow::Result<Vec<Evaluation>> {
        self.list("evaluations")
    }

    fn evaluation_types(&self, _course_id: i64) -> anyhow::Result<Vec<EvaluationType>> {
        self.list("evaluationTypes")
    }

    fn grades(&self, _course_id: i64) -> anyhow::Result<Vec<Grade>> {
        let wires: Vec<GradeWire> = self.list("grades")?;
        Ok(wires.into_iter().filter_map(GradeWire::into_grade).collect())
    }

    fn attendance(&self, _course_id: i64) -> anyhow::Result<Vec<AttendanceRecord>> {
        self.list("attendance")
    }

    fn grade_scales(&self) -> anyhow::Result<Vec<GradeScale>> {
        self.list("gradeScales")
    }
}

fn handle_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing params.courseId", None);
    };
    let Some(sources) = req.params.get("sources") else {
        return err(&req.id, "bad_params", "missing params.sources", None);
    };

    let payload = PayloadSource { sources };
    let (snapshot, source_errors) = store::load_snapshot(&payload, course_id);

    let counts = json!({
        "students": snapshot.students.len(),
        "evaluations": snapshot.evaluations.len(),
        "evaluationTypes": snapshot.evaluation_types.len(),
        "grades": snapshot.grades.len(),
        "attendance": snapshot.attendance.len(),
        "gradeScales": snapshot.grade_scales.len(),
    });
    let course_name = snapshot.course.name.clone();
    state.store.insert(snapshot);

    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "courseName": course_name,
            "counts": counts,
            "sourceErrors": source_errors,
        }),
    )
}

fn handle_unload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing params.courseId", None);
    };
    let unloaded = state.store.remove(course_id);
    ok(&req.id, json!({ "unloaded": unloaded }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let courses: Vec<serde_json::Value> = state
        .store
        .course_ids()
        .into_iter()
        .filter_map(|id| state.store.get(id))
        .map(|s| {
            json!({
                "id": s.course.id,
                "name": s.course.name,
                "students": s.students.len(),
                "evaluations": s.evaluations.len(),
            })
        })
        .collect();
    ok(&req.id, json!({ "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "course.load" => Some(handle_load(state, req)),
        "course.unload" => Some(handle_unload(state, req)),
        "course.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
