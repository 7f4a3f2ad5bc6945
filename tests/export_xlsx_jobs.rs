use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gestiond");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gestiond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Polls export.status until the job settles; returns the full envelope
/// of the settling response.
fn wait_for_job(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    job_id: &str,
) -> serde_json::Value {
    for i in 0..200 {
        let resp = request(
            stdin,
            reader,
            &format!("poll-{}", i),
            "export.status",
            json!({ "jobId": job_id }),
        );
        let pending = resp
            .pointer("/result/status")
            .and_then(|v| v.as_str())
            .map(|s| s == "pending")
            .unwrap_or(false);
        if !pending {
            return resp;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("export job {} did not settle", job_id);
}

fn course_sources() -> serde_json::Value {
    json!({
        "course": { "id": 1, "name": "Matemática 3° A", "approvalGrade": 6.0 },
        "students": [
            { "id": 1, "courseId": 1, "firstName": "Ana", "lastName": "Pérez" },
            { "id": 2, "courseId": 1, "firstName": "Bruno" }
        ],
        "evaluations": [
            { "id": 10, "courseId": 1, "nombre": "Parcial 1", "date": "2026-04-10", "evaluationTypeId": 1 },
            { "id": 11, "courseId": 1, "nombre": "TP 1", "evaluationTypeId": 2 }
        ],
        "evaluationTypes": [
            { "id": 1, "courseId": 1, "nombre": "Parciales", "weight": 60.0 },
            { "id": 2, "courseId": 1, "nombre": "TPs", "weight": 40.0 }
        ],
        "grades": [
            { "courseId": 1, "studentId": 1, "evaluationId": 10, "grade": 8.0 },
            { "courseId": 1, "studentId": 1, "evaluationId": 11, "grade": 4.0 },
            { "courseId": 1, "studentId": 2, "evaluationId": 10, "grade": 5.5 }
        ],
        "attendance": [
            { "courseId": 1, "studentId": 1, "date": "2026-03-02", "present": true },
            { "courseId": 1, "studentId": 2, "date": "2026-03-02", "present": false },
            { "courseId": 1, "studentId": 1, "date": "2026-03-09", "present": true }
        ],
        "gradeScales": []
    })
}

#[test]
fn grades_export_produces_an_xlsx_artifact() {
    let out_dir = temp_dir("gestiond-export-grades");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "course.load",
        json!({ "courseId": 1, "sources": course_sources() }),
    );

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "export.gradesXlsx",
        json!({ "courseId": 1, "outDir": out_dir.to_string_lossy() }),
    );
    let job_id = started.get("jobId").and_then(|v| v.as_str()).expect("jobId").to_string();
    let file_name = started
        .get("fileName")
        .and_then(|v| v.as_str())
        .expect("fileName")
        .to_string();
    assert!(file_name.starts_with("Notas_Matem_tica_3__A_"), "{}", file_name);
    assert!(file_name.ends_with(".xlsx"));
    // 8-digit date stamp between prefix and extension.
    let stamp = file_name
        .trim_end_matches(".xlsx")
        .rsplit('_')
        .next()
        .expect("stamp");
    assert_eq!(stamp.len(), 8);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));

    let done = wait_for_job(&mut stdin, &mut reader, &job_id);
    assert_eq!(done.get("ok").and_then(|v| v.as_bool()), Some(true), "{}", done);
    assert_eq!(
        done.pointer("/result/status").and_then(|v| v.as_str()),
        Some("done")
    );
    assert_eq!(
        done.pointer("/result/fileName").and_then(|v| v.as_str()),
        Some(file_name.as_str())
    );
    let sha = done
        .pointer("/result/sha256")
        .and_then(|v| v.as_str())
        .expect("sha256");
    assert_eq!(sha.len(), 64);

    let path = done
        .pointer("/result/path")
        .and_then(|v| v.as_str())
        .expect("path");
    let bytes = std::fs::read(path).expect("read artifact");
    assert!(!bytes.is_empty());
    // xlsx is a zip container.
    assert_eq!(&bytes[..4], &[0x50, 0x4B, 0x03, 0x04]);
    assert_eq!(
        done.pointer("/result/bytes").and_then(|v| v.as_u64()),
        Some(bytes.len() as u64)
    );
    assert!(!out_dir.join(format!("{}.part", file_name)).exists());

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn attendance_export_produces_an_xlsx_artifact() {
    let out_dir = temp_dir("gestiond-export-attendance");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "course.load",
        json!({ "courseId": 1, "sources": course_sources() }),
    );

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "export.attendanceXlsx",
        json!({ "courseId": 1, "outDir": out_dir.to_string_lossy() }),
    );
    let job_id = started.get("jobId").and_then(|v| v.as_str()).expect("jobId").to_string();
    let file_name = started
        .get("fileName")
        .and_then(|v| v.as_str())
        .expect("fileName")
        .to_string();
    assert!(file_name.starts_with("Asistencias_"), "{}", file_name);

    let done = wait_for_job(&mut stdin, &mut reader, &job_id);
    assert_eq!(
        done.pointer("/result/status").and_then(|v| v.as_str()),
        Some("done")
    );
    let path = done
        .pointer("/result/path")
        .and_then(|v| v.as_str())
        .expect("path");
    assert!(std::path::Path::new(path).is_file());

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn export_of_empty_course_fails_with_a_message_and_no_file() {
    let out_dir = temp_dir("gestiond-export-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "course.load",
        json!({
            "courseId": 2,
            "sources": {
                "course": { "id": 2, "name": "Vacío" },
                "students": [],
                "evaluations": [],
                "evaluationTypes": [],
                "grades": [],
                "attendance": [],
                "gradeScales": []
            }
        }),
    );

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "export.gradesXlsx",
        json!({ "courseId": 2, "outDir": out_dir.to_string_lossy() }),
    );
    let job_id = started.get("jobId").and_then(|v| v.as_str()).expect("jobId").to_string();

    let failed = wait_for_job(&mut stdin, &mut reader, &job_id);
    assert_eq!(failed.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        failed.pointer("/error/code").and_then(|v| v.as_str()),
        Some("export_failed")
    );
    assert!(failed
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(|m| !m.is_empty())
        .unwrap_or(false));

    let entries: Vec<_> = std::fs::read_dir(&out_dir)
        .map(|it| it.flatten().collect())
        .unwrap_or_default();
    assert!(entries.is_empty(), "no artifact expected: {:?}", entries);

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn unknown_job_id_is_not_found() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "export.status",
        json!({ "jobId": "no-such-job" }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let _ = child.kill();
}
