use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn evaluation_writes_are_validated_and_controlled() {
    let workspace = temp_dir("gradebook-eval-validation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "t",
        "users.create",
        json!({ "name": "Val Teacher", "email": "val.teacher@example.com", "role": "teacher" }),
    );
    let teacher_id = teacher
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "s",
        "users.create",
        json!({ "name": "Val Student", "email": "val.student@example.com", "role": "student" }),
    );
    let student_id = student
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let outsider = request_ok(
        &mut stdin,
        &mut reader,
        "o",
        "users.create",
        json!({ "name": "Val Outsider", "email": "val.outsider@example.com", "role": "student" }),
    );
    let outsider_id = outsider
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "courses.create",
        json!({ "name": "Val Course", "teacherId": teacher_id }),
    );
    let course_id = course
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "e",
        "enrollments.add",
        json!({ "studentId": student_id, "courseId": course_id }),
    );

    let base = json!({
        "studentId": student_id,
        "teacherId": teacher_id,
        "courseId": course_id,
        "subject": "Midterm",
        "evaluationType": "exam",
        "score": 88
    });

    // Score above 100.
    let mut params = base.clone();
    params["score"] = json!(101);
    let resp = request(&mut stdin, &mut reader, "v1", "evaluations.create", params);
    assert_eq!(error_code(&resp), "bad_params");

    // Fractional score.
    let mut params = base.clone();
    params["score"] = json!(88.5);
    let resp = request(&mut stdin, &mut reader, "v2", "evaluations.create", params);
    assert_eq!(error_code(&resp), "bad_params");

    // Unknown category.
    let mut params = base.clone();
    params["evaluationType"] = json!("attendance");
    let resp = request(&mut stdin, &mut reader, "v3", "evaluations.create", params);
    assert_eq!(error_code(&resp), "bad_params");

    // Author must be a teacher.
    let mut params = base.clone();
    params["teacherId"] = json!(outsider_id.clone());
    let resp = request(&mut stdin, &mut reader, "v4", "evaluations.create", params);
    assert_eq!(error_code(&resp), "bad_params");

    // Student must be enrolled.
    let mut params = base.clone();
    params["studentId"] = json!(outsider_id.clone());
    let resp = request(&mut stdin, &mut reader, "v5", "evaluations.create", params);
    assert_eq!(error_code(&resp), "bad_params");

    // The well-formed evaluation goes through.
    let created = request_ok(&mut stdin, &mut reader, "v6", "evaluations.create", base);
    let evaluation_id = created
        .get("evaluationId")
        .and_then(|v| v.as_str())
        .expect("evaluationId")
        .to_string();

    // Controlled update rewrites subject/type/score/feedback together and
    // leaves ownership untouched.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "evaluations.update",
        json!({
            "evaluationId": evaluation_id,
            "subject": "Midterm (regraded)",
            "evaluationType": "exam",
            "score": 91,
            "feedback": "regrade applied"
        }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "evaluations.get",
        json!({ "evaluationId": evaluation_id }),
    );
    let evaluation = fetched.get("evaluation").expect("evaluation");
    assert_eq!(evaluation.get("score"), Some(&json!(91)));
    assert_eq!(
        evaluation.get("subject").and_then(|v| v.as_str()),
        Some("Midterm (regraded)")
    );
    assert_eq!(
        evaluation.get("studentId").and_then(|v| v.as_str()),
        Some(student_id.as_str())
    );
    assert_eq!(
        evaluation.get("teacherId").and_then(|v| v.as_str()),
        Some(teacher_id.as_str())
    );

    // Update with an out-of-range score is rejected without a write.
    let resp = request(
        &mut stdin,
        &mut reader,
        "u3",
        "evaluations.update",
        json!({
            "evaluationId": evaluation_id,
            "subject": "Midterm",
            "evaluationType": "exam",
            "score": -1
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "u4",
        "evaluations.get",
        json!({ "evaluationId": evaluation_id }),
    );
    assert_eq!(
        fetched.get("evaluation").and_then(|e| e.get("score")),
        Some(&json!(91))
    );

    // Delete, then the row is gone.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "evaluations.delete",
        json!({ "evaluationId": evaluation_id }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "d2",
        "evaluations.get",
        json!({ "evaluationId": evaluation_id }),
    );
    assert_eq!(error_code(&resp), "not_found");

    // Re-enrolling is a no-op rather than an error.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "re",
        "enrollments.add",
        json!({ "studentId": student_id, "courseId": course_id }),
    );
    assert_eq!(again.get("alreadyEnrolled"), Some(&json!(true)));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
