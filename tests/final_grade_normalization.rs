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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Fixture {
    teacher_id: String,
    student_id: String,
    course_id: String,
}

fn seed_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
) -> Fixture {
    let teacher = request_ok(
        stdin,
        reader,
        "seed-teacher",
        "users.create",
        json!({
            "name": format!("Teacher {}", tag),
            "email": format!("teacher.{}@example.com", tag),
            "role": "teacher"
        }),
    );
    let teacher_id = teacher
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let student = request_ok(
        stdin,
        reader,
        "seed-student",
        "users.create",
        json!({
            "name": format!("Student {}", tag),
            "email": format!("student.{}@example.com", tag),
            "role": "student"
        }),
    );
    let student_id = student
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let course = request_ok(
        stdin,
        reader,
        "seed-course",
        "courses.create",
        json!({ "name": format!("Course {}", tag), "teacherId": teacher_id }),
    );
    let course_id = course
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "seed-enroll",
        "enrollments.add",
        json!({ "studentId": student_id, "courseId": course_id }),
    );
    Fixture {
        teacher_id,
        student_id,
        course_id,
    }
}

fn add_evaluation(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    fx: &Fixture,
    subject: &str,
    evaluation_type: &str,
    score: i64,
) {
    let _ = request_ok(
        stdin,
        reader,
        "seed-eval",
        "evaluations.create",
        json!({
            "studentId": fx.student_id,
            "teacherId": fx.teacher_id,
            "courseId": fx.course_id,
            "subject": subject,
            "evaluationType": evaluation_type,
            "score": score
        }),
    );
}

fn final_grade(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    fx: &Fixture,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        "grade",
        "grades.finalGrade",
        json!({ "studentId": fx.student_id, "courseId": fx.course_id }),
    )
}

fn f64_of(value: &serde_json::Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("missing {}", key))
}

#[test]
fn fully_populated_weights_are_a_plain_weighted_sum() {
    let workspace = temp_dir("gradebook-weighted-sum");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = seed_course(&mut stdin, &mut reader, "wsum");

    add_evaluation(&mut stdin, &mut reader, &fx, "Participation", "participation", 90);
    add_evaluation(&mut stdin, &mut reader, &fx, "Homework 1", "homework", 80);
    add_evaluation(&mut stdin, &mut reader, &fx, "Final Exam", "exam", 70);

    // Default weights 20/40/40: 0.2*90 + 0.4*80 + 0.4*70 = 78.00, and the
    // already-complete weight set must not be rescaled.
    let grade = final_grade(&mut stdin, &mut reader, &fx);
    assert!((f64_of(&grade, "finalGrade") - 78.0).abs() < 1e-9);
    assert!((f64_of(&grade, "totalWeight") - 100.0).abs() < 1e-9);

    let breakdown = grade.get("breakdown").expect("breakdown");
    let homework = breakdown.get("homework").expect("homework line");
    assert_eq!(homework.get("weight"), Some(&json!(40)));
    assert!((f64_of(homework, "average") - 80.0).abs() < 1e-9);
    assert!((f64_of(homework, "contribution") - 32.0).abs() < 1e-9);
    // Zero-weight categories with no data stay out of the breakdown.
    assert!(breakdown.get("project").is_none());
    assert!(breakdown.get("quiz").is_none());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn weight_of_unscored_categories_is_rescaled_away() {
    let workspace = temp_dir("gradebook-rescale");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = seed_course(&mut stdin, &mut reader, "rescale");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "weights",
        "rules.update",
        json!({
            "courseId": fx.course_id,
            "weights": { "homework": 40, "exam": 60 }
        }),
    );
    add_evaluation(&mut stdin, &mut reader, &fx, "Homework 1", "homework", 80);

    // Exam carries 60 weight but has no evaluations: the homework average
    // must be rescaled to the full 100-point basis.
    let grade = final_grade(&mut stdin, &mut reader, &fx);
    assert!((f64_of(&grade, "finalGrade") - 80.0).abs() < 1e-9);
    assert!((f64_of(&grade, "totalWeight") - 40.0).abs() < 1e-9);

    let breakdown = grade.get("breakdown").expect("breakdown");
    let homework = breakdown.get("homework").expect("homework line");
    // The breakdown reports the pre-normalization contribution.
    assert!((f64_of(homework, "contribution") - 32.0).abs() < 1e-9);
    assert!(breakdown.get("exam").is_none());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn course_without_evaluations_grades_to_zero() {
    let workspace = temp_dir("gradebook-empty-course");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = seed_course(&mut stdin, &mut reader, "empty");

    let grade = final_grade(&mut stdin, &mut reader, &fx);
    assert_eq!(grade.get("finalGrade"), Some(&json!(0.0)));
    assert_eq!(grade.get("totalWeight"), Some(&json!(0.0)));
    assert_eq!(grade.get("breakdown"), Some(&json!({})));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn averages_accumulate_per_category_before_weighting() {
    let workspace = temp_dir("gradebook-category-averages");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = seed_course(&mut stdin, &mut reader, "avg");

    // Three homework marks average 85; one participation mark of 60.
    add_evaluation(&mut stdin, &mut reader, &fx, "Homework 1", "homework", 80);
    add_evaluation(&mut stdin, &mut reader, &fx, "Homework 2", "homework", 85);
    add_evaluation(&mut stdin, &mut reader, &fx, "Homework 3", "homework", 90);
    add_evaluation(&mut stdin, &mut reader, &fx, "Discussions", "participation", 60);

    // Active weight 60 of 100: (0.2*60 + 0.4*85) / 60 * 100 = 76.67.
    let grade = final_grade(&mut stdin, &mut reader, &fx);
    assert!((f64_of(&grade, "finalGrade") - 76.67).abs() < 1e-9);
    assert!((f64_of(&grade, "totalWeight") - 60.0).abs() < 1e-9);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
