use crate::grading::EvaluationType;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_exists, db_conn, now_rfc3339, required_trimmed_str, user_role};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn parse_evaluation_type(req: &Request) -> Result<EvaluationType, serde_json::Value> {
    let raw = required_trimmed_str(req, "evaluationType")?;
    EvaluationType::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "evaluationType must be one of: participation, homework, exam, project, quiz",
            Some(json!({ "evaluationType": raw })),
        )
    })
}

fn parse_score(req: &Request) -> Result<i64, serde_json::Value> {
    let Some(v) = req.params.get("score") else {
        return Err(err(&req.id, "bad_params", "missing score", None));
    };
    let Some(score) = v.as_i64() else {
        return Err(err(
            &req.id,
            "bad_params",
            "score must be an integer",
            None,
        ));
    };
    if !(0..=100).contains(&score) {
        return Err(err(
            &req.id,
            "bad_params",
            "score must be between 0 and 100",
            Some(json!({ "score": score })),
        ));
    }
    Ok(score)
}

fn feedback_or_empty(req: &Request) -> String {
    req.params
        .get("feedback")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn handle_evaluations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_trimmed_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_trimmed_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_trimmed_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_trimmed_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let evaluation_type = match parse_evaluation_type(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let score = match parse_score(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let feedback = feedback_or_empty(req);

    match user_role(conn, req, &student_id) {
        Ok(role) if role == "student" => {}
        Ok(role) => {
            return err(
                &req.id,
                "bad_params",
                "studentId must reference a student",
                Some(json!({ "userId": student_id, "role": role })),
            )
        }
        Err(e) => return e,
    }
    match user_role(conn, req, &teacher_id) {
        Ok(role) if role == "teacher" => {}
        Ok(role) => {
            return err(
                &req.id,
                "bad_params",
                "teacherId must reference a teacher",
                Some(json!({ "userId": teacher_id, "role": role })),
            )
        }
        Err(e) => return e,
    }
    if let Err(e) = course_exists(conn, req, &course_id) {
        return e;
    }

    let enrolled: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM course_enrollments WHERE student_id = ? AND course_id = ?",
            (&student_id, &course_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if enrolled.is_none() {
        return err(
            &req.id,
            "bad_params",
            "student is not enrolled in this course",
            Some(json!({ "studentId": student_id, "courseId": course_id })),
        );
    }

    let evaluation_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO evaluations(
            id, student_id, teacher_id, course_id, subject, evaluation_type,
            score, feedback, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &evaluation_id,
            &student_id,
            &teacher_id,
            &course_id,
            &subject,
            evaluation_type.as_str(),
            score,
            &feedback,
            now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "evaluations" })),
        );
    }

    ok(&req.id, json!({ "evaluationId": evaluation_id }))
}

const EVALUATION_SELECT: &str = "SELECT e.id, e.student_id, s.name, e.teacher_id, t.name,
        e.course_id, c.name, e.subject, e.evaluation_type, e.score, e.feedback, e.created_at
 FROM evaluations e
 JOIN users s ON s.id = e.student_id
 JOIN users t ON t.id = e.teacher_id
 JOIN courses c ON c.id = e.course_id";

fn evaluation_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentId": row.get::<_, String>(1)?,
        "studentName": row.get::<_, String>(2)?,
        "teacherId": row.get::<_, String>(3)?,
        "teacherName": row.get::<_, String>(4)?,
        "courseId": row.get::<_, String>(5)?,
        "courseName": row.get::<_, String>(6)?,
        "subject": row.get::<_, String>(7)?,
        "evaluationType": row.get::<_, String>(8)?,
        "score": row.get::<_, i64>(9)?,
        "feedback": row.get::<_, Option<String>>(10)?,
        "createdAt": row.get::<_, Option<String>>(11)?
    }))
}

pub(super) fn query_evaluations(
    conn: &Connection,
    filter: Option<(&str, &str)>,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let sql = match filter {
        Some((column, _)) => format!(
            "{} WHERE e.{} = ? ORDER BY e.created_at DESC",
            EVALUATION_SELECT, column
        ),
        None => format!("{} ORDER BY e.created_at DESC", EVALUATION_SELECT),
    };

    let mut stmt = conn.prepare(&sql)?;
    match filter {
        Some((_, value)) => stmt
            .query_map([value], evaluation_row_json)
            .and_then(|it| it.collect()),
        None => stmt
            .query_map([], evaluation_row_json)
            .and_then(|it| it.collect()),
    }
}

fn list_evaluations(
    conn: &Connection,
    req: &Request,
    filter: Option<(&str, &str)>,
) -> serde_json::Value {
    match query_evaluations(conn, filter) {
        Ok(evaluations) => ok(&req.id, json!({ "evaluations": evaluations })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_evaluations_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    list_evaluations(conn, req, None)
}

fn handle_evaluations_list_by_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_trimmed_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    list_evaluations(conn, req, Some(("student_id", &student_id)))
}

fn handle_evaluations_list_by_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_trimmed_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    list_evaluations(conn, req, Some(("teacher_id", &teacher_id)))
}

fn handle_evaluations_list_by_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_trimmed_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    list_evaluations(conn, req, Some(("course_id", &course_id)))
}

fn handle_evaluations_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let evaluation_id = match required_trimmed_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sql = format!("{} WHERE e.id = ?", EVALUATION_SELECT);
    let row = conn
        .query_row(&sql, [&evaluation_id], evaluation_row_json)
        .optional();

    match row {
        Ok(Some(evaluation)) => ok(&req.id, json!({ "evaluation": evaluation })),
        Ok(None) => err(&req.id, "not_found", "evaluation not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_evaluations_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let evaluation_id = match required_trimmed_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Controlled update: subject, type, score and feedback move together;
    // ownership columns never change after creation.
    let subject = match required_trimmed_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let evaluation_type = match parse_evaluation_type(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let score = match parse_score(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let feedback = feedback_or_empty(req);

    let changed = match conn.execute(
        "UPDATE evaluations
         SET subject = ?, evaluation_type = ?, score = ?, feedback = ?
         WHERE id = ?",
        (
            &subject,
            evaluation_type.as_str(),
            score,
            &feedback,
            &evaluation_id,
        ),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "evaluations" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "evaluation not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_evaluations_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let evaluation_id = match required_trimmed_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let changed = match conn.execute("DELETE FROM evaluations WHERE id = ?", [&evaluation_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "evaluations" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "evaluation not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_evaluations_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row = conn.query_row(
        "SELECT
           COUNT(*),
           AVG(score),
           COUNT(DISTINCT student_id),
           COUNT(DISTINCT teacher_id)
         FROM evaluations",
        [],
        |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, Option<f64>>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
            ))
        },
    );

    match row {
        Ok((total, avg, students, teachers)) => ok(
            &req.id,
            json!({
                "totalEvaluations": total,
                "averageScore": avg,
                "totalStudents": students,
                "totalTeachers": teachers
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.create" => Some(handle_evaluations_create(state, req)),
        "evaluations.list" => Some(handle_evaluations_list(state, req)),
        "evaluations.listByStudent" => Some(handle_evaluations_list_by_student(state, req)),
        "evaluations.listByTeacher" => Some(handle_evaluations_list_by_teacher(state, req)),
        "evaluations.listByCourse" => Some(handle_evaluations_list_by_course(state, req)),
        "evaluations.get" => Some(handle_evaluations_get(state, req)),
        "evaluations.update" => Some(handle_evaluations_update(state, req)),
        "evaluations.delete" => Some(handle_evaluations_delete(state, req)),
        "evaluations.stats" => Some(handle_evaluations_stats(state, req)),
        _ => None,
    }
}
