use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_exists, db_conn, now_rfc3339, required_trimmed_str, user_role};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn require_student(
    conn: &rusqlite::Connection,
    req: &Request,
    student_id: &str,
) -> Result<(), serde_json::Value> {
    match user_role(conn, req, student_id)? {
        role if role == "student" => Ok(()),
        role => Err(err(
            &req.id,
            "bad_params",
            "studentId must reference a student",
            Some(json!({ "userId": student_id, "role": role })),
        )),
    }
}

fn handle_enrollments_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_trimmed_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_trimmed_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_student(conn, req, &student_id) {
        return e;
    }
    if let Err(e) = course_exists(conn, req, &course_id) {
        return e;
    }

    // Re-enrolling is a no-op, not an error.
    let changed = match conn.execute(
        "INSERT OR IGNORE INTO course_enrollments(student_id, course_id, enrolled_at)
         VALUES(?, ?, ?)",
        (&student_id, &course_id, now_rfc3339()),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "course_enrollments" })),
            )
        }
    };

    ok(
        &req.id,
        json!({ "ok": true, "alreadyEnrolled": changed == 0 }),
    )
}

fn handle_enrollments_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_trimmed_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_trimmed_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let changed = match conn.execute(
        "DELETE FROM course_enrollments WHERE student_id = ? AND course_id = ?",
        (&student_id, &course_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "course_enrollments" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "enrollment not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_enrollments_list_by_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_trimmed_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = course_exists(conn, req, &course_id) {
        return e;
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name, s.email, ce.enrolled_at
         FROM course_enrollments ce
         JOIN users s ON s.id = ce.student_id
         WHERE ce.course_id = ?
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "email": row.get::<_, String>(2)?,
                "enrolledAt": row.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_available_students(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_trimmed_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = course_exists(conn, req, &course_id) {
        return e;
    }

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.name, u.email
         FROM users u
         WHERE u.role = 'student'
           AND u.id NOT IN (
             SELECT ce.student_id FROM course_enrollments ce WHERE ce.course_id = ?
           )
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "email": row.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_students_by_teacher(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_trimmed_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT DISTINCT s.id, s.name, s.email, c.id, c.name
         FROM users s
         JOIN course_enrollments ce ON ce.student_id = s.id
         JOIN courses c ON c.id = ce.course_id
         WHERE c.teacher_id = ? AND s.role = 'student'
         ORDER BY c.name, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&teacher_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "email": row.get::<_, String>(2)?,
                "courseId": row.get::<_, String>(3)?,
                "courseName": row.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.add" => Some(handle_enrollments_add(state, req)),
        "enrollments.remove" => Some(handle_enrollments_remove(state, req)),
        "enrollments.listByCourse" => Some(handle_enrollments_list_by_course(state, req)),
        "enrollments.availableStudents" => Some(handle_enrollments_available_students(state, req)),
        "enrollments.studentsByTeacher" => Some(handle_enrollments_students_by_teacher(state, req)),
        _ => None,
    }
}
