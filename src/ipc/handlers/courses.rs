use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_rfc3339, required_trimmed_str, user_role};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_trimmed_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string());
    let teacher_id = match required_trimmed_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

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

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO courses(id, name, description, teacher_id, created_at) VALUES(?, ?, ?, ?, ?)",
        (&course_id, &name, &description, &teacher_id, now_rfc3339()),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    // Every course is gradable from the start: seed the default weight set.
    if let Err(e) = tx.execute(
        "INSERT INTO course_grading_rules(course_id, updated_at) VALUES(?, ?)",
        (&course_id, now_rfc3339()),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "course_grading_rules" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "courseId": course_id, "name": name }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Use correlated subqueries to avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.description,
           c.teacher_id,
           t.name,
           (SELECT COUNT(*) FROM course_enrollments ce WHERE ce.course_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM evaluations e WHERE e.course_id = c.id) AS evaluation_count
         FROM courses c
         LEFT JOIN users t ON t.id = c.teacher_id
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let teacher_id: Option<String> = row.get(3)?;
            let teacher_name: Option<String> = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            let evaluation_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "description": description,
                "teacherId": teacher_id,
                "teacherName": teacher_name,
                "studentCount": student_count,
                "evaluationCount": evaluation_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_list_by_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_trimmed_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.name, c.description, t.name
         FROM courses c
         LEFT JOIN users t ON t.id = c.teacher_id
         WHERE c.teacher_id = ?
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&teacher_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let teacher_name: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "description": description,
                "teacherName": teacher_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_trimmed_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row = conn
        .query_row(
            "SELECT c.id, c.name, c.description, c.teacher_id, t.name, t.email, c.created_at
             FROM courses c
             LEFT JOIN users t ON t.id = c.teacher_id
             WHERE c.id = ?",
            [&course_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "description": r.get::<_, Option<String>>(2)?,
                    "teacherId": r.get::<_, Option<String>>(3)?,
                    "teacherName": r.get::<_, Option<String>>(4)?,
                    "teacherEmail": r.get::<_, Option<String>>(5)?,
                    "createdAt": r.get::<_, Option<String>>(6)?
                }))
            },
        )
        .optional();

    match row {
        Ok(Some(course)) => ok(&req.id, json!({ "course": course })),
        Ok(None) => err(&req.id, "not_found", "course not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_trimmed_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("description") {
        if v.is_null() {
            set_parts.push("description = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            set_parts.push("description = ?".into());
            bind_values.push(Value::Text(s.trim().to_string()));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.description must be a string or null",
                None,
            );
        }
    }
    if let Some(v) = patch.get("teacherId") {
        let Some(s) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                "patch.teacherId must be a string",
                None,
            );
        };
        match user_role(conn, req, s) {
            Ok(role) if role == "teacher" => {}
            Ok(role) => {
                return err(
                    &req.id,
                    "bad_params",
                    "teacherId must reference a teacher",
                    Some(json!({ "userId": s, "role": role })),
                )
            }
            Err(e) => return e,
        }
        set_parts.push("teacher_id = ?".into());
        bind_values.push(Value::Text(s.to_string()));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    let sql = format!("UPDATE courses SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(course_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "courses" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "course not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_trimmed_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM evaluations WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "evaluations" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM course_enrollments WHERE course_id = ?",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "course_enrollments" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM course_grading_rules WHERE course_id = ?",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "course_grading_rules" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM courses WHERE id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.listByTeacher" => Some(handle_courses_list_by_teacher(state, req)),
        "courses.get" => Some(handle_courses_get(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}
