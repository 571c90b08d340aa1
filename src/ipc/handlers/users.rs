use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_rfc3339, required_trimmed_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 3] = ["admin", "teacher", "student"];

fn parse_role(req: &Request, raw: &str) -> Result<String, serde_json::Value> {
    let role = raw.trim().to_ascii_lowercase();
    if !ROLES.contains(&role.as_str()) {
        return Err(err(
            &req.id,
            "bad_params",
            "role must be one of: admin, teacher, student",
            Some(json!({ "role": raw })),
        ));
    }
    Ok(role)
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_trimmed_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match required_trimmed_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match required_trimmed_str(req, "role").and_then(|v| parse_role(req, &v)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, name, email, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (&user_id, &name, &email, &role, now_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users", "email": email })),
        );
    }

    ok(
        &req.id,
        json!({ "userId": user_id, "name": name, "email": email, "role": role }),
    )
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        None => None,
        Some(raw) => match parse_role(req, raw) {
            Ok(v) => Some(v),
            Err(e) => return e,
        },
    };

    let (sql, binds): (&str, Vec<Value>) = match &role {
        Some(role) => (
            "SELECT id, name, email, role, created_at FROM users WHERE role = ? ORDER BY name",
            vec![Value::Text(role.clone())],
        ),
        None => (
            "SELECT id, name, email, role, created_at FROM users ORDER BY name",
            Vec::new(),
        ),
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let email: String = row.get(2)?;
            let role: String = row.get(3)?;
            let created_at: Option<String> = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "email": email,
                "role": role,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_trimmed_str(req, "userId") {
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
    if let Some(v) = patch.get("email") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.email must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "email must not be empty", None);
        }
        set_parts.push("email = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("role") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.role must be a string", None);
        };
        let role = match parse_role(req, s) {
            Ok(v) => v,
            Err(e) => return e,
        };
        set_parts.push("role = ?".into());
        bind_values.push(Value::Text(role));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    let sql = format!("UPDATE users SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(user_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "users" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "user not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_trimmed_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Refuse to orphan rows that still point at this user; the caller must
    // reassign or delete them first.
    let references = [
        ("courses", "SELECT COUNT(*) FROM courses WHERE teacher_id = ?1"),
        (
            "course_enrollments",
            "SELECT COUNT(*) FROM course_enrollments WHERE student_id = ?1",
        ),
        (
            "evaluations",
            "SELECT COUNT(*) FROM evaluations WHERE student_id = ?1 OR teacher_id = ?1",
        ),
    ];
    for (table, sql) in references {
        let count: i64 = match conn.query_row(sql, [&user_id], |r| r.get(0)) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if count > 0 {
            return err(
                &req.id,
                "in_use",
                format!("user is still referenced by {}", table),
                Some(json!({ "table": table, "count": count })),
            );
        }
    }

    let changed = match conn.execute("DELETE FROM users WHERE id = ?", [&user_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "users" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "user not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_users_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row = conn.query_row(
        "SELECT
           COUNT(*),
           SUM(CASE WHEN role = 'admin' THEN 1 ELSE 0 END),
           SUM(CASE WHEN role = 'teacher' THEN 1 ELSE 0 END),
           SUM(CASE WHEN role = 'student' THEN 1 ELSE 0 END)
         FROM users",
        [],
        |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, Option<i64>>(1)?,
                r.get::<_, Option<i64>>(2)?,
                r.get::<_, Option<i64>>(3)?,
            ))
        },
    );

    match row {
        Ok((total, admins, teachers, students)) => ok(
            &req.id,
            json!({
                "totalUsers": total,
                "admins": admins.unwrap_or(0),
                "teachers": teachers.unwrap_or(0),
                "students": students.unwrap_or(0)
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        "users.stats" => Some(handle_users_stats(state, req)),
        _ => None,
    }
}
