use crate::grading;
use crate::ipc::error::{err, grading_err, ok};
use crate::ipc::helpers::{course_exists, db_conn, now_rfc3339, required_trimmed_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_rules_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let (weights, is_default) = match grading::course_grading_rules(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return grading_err(&req.id, e),
    };
    let updated_at: Option<String> = if is_default {
        None
    } else {
        match conn
            .query_row(
                "SELECT updated_at FROM course_grading_rules WHERE course_id = ?",
                [&course_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v.flatten(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "weights": weights,
            "isDefault": is_default,
            "updatedAt": updated_at
        }),
    )
}

fn handle_rules_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // Validate before touching storage; a bad weight set must leave the
    // previous configuration fully intact.
    let weights = match grading::parse_weights(req.params.get("weights")) {
        Ok(v) => v,
        Err(e) => return grading_err(&req.id, e),
    };
    if let Err(e) = grading::validate_weights(&weights) {
        return grading_err(&req.id, e);
    }

    // Full replacement of the weight set, never a partial update.
    if let Err(e) = conn.execute(
        "INSERT INTO course_grading_rules(
            course_id, participation_weight, homework_weight, exam_weight,
            project_weight, quiz_weight, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_id) DO UPDATE SET
           participation_weight = excluded.participation_weight,
           homework_weight = excluded.homework_weight,
           exam_weight = excluded.exam_weight,
           project_weight = excluded.project_weight,
           quiz_weight = excluded.quiz_weight,
           updated_at = excluded.updated_at",
        (
            &course_id,
            weights.participation,
            weights.homework,
            weights.exam,
            weights.project,
            weights.quiz,
            now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "course_grading_rules" })),
        );
    }

    ok(&req.id, json!({ "ok": true, "weights": weights }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rules.get" => Some(handle_rules_get(state, req)),
        "rules.update" => Some(handle_rules_update(state, req)),
        _ => None,
    }
}
