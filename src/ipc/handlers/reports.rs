use crate::grading;
use crate::ipc::error::{err, grading_err, ok};
use crate::ipc::helpers::{db_conn, now_rfc3339, required_trimmed_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

use super::evaluations;

/// Display bands the shell prints at the bottom of a gradesheet.
fn grading_scale() -> serde_json::Value {
    json!([
        { "min": 90, "label": "Excellent" },
        { "min": 80, "label": "Good" },
        { "min": 70, "label": "Average" },
        { "min": 0,  "label": "Needs Improvement" }
    ])
}

fn handle_reports_gradesheet_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_trimmed_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student = match conn
        .query_row(
            "SELECT id, name, email FROM users WHERE id = ?",
            [&student_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "email": r.get::<_, String>(2)?
                }))
            },
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let courses = match grading::student_course_grades(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return grading_err(&req.id, e),
    };

    // Plain mean over course final grades, same as the dashboard banner.
    let overall_average = if courses.is_empty() {
        0.0
    } else {
        let sum: f64 = courses.iter().map(|c| c.final_grade).sum();
        grading::round2(sum / courses.len() as f64)
    };

    ok(
        &req.id,
        json!({
            "student": student,
            "generatedAt": now_rfc3339(),
            "courses": courses,
            "overallAverage": overall_average,
            "gradingScale": grading_scale()
        }),
    )
}

fn handle_reports_evaluations_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = req
        .params
        .get("scope")
        .and_then(|v| v.as_str())
        .unwrap_or("all")
        .to_ascii_lowercase();

    let owned;
    let filter: Option<(&str, &str)> = match scope.as_str() {
        "all" => None,
        "student" => {
            owned = match required_trimmed_str(req, "studentId") {
                Ok(v) => v,
                Err(e) => return e,
            };
            Some(("student_id", owned.as_str()))
        }
        "teacher" => {
            owned = match required_trimmed_str(req, "teacherId") {
                Ok(v) => v,
                Err(e) => return e,
            };
            Some(("teacher_id", owned.as_str()))
        }
        other => {
            return err(
                &req.id,
                "bad_params",
                "scope must be one of: student, teacher, all",
                Some(json!({ "scope": other })),
            )
        }
    };

    match evaluations::query_evaluations(conn, filter) {
        Ok(rows) => ok(
            &req.id,
            json!({
                "scope": scope,
                "generatedAt": now_rfc3339(),
                "evaluations": rows
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.gradesheetModel" => Some(handle_reports_gradesheet_model(state, req)),
        "reports.evaluationsModel" => Some(handle_reports_evaluations_model(state, req)),
        _ => None,
    }
}
