use crate::backup;
use crate::db;
use crate::grading;
use crate::ipc::error::{err, grading_err, ok};
use crate::ipc::helpers::{course_exists, db_conn, required_trimmed_str, user_role};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_avg(avg: Option<f64>) -> String {
    avg.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

fn out_path_param(req: &Request) -> Result<PathBuf, serde_json::Value> {
    let raw = required_trimmed_str(req, "outPath")?;
    Ok(PathBuf::from(raw))
}

fn write_csv(req: &Request, out: &PathBuf, csv: String) -> Result<(), serde_json::Value> {
    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return Err(err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out.to_string_lossy() })),
            ));
        }
    }
    if let Err(e) = std::fs::write(out, csv) {
        return Err(err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out.to_string_lossy() })),
        ));
    }
    Ok(())
}

fn handle_exchange_export_gradesheet_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_trimmed_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out = match out_path_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = user_role(conn, req, &student_id) {
        return e;
    }

    let rows = match grading::student_course_grades(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return grading_err(&req.id, e),
    };

    let mut csv = String::from(
        "course,teacher,participation_avg,homework_avg,exam_avg,project_avg,quiz_avg,final_grade\n",
    );
    let rows_exported = rows.len();
    for row in rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{:.2}\n",
            csv_quote(&row.course_name),
            csv_quote(row.teacher_name.as_deref().unwrap_or("")),
            csv_avg(row.averages.participation),
            csv_avg(row.averages.homework),
            csv_avg(row.averages.exam),
            csv_avg(row.averages.project),
            csv_avg(row.averages.quiz),
            row.final_grade
        ));
    }

    if let Err(e) = write_csv(req, &out, csv) {
        return e;
    }

    ok(
        &req.id,
        json!({ "ok": true, "rowsExported": rows_exported, "path": out.to_string_lossy() }),
    )
}

fn handle_exchange_export_course_evaluations_csv(
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
    let out = match out_path_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = course_exists(conn, req, &course_id) {
        return e;
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name, e.subject, e.evaluation_type, e.score, e.feedback, e.created_at
         FROM evaluations e
         JOIN users s ON s.id = e.student_id
         WHERE e.course_id = ?
         ORDER BY s.name, e.created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([&course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut csv = String::from(
        "student_id,student_name,subject,evaluation_type,score,feedback,created_at\n",
    );
    let rows_exported = rows.len();
    for (student_id, student_name, subject, kind, score, feedback, created_at) in rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            csv_quote(&student_id),
            csv_quote(&student_name),
            csv_quote(&subject),
            csv_quote(&kind),
            score,
            csv_quote(feedback.as_deref().unwrap_or("")),
            csv_quote(created_at.as_deref().unwrap_or(""))
        ));
    }

    if let Err(e) = write_csv(req, &out, csv) {
        return e;
    }

    ok(
        &req.id,
        json!({ "ok": true, "rowsExported": rows_exported, "path": out.to_string_lossy() }),
    )
}

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256
        }),
    )
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }
    if let Err(e) = std::fs::create_dir_all(&workspace_path) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": workspace_path.to_string_lossy() })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            )
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exchange.exportGradesheetCsv" => Some(handle_exchange_export_gradesheet_csv(state, req)),
        "exchange.exportCourseEvaluationsCsv" => {
            Some(handle_exchange_export_course_evaluations_csv(state, req))
        }
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        _ => None,
    }
}
