use crate::grading;
use crate::ipc::error::{grading_err, ok};
use crate::ipc::helpers::{db_conn, required_trimmed_str, user_role};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_grades_course_grades(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_trimmed_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = user_role(conn, req, &student_id) {
        return e;
    }

    match grading::student_course_grades(conn, &student_id) {
        Ok(courses) => ok(
            &req.id,
            json!({ "studentId": student_id, "courses": courses }),
        ),
        Err(e) => grading_err(&req.id, e),
    }
}

fn handle_grades_final_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = user_role(conn, req, &student_id) {
        return e;
    }

    match grading::student_course_grade(conn, &student_id, &course_id) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => grading_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.courseGrades" => Some(handle_grades_course_grades(state, req)),
        "grades.finalGrade" => Some(handle_grades_final_grade(state, req)),
        _ => None,
    }
}
