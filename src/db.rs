use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL CHECK(role IN ('admin', 'teacher', 'student')),
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            teacher_id TEXT,
            created_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_teacher ON courses(teacher_id)",
        [],
    )?;

    // One row per course; weights are integer percentages intended to sum
    // to 100. The sum invariant is enforced by rules.update, not storage.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_grading_rules(
            course_id TEXT PRIMARY KEY,
            participation_weight INTEGER NOT NULL DEFAULT 20,
            homework_weight INTEGER NOT NULL DEFAULT 40,
            exam_weight INTEGER NOT NULL DEFAULT 40,
            project_weight INTEGER NOT NULL DEFAULT 0,
            quiz_weight INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    ensure_rules_updated_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_enrollments(
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            enrolled_at TEXT,
            PRIMARY KEY(student_id, course_id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_enrollments_course ON course_enrollments(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_enrollments_student ON course_enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            evaluation_type TEXT NOT NULL
                CHECK(evaluation_type IN ('participation', 'homework', 'exam', 'project', 'quiz')),
            score INTEGER NOT NULL CHECK(score >= 0 AND score <= 100),
            feedback TEXT,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    ensure_evaluations_feedback(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_student ON evaluations(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_teacher ON evaluations(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_course ON evaluations(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_course_student ON evaluations(course_id, student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_rules_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "course_grading_rules", "updated_at")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE course_grading_rules ADD COLUMN updated_at TEXT",
        [],
    )?;
    Ok(())
}

fn ensure_evaluations_feedback(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "evaluations", "feedback")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE evaluations ADD COLUMN feedback TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
