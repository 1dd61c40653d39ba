use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("bulletin.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level TEXT NOT NULL,
            titulaire TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    ensure_classes_titulaire(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            student_no TEXT,
            birth_date TEXT,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS section_classes(
            section_id TEXT NOT NULL,
            level TEXT NOT NULL,
            PRIMARY KEY(section_id, level),
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_section_classes_level ON section_classes(level)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            max_period1 REAL NOT NULL DEFAULT 0,
            max_period2 REAL NOT NULL DEFAULT 0,
            max_exam1 REAL NOT NULL DEFAULT 0,
            max_sem1_total REAL NOT NULL DEFAULT 0,
            max_period3 REAL NOT NULL DEFAULT 0,
            max_period4 REAL NOT NULL DEFAULT 0,
            max_exam2 REAL NOT NULL DEFAULT 0,
            max_sem2_total REAL NOT NULL DEFAULT 0,
            max_general_total REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(section_id) REFERENCES sections(id),
            UNIQUE(section_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_section ON subjects(section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_rows(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            period1 REAL,
            period2 REAL,
            exam1 REAL,
            period3 REAL,
            period4 REAL,
            exam2 REAL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_rows_class ON grade_rows(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_rows_student ON grade_rows(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS devoirs(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            title TEXT NOT NULL,
            kind TEXT NOT NULL,
            max_points REAL NOT NULL,
            due_date TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_devoirs_class ON devoirs(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS devoir_scores(
            id TEXT PRIMARY KEY,
            devoir_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            points REAL,
            status TEXT NOT NULL,
            remark TEXT,
            FOREIGN KEY(devoir_id) REFERENCES devoirs(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(devoir_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_devoir_scores_devoir ON devoir_scores(devoir_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_slots(
            class_id TEXT NOT NULL,
            day TEXT NOT NULL,
            slot_index INTEGER NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            subject_name TEXT,
            teacher TEXT,
            PRIMARY KEY(class_id, day, slot_index),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bulletin_seals(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            year_label TEXT NOT NULL,
            code TEXT NOT NULL,
            sealed_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(class_id, student_id, year_label)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        None => Ok(None),
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
    }
}

fn ensure_classes_titulaire(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate the homeroom-teacher column.
    if table_has_column(conn, "classes", "titulaire")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE classes ADD COLUMN titulaire TEXT", [])?;
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
