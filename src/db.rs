use rusqlite::Connection;
use std::path::Path;

use crate::calc::{Evaluation, Subject, Trimester};

pub const DB_FILE_NAME: &str = "gradetrack.sqlite3";

/// Weight assumed for evaluation rows imported from the schema version that
/// had no weighting field. Applied when loading, never written back.
pub const LEGACY_DEFAULT_MAX_VALUE: f64 = 100.0;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            color_tag TEXT NOT NULL DEFAULT 'blue'
        )",
        [],
    )?;

    // Existing workspaces may predate the color_tag column. Add it if needed.
    ensure_subjects_color_tag(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            trimester INTEGER NOT NULL,
            idx INTEGER NOT NULL,
            name TEXT NOT NULL,
            max_value REAL,
            earned_grade REAL NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(subject_id, trimester, idx)
        )",
        [],
    )?;

    // v0 workspaces stored evaluations without a weighting column.
    // max_value stays NULL for those rows; readers apply the default.
    ensure_evaluations_max_value(&conn)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_subject ON evaluations(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_subject_trimester
         ON evaluations(subject_id, trimester, idx)",
        [],
    )?;

    Ok(conn)
}

fn ensure_subjects_color_tag(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "subjects", "color_tag")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE subjects ADD COLUMN color_tag TEXT NOT NULL DEFAULT 'blue'",
        [],
    )?;
    Ok(())
}

fn ensure_evaluations_max_value(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "evaluations", "max_value")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE evaluations ADD COLUMN max_value REAL", [])?;
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

/// Full nested snapshot for one subject, evaluations in insertion order.
/// This is the single place the legacy max_value default is applied.
pub fn load_subject(conn: &Connection, subject_id: &str) -> anyhow::Result<Option<Subject>> {
    let mut stmt = conn.prepare("SELECT id, name, color_tag FROM subjects WHERE id = ?")?;
    let mut rows = stmt.query([subject_id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut subject = Subject {
        id: row.get(0)?,
        name: row.get(1)?,
        color_tag: row.get(2)?,
        trimesters: [Trimester::default(), Trimester::default(), Trimester::default()],
    };

    let mut ev_stmt = conn.prepare(
        "SELECT id, trimester, name, max_value, earned_grade
         FROM evaluations
         WHERE subject_id = ?
         ORDER BY trimester, idx",
    )?;
    let evaluations = ev_stmt
        .query_map([subject_id], |r| {
            let trimester: i64 = r.get(1)?;
            Ok((
                trimester,
                Evaluation {
                    id: r.get(0)?,
                    name: r.get(2)?,
                    max_value: r
                        .get::<_, Option<f64>>(3)?
                        .unwrap_or(LEGACY_DEFAULT_MAX_VALUE),
                    earned_grade: r.get(4)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (trimester, evaluation) in evaluations {
        if let Some(slot) = crate::calc::trimester_index(trimester) {
            subject.trimesters[slot].evaluations.push(evaluation);
        }
    }

    Ok(Some(subject))
}

/// All subjects with their nested evaluations, ordered by name.
pub fn load_subjects(conn: &Connection) -> anyhow::Result<Vec<Subject>> {
    let mut stmt = conn.prepare("SELECT id FROM subjects ORDER BY name")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut subjects = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(s) = load_subject(conn, &id)? {
            subjects.push(s);
        }
    }
    Ok(subjects)
}
