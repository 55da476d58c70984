use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::legacy;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn handle_subjects_import_legacy(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let path = match req.params.get("path").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing path", None),
    };

    let parsed = match legacy::parse_legacy_export(&path) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "import_failed", format!("{e:?}"), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut subjects_imported = 0_i64;
    let mut evaluations_imported = 0_i64;

    for subject in &parsed {
        let subject_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO subjects(id, name) VALUES(?, ?)",
            (&subject_id, &subject.name),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "subjects" })),
            );
        }
        subjects_imported += 1;

        for (slot, evaluations) in subject.trimesters.iter().enumerate() {
            let trimester = (slot + 1) as i64;
            for (idx, evaluation) in evaluations.iter().enumerate() {
                // max_value stays NULL for records from the schema version
                // without a weighting field; readers apply the default.
                if let Err(e) = tx.execute(
                    "INSERT INTO evaluations(
                       id, subject_id, trimester, idx, name, max_value, earned_grade
                     ) VALUES(?, ?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        &subject_id,
                        trimester,
                        idx as i64,
                        &evaluation.name,
                        evaluation.max_value,
                        evaluation.earned_grade,
                    ),
                ) {
                    let _ = tx.rollback();
                    return err(
                        &req.id,
                        "db_insert_failed",
                        e.to_string(),
                        Some(json!({ "table": "evaluations" })),
                    );
                }
                evaluations_imported += 1;
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(subjects_imported, evaluations_imported, "legacy export imported");
    ok(
        &req.id,
        json!({
            "subjectsImported": subjects_imported,
            "evaluationsImported": evaluations_imported
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.importLegacy" => Some(handle_subjects_import_legacy(state, req)),
        _ => None,
    }
}
