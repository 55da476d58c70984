use crate::calc::{trimester_index, TRIMESTER_WEIGHT_BUDGET};
use crate::db::LEGACY_DEFAULT_MAX_VALUE;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Weight assigned when a create request omits maxValue.
const DEFAULT_MAX_VALUE: f64 = 100.0;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn parse_trimester(req: &Request) -> Result<i64, HandlerErr> {
    let number = req
        .params
        .get("trimester")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing/invalid trimester".to_string(),
            details: None,
        })?;
    if trimester_index(number).is_none() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "trimester must be 1, 2 or 3".to_string(),
            details: Some(json!({ "trimester": number })),
        });
    }
    Ok(number)
}

fn validate_grade_bounds(earned_grade: f64, max_value: f64) -> Result<(), HandlerErr> {
    if max_value < 0.0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "maxValue must be >= 0".to_string(),
            details: Some(json!({ "maxValue": max_value })),
        });
    }
    if earned_grade < 0.0 || earned_grade > max_value {
        return Err(HandlerErr {
            code: "bad_params",
            message: "earnedGrade must be between 0 and maxValue".to_string(),
            details: Some(json!({
                "earnedGrade": earned_grade,
                "maxValue": max_value
            })),
        });
    }
    Ok(())
}

/// Summed weight already present in a trimester. Legacy rows with a NULL
/// weight count at the default, the same way the grade formulas see them.
fn trimester_weight_total(
    conn: &Connection,
    subject_id: &str,
    trimester: i64,
    exclude_evaluation_id: Option<&str>,
) -> Result<f64, HandlerErr> {
    let map_err = |e: rusqlite::Error| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    };
    match exclude_evaluation_id {
        Some(excluded) => conn
            .query_row(
                "SELECT COALESCE(SUM(COALESCE(max_value, ?)), 0)
                 FROM evaluations
                 WHERE subject_id = ? AND trimester = ? AND id != ?",
                (LEGACY_DEFAULT_MAX_VALUE, subject_id, trimester, excluded),
                |r| r.get(0),
            )
            .map_err(map_err),
        None => conn
            .query_row(
                "SELECT COALESCE(SUM(COALESCE(max_value, ?)), 0)
                 FROM evaluations
                 WHERE subject_id = ? AND trimester = ?",
                (LEGACY_DEFAULT_MAX_VALUE, subject_id, trimester),
                |r| r.get(0),
            )
            .map_err(map_err),
    }
}

fn check_weight_budget(current_total: f64, attempted: f64) -> Result<(), HandlerErr> {
    if current_total + attempted > TRIMESTER_WEIGHT_BUDGET {
        return Err(HandlerErr {
            code: "bad_params",
            message: "trimester weight budget exceeded".to_string(),
            details: Some(json!({
                "budget": TRIMESTER_WEIGHT_BUDGET,
                "currentTotal": current_total,
                "attempted": attempted
            })),
        });
    }
    Ok(())
}

fn handle_evaluations_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let trimester = match parse_trimester(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let earned_grade = match req.params.get("earnedGrade").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid earnedGrade", None),
    };
    let max_value = match req.params.get("maxValue") {
        None => DEFAULT_MAX_VALUE,
        Some(v) => match v.as_f64() {
            Some(n) => n,
            None => return err(&req.id, "bad_params", "maxValue must be a number", None),
        },
    };

    match subject_exists(conn, &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return e.response(&req.id),
    }
    if let Err(e) = validate_grade_bounds(earned_grade, max_value) {
        return e.response(&req.id);
    }
    let current_total = match trimester_weight_total(conn, &subject_id, trimester, None) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = check_weight_budget(current_total, max_value) {
        return e.response(&req.id);
    }

    let idx: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(idx) + 1, 0) FROM evaluations WHERE subject_id = ? AND trimester = ?",
        (&subject_id, trimester),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let evaluation_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO evaluations(id, subject_id, trimester, idx, name, max_value, earned_grade)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &evaluation_id,
            &subject_id,
            trimester,
            idx,
            &name,
            max_value,
            earned_grade,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "evaluations" })),
        );
    }

    ok(&req.id, json!({ "evaluationId": evaluation_id }))
}

fn handle_evaluations_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let trimester = match parse_trimester(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let evaluation_id = match req.params.get("evaluationId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing evaluationId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let current: Option<(String, Option<f64>, f64)> = match conn
        .query_row(
            "SELECT name, max_value, earned_grade
             FROM evaluations
             WHERE id = ? AND subject_id = ? AND trimester = ?",
            (&evaluation_id, &subject_id, trimester),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((stored_name, stored_max, stored_earned)) = current else {
        return err(&req.id, "not_found", "evaluation not found", None);
    };

    let mut new_name: Option<String> = None;
    let mut new_max: Option<f64> = None;
    let mut new_earned: Option<f64> = None;

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let t = s.trim().to_string();
        if t.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        new_name = Some(t);
    }
    if let Some(v) = patch.get("maxValue") {
        let Some(n) = v.as_f64() else {
            return err(&req.id, "bad_params", "patch.maxValue must be a number", None);
        };
        new_max = Some(n);
    }
    if let Some(v) = patch.get("earnedGrade") {
        let Some(n) = v.as_f64() else {
            return err(
                &req.id,
                "bad_params",
                "patch.earnedGrade must be a number",
                None,
            );
        };
        new_earned = Some(n);
    }

    if new_name.is_none() && new_max.is_none() && new_earned.is_none() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    // Validate against the row as it will be after the patch.
    let effective_max = new_max.unwrap_or(stored_max.unwrap_or(LEGACY_DEFAULT_MAX_VALUE));
    let effective_earned = new_earned.unwrap_or(stored_earned);
    if let Err(e) = validate_grade_bounds(effective_earned, effective_max) {
        return e.response(&req.id);
    }
    if let Some(max) = new_max {
        let others_total =
            match trimester_weight_total(conn, &subject_id, trimester, Some(&evaluation_id)) {
                Ok(v) => v,
                Err(e) => return e.response(&req.id),
            };
        if let Err(e) = check_weight_budget(others_total, max) {
            return e.response(&req.id);
        }
    }

    let name = new_name.unwrap_or(stored_name);
    // A patched weight is stored explicitly; an untouched legacy NULL stays.
    let max_value = new_max.or(stored_max);
    let changed = match conn.execute(
        "UPDATE evaluations SET name = ?, max_value = ?, earned_grade = ?
         WHERE id = ? AND subject_id = ? AND trimester = ?",
        (
            &name,
            max_value,
            effective_earned,
            &evaluation_id,
            &subject_id,
            trimester,
        ),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "evaluations" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "evaluation not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_evaluations_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let trimester = match parse_trimester(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let evaluation_id = match req.params.get("evaluationId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing evaluationId", None),
    };

    let idx: Option<i64> = match conn
        .query_row(
            "SELECT idx FROM evaluations WHERE id = ? AND subject_id = ? AND trimester = ?",
            (&evaluation_id, &subject_id, trimester),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(idx) = idx else {
        return err(&req.id, "not_found", "evaluation not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM evaluations WHERE id = ?",
        [&evaluation_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "evaluations" })),
        );
    }

    // Re-pack the display order behind the removed row (ascending keeps the
    // UNIQUE(subject_id, trimester, idx) constraint satisfied at every step).
    let rows: Vec<(String, i64)> = {
        let mut stmt = match tx.prepare(
            "SELECT id, idx FROM evaluations
             WHERE subject_id = ? AND trimester = ? AND idx > ?
             ORDER BY idx ASC",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map((&subject_id, trimester, idx), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };
    for (eid, cur_idx) in rows {
        if let Err(e) = tx.execute(
            "UPDATE evaluations SET idx = ? WHERE id = ?",
            (cur_idx - 1, &eid),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "evaluations" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.add" => Some(handle_evaluations_add(state, req)),
        "evaluations.update" => Some(handle_evaluations_update(state, req)),
        "evaluations.delete" => Some(handle_evaluations_delete(state, req)),
        _ => None,
    }
}
