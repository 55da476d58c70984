use crate::calendar::{self, ExamEvent};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn workspace_path(state: &AppState) -> Option<PathBuf> {
    state.workspace.clone()
}

fn handle_events_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = workspace_path(state) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match calendar::load_events(&workspace) {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "io_failed", format!("{e:?}"), None),
    }
}

fn handle_events_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = workspace_path(state) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let date = match req.params.get("date").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing date", None),
    };
    if calendar::parse_event_date(&date).is_none() {
        return err(
            &req.id,
            "bad_params",
            "date must be an ISO date (YYYY-MM-DD)",
            Some(json!({ "date": date })),
        );
    }
    // Not checked against the subjects table: the reference is weak and the
    // event outlives its subject.
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let content = match req.params.get("content").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing content", None),
    };
    let class_number = req
        .params
        .get("classNumber")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .unwrap_or_default();

    let mut events = match calendar::load_events(&workspace) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "io_failed", format!("{e:?}"), None),
    };

    let event_id = Uuid::new_v4().to_string();
    events.push(ExamEvent {
        id: event_id.clone(),
        date,
        subject_id,
        content,
        class_number,
    });

    if let Err(e) = calendar::save_events(&workspace, &events) {
        return err(&req.id, "io_failed", format!("{e:?}"), None);
    }

    ok(&req.id, json!({ "eventId": event_id }))
}

fn handle_events_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = workspace_path(state) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let event_id = match req.params.get("eventId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing eventId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut events = match calendar::load_events(&workspace) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "io_failed", format!("{e:?}"), None),
    };
    let Some(event) = events.iter_mut().find(|e| e.id == event_id) else {
        return err(&req.id, "not_found", "event not found", None);
    };

    if let Some(v) = patch.get("date") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.date must be a string", None);
        };
        let t = s.trim().to_string();
        if calendar::parse_event_date(&t).is_none() {
            return err(
                &req.id,
                "bad_params",
                "date must be an ISO date (YYYY-MM-DD)",
                Some(json!({ "date": t })),
            );
        }
        event.date = t;
    }
    if let Some(v) = patch.get("subjectId") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.subjectId must be a string", None);
        };
        let t = s.trim().to_string();
        if t.is_empty() {
            return err(&req.id, "bad_params", "subjectId must not be empty", None);
        }
        event.subject_id = t;
    }
    if let Some(v) = patch.get("content") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.content must be a string", None);
        };
        let t = s.trim().to_string();
        if t.is_empty() {
            return err(&req.id, "bad_params", "content must not be empty", None);
        }
        event.content = t;
    }
    if let Some(v) = patch.get("classNumber") {
        let Some(s) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                "patch.classNumber must be a string",
                None,
            );
        };
        event.class_number = s.trim().to_string();
    }

    if let Err(e) = calendar::save_events(&workspace, &events) {
        return err(&req.id, "io_failed", format!("{e:?}"), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_events_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = workspace_path(state) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let event_id = match req.params.get("eventId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing eventId", None),
    };

    let mut events = match calendar::load_events(&workspace) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "io_failed", format!("{e:?}"), None),
    };
    let before = events.len();
    events.retain(|e| e.id != event_id);
    if events.len() == before {
        return err(&req.id, "not_found", "event not found", None);
    }

    if let Err(e) = calendar::save_events(&workspace, &events) {
        return err(&req.id, "io_failed", format!("{e:?}"), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.list" => Some(handle_events_list(state, req)),
        "events.create" => Some(handle_events_create(state, req)),
        "events.update" => Some(handle_events_update(state, req)),
        "events.delete" => Some(handle_events_delete(state, req)),
        _ => None,
    }
}
