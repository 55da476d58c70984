use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const EVENTS_FILE_NAME: &str = "events.json";

/// One exam-calendar entry. `subject_id` is a weak reference: the subject it
/// points at may have been deleted since, and the event outlives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamEvent {
    pub id: String,
    pub date: String,
    pub subject_id: String,
    pub content: String,
    pub class_number: String,
}

pub fn events_path(workspace: &Path) -> PathBuf {
    workspace.join(EVENTS_FILE_NAME)
}

pub fn parse_event_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Reads the whole event list; a missing file is an empty calendar.
/// Events come back ordered by date, ties broken by id.
pub fn load_events(workspace: &Path) -> anyhow::Result<Vec<ExamEvent>> {
    let path = events_path(workspace);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let mut events: Vec<ExamEvent> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid event list", path.to_string_lossy()))?;
    // ISO dates sort lexicographically.
    events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    Ok(events)
}

/// Rewrites the whole event list. Writes to a sibling temp file first so a
/// crash mid-write never leaves a truncated calendar behind.
pub fn save_events(workspace: &Path, events: &[ExamEvent]) -> anyhow::Result<()> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let path = events_path(workspace);
    let tmp = workspace.join(format!("{}.writing", EVENTS_FILE_NAME));

    let text = serde_json::to_string_pretty(events).context("failed to serialize event list")?;
    std::fs::write(&tmp, text)
        .with_context(|| format!("failed to write {}", tmp.to_string_lossy()))?;
    std::fs::rename(&tmp, &path).with_context(|| {
        format!(
            "failed to move event list into place at {}",
            path.to_string_lossy()
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn event(id: &str, date: &str) -> ExamEvent {
        ExamEvent {
            id: id.to_string(),
            date: date.to_string(),
            subject_id: "subject-1".to_string(),
            content: "chapters 3-4".to_string(),
            class_number: "8B".to_string(),
        }
    }

    #[test]
    fn missing_file_is_an_empty_calendar() {
        let workspace = temp_workspace("gradetrack-events-empty");
        assert!(load_events(&workspace).expect("load").is_empty());
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn round_trip_orders_by_date() {
        let workspace = temp_workspace("gradetrack-events-order");
        save_events(
            &workspace,
            &[
                event("b", "2026-03-10"),
                event("a", "2026-01-05"),
                event("c", "2026-01-05"),
            ],
        )
        .expect("save");

        let loaded = load_events(&workspace).expect("load");
        let ids: Vec<&str> = loaded.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "b"]);

        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn date_parser_accepts_iso_only() {
        assert!(parse_event_date("2026-02-28").is_some());
        assert!(parse_event_date(" 2026-02-28 ").is_some());
        assert!(parse_event_date("2026-02-30").is_none());
        assert!(parse_event_date("28/02/2026").is_none());
        assert!(parse_event_date("").is_none());
    }
}
