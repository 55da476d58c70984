use crate::calc::{
    self, annual_points, annual_score, annual_status_band, cohort_trimester_average,
    current_trimester, grade_status_color, trimester_grade, AnnualBand, Subject,
};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::recovery::{min_recovery_grade, needs_recovery, simulate_final_grade};
use serde_json::json;

fn trimester_panels(subject: &Subject) -> serde_json::Map<String, serde_json::Value> {
    let mut panels = serde_json::Map::new();
    for (i, trimester) in subject.trimesters.iter().enumerate() {
        let grade = trimester_grade(&trimester.evaluations);
        panels.insert(
            (i + 1).to_string(),
            json!({
                "grade": grade,
                "color": grade_status_color(grade),
                "evaluations": &trimester.evaluations
            }),
        );
    }
    panels
}

fn handle_subject_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let subject = match db::load_subject(conn, &subject_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let score = annual_score(&subject);
    let points = annual_points(&subject);
    let needs = needs_recovery(points);

    ok(
        &req.id,
        json!({
            "subject": {
                "id": subject.id,
                "name": subject.name,
                "colorTag": subject.color_tag
            },
            "trimesters": trimester_panels(&subject),
            "annualScore": score,
            "annualPoints": points,
            "band": annual_status_band(points),
            "needsRecovery": needs,
            "minRecoveryGrade": min_recovery_grade(points),
            "pointsMissing": (calc::PASSING_POINTS - points).max(0.0)
        }),
    )
}

fn handle_dashboard_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subjects = match db::load_subjects(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let today = chrono::Local::now().date_naive();
    let trimester_now = current_trimester(today);
    let trimester_average = cohort_trimester_average(&subjects, trimester_now);

    let mut total_annual_points = 0.0;
    let mut approved = 0_i64;
    let mut alert = 0_i64;
    let mut critical = 0_i64;
    let mut per_subject = Vec::with_capacity(subjects.len());

    for subject in &subjects {
        let points = annual_points(subject);
        total_annual_points += points;
        let band = annual_status_band(points);
        match band {
            AnnualBand::Approved => approved += 1,
            AnnualBand::Alert => alert += 1,
            AnnualBand::Critical => critical += 1,
        }
        per_subject.push(json!({
            "subjectId": subject.id,
            "name": subject.name,
            "colorTag": subject.color_tag,
            "annualPoints": points,
            "band": band
        }));
    }

    let trimester_averages: Vec<Option<f64>> = (1..=3)
        .map(|n| cohort_trimester_average(&subjects, n))
        .collect();

    ok(
        &req.id,
        json!({
            "subjectCount": subjects.len(),
            "currentTrimester": trimester_now,
            "trimesterAverage": trimester_average,
            "trimesterAverageColor": grade_status_color(trimester_average),
            "totalAnnualPoints": total_annual_points,
            "statusCounts": {
                "approved": approved,
                "alert": alert,
                "critical": critical
            },
            "perSubject": per_subject,
            "trimesterAverages": trimester_averages
        }),
    )
}

fn handle_recovery_simulate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let recovery_grade = match req.params.get("recoveryGrade").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid recoveryGrade", None),
    };
    // The blend itself does not clamp, so out-of-range input is rejected here.
    if !(0.0..=100.0).contains(&recovery_grade) {
        return err(
            &req.id,
            "bad_params",
            "recoveryGrade must be between 0 and 100",
            Some(json!({ "recoveryGrade": recovery_grade })),
        );
    }

    let subject = match db::load_subject(conn, &subject_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let points = annual_points(&subject);
    let simulated = simulate_final_grade(points, recovery_grade);

    ok(
        &req.id,
        json!({
            "annualPoints": points,
            "simulatedFinalGrade": simulated,
            "approved": simulated >= calc::GREEN_MIN,
            "color": grade_status_color(Some(simulated))
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.subjectSummary" => Some(handle_subject_summary(state, req)),
        "calc.dashboardSummary" => Some(handle_dashboard_summary(state, req)),
        "recovery.simulate" => Some(handle_recovery_simulate(state, req)),
        _ => None,
    }
}
