use anyhow::Context;
use std::path::Path;

/// Parsed records from a grade export of the previous dashboard generation.
///
/// That version spoke Portuguese on the wire (`nome`/`nota`, subjects under
/// `trimestres.N.avaliacoes`) and had no weighting field; a late revision
/// added optional `valorMaximo`. Grades frequently arrive as numeric strings
/// because the old UI never normalized its form input.
pub struct ParsedLegacySubject {
    pub name: String,
    pub trimesters: [Vec<ParsedLegacyEvaluation>; 3],
}

pub struct ParsedLegacyEvaluation {
    pub name: String,
    pub earned_grade: f64,
    /// None for records predating the weighting field.
    pub max_value: Option<f64>,
}

pub fn parse_legacy_export(path: &Path) -> anyhow::Result<Vec<ParsedLegacySubject>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let root: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.to_string_lossy()))?;
    let Some(entries) = root.as_array() else {
        anyhow::bail!("legacy export must be a JSON array of subjects");
    };

    let mut subjects = Vec::new();
    for entry in entries {
        let Some(subject) = parse_subject(entry) else {
            continue;
        };
        subjects.push(subject);
    }
    Ok(subjects)
}

fn parse_subject(entry: &serde_json::Value) -> Option<ParsedLegacySubject> {
    let obj = entry.as_object()?;
    let name = obj.get("nome")?.as_str()?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let mut trimesters: [Vec<ParsedLegacyEvaluation>; 3] = Default::default();
    if let Some(map) = obj.get("trimestres").and_then(|v| v.as_object()) {
        for (number, slot) in [("1", 0_usize), ("2", 1), ("3", 2)] {
            let Some(list) = map
                .get(number)
                .and_then(|t| t.get("avaliacoes"))
                .and_then(|v| v.as_array())
            else {
                continue;
            };
            for raw in list {
                if let Some(parsed) = parse_evaluation(raw) {
                    trimesters[slot].push(parsed);
                }
            }
        }
    }

    Some(ParsedLegacySubject { name, trimesters })
}

fn parse_evaluation(raw: &serde_json::Value) -> Option<ParsedLegacyEvaluation> {
    let obj = raw.as_object()?;
    let name = obj.get("nome")?.as_str()?.trim().to_string();
    if name.is_empty() {
        return None;
    }
    let earned_grade = parse_number(obj.get("nota")?)?;
    let max_value = obj.get("valorMaximo").and_then(parse_number);
    Some(ParsedLegacyEvaluation {
        name,
        earned_grade,
        max_value,
    })
}

fn parse_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
