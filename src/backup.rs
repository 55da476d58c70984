use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::calendar::EVENTS_FILE_NAME;
use crate::db::DB_FILE_NAME;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/gradetrack.sqlite3";
const EVENTS_ENTRY: &str = "events/events.json";
pub const BUNDLE_FORMAT_V1: &str = "gradetrack-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub events_restored: bool,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;

    let events_path = workspace_path.join(EVENTS_FILE_NAME);
    let events_bytes = if events_path.is_file() {
        Some(std::fs::read(&events_path).with_context(|| {
            format!(
                "failed to read event store {}",
                events_path.to_string_lossy()
            )
        })?)
    } else {
        None
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let mut digests = serde_json::Map::new();
    digests.insert(DB_ENTRY.to_string(), json!(sha256_hex(&db_bytes)));
    if let Some(bytes) = &events_bytes {
        digests.insert(EVENTS_ENTRY.to_string(), json!(sha256_hex(bytes)));
    }
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "digests": digests,
    });

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;

    let mut entry_count = 2;
    if let Some(bytes) = &events_bytes {
        zip.start_file(EVENTS_ENTRY, opts)
            .context("failed to start event-store entry")?;
        zip.write_all(bytes)
            .context("failed to write event-store entry")?;
        entry_count += 1;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count,
    })
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let db_bytes = read_entry(&mut archive, DB_ENTRY)?
        .ok_or_else(|| anyhow!("bundle missing {}", DB_ENTRY))?;
    verify_digest(&manifest, DB_ENTRY, &db_bytes)?;

    let events_bytes = read_entry(&mut archive, EVENTS_ENTRY)?;
    if let Some(bytes) = &events_bytes {
        verify_digest(&manifest, EVENTS_ENTRY, bytes)?;
    }

    // Stage each file next to its destination, then rename into place so a
    // failed import never leaves a half-written workspace.
    replace_file(&workspace_path.join(DB_FILE_NAME), &db_bytes)?;
    let events_restored = match &events_bytes {
        Some(bytes) => {
            replace_file(&workspace_path.join(EVENTS_FILE_NAME), bytes)?;
            true
        }
        None => false,
    };

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        events_restored,
    })
}

fn read_entry(
    archive: &mut ZipArchive<File>,
    name: &str,
) -> anyhow::Result<Option<Vec<u8>>> {
    let mut entry = match archive.by_name(name) {
        Ok(e) => e,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to open bundle entry {}", name)),
    };
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to read bundle entry {}", name))?;
    Ok(Some(bytes))
}

fn verify_digest(
    manifest: &serde_json::Value,
    entry: &str,
    bytes: &[u8],
) -> anyhow::Result<()> {
    let expected = manifest
        .get("digests")
        .and_then(|d| d.get(entry))
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest missing digest for {}", entry))?;
    let actual = sha256_hex(bytes);
    if expected != actual {
        return Err(anyhow!(
            "digest mismatch for {}: manifest {} actual {}",
            entry,
            expected,
            actual
        ));
    }
    Ok(())
}

fn replace_file(dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = dst.with_extension("importing");
    if tmp.exists() {
        let _ = std::fs::remove_file(&tmp);
    }
    let mut out = File::create(&tmp)
        .with_context(|| format!("failed to create temp file {}", tmp.to_string_lossy()))?;
    out.write_all(bytes)
        .with_context(|| format!("failed to write {}", tmp.to_string_lossy()))?;
    out.flush()
        .with_context(|| format!("failed to flush {}", tmp.to_string_lossy()))?;
    drop(out);

    if dst.exists() {
        std::fs::remove_file(dst)
            .with_context(|| format!("failed to remove existing {}", dst.to_string_lossy()))?;
    }
    std::fs::rename(&tmp, dst)
        .with_context(|| format!("failed to move file into place at {}", dst.to_string_lossy()))?;
    Ok(())
}
