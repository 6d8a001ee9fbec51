use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BUNDLE_FORMAT: &str = "schooldesk-workspace-v1";

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_FILE: &str = "schooldesk.sqlite3";
const DB_ENTRY: &str = "db/schooldesk.sqlite3";

/// Everything but `format` is optional on the way in, so manifests written by
/// older builds still parse.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleManifest {
    format: String,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    app_version: String,
    #[serde(default)]
    exported_at: u64,
    #[serde(default)]
    db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct BundleExport {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct BundleImport {
    pub bundle_format_detected: String,
}

fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<BundleExport> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create directory {}", parent.to_string_lossy()))?;
    }

    // The whole file goes through memory so the manifest checksum describes
    // exactly the bytes written to the archive.
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("cannot read database {}", db_path.to_string_lossy()))?;
    let db_sha256 = digest_hex(&db_bytes);

    let manifest = BundleManifest {
        format: BUNDLE_FORMAT.to_string(),
        version: 1,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        db_sha256: db_sha256.clone(),
    };
    let manifest_text =
        serde_json::to_string_pretty(&manifest).context("cannot serialize manifest")?;

    let out_file = File::create(out_path)
        .with_context(|| format!("cannot create bundle file {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("cannot start manifest entry")?;
    zip.write_all(manifest_text.as_bytes())
        .context("cannot write manifest entry")?;
    zip.start_file(DB_ENTRY, opts)
        .context("cannot start database entry")?;
    zip.write_all(&db_bytes)
        .context("cannot write database entry")?;
    zip.finish().context("cannot finalize bundle")?;

    Ok(BundleExport {
        bundle_format: manifest.format,
        entry_count: 2,
        db_sha256,
    })
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<BundleImport> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "cannot create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE);

    // A plain database file is accepted as-is, so a copy taken outside the
    // app can still be restored.
    if !has_zip_signature(in_path)? {
        std::fs::copy(in_path, &dst).with_context(|| {
            format!(
                "cannot copy raw sqlite backup from {} to {}",
                in_path.to_string_lossy(),
                dst.to_string_lossy()
            )
        })?;
        return Ok(BundleImport {
            bundle_format_detected: "raw-sqlite3".to_string(),
        });
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("cannot open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let manifest = read_manifest(&mut archive)?;
    if manifest.format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", manifest.format));
    }

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/schooldesk.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("cannot read database entry")?;
    if !manifest.db_sha256.is_empty() {
        let actual = digest_hex(&db_bytes);
        if actual != manifest.db_sha256 {
            return Err(anyhow!(
                "bundle checksum mismatch: manifest {} but database entry {}",
                manifest.db_sha256,
                actual
            ));
        }
    }

    stage_database(workspace_path, &dst, &db_bytes)?;

    Ok(BundleImport {
        bundle_format_detected: manifest.format,
    })
}

fn read_manifest(archive: &mut ZipArchive<File>) -> anyhow::Result<BundleManifest> {
    let mut text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut text)
        .context("cannot read manifest.json")?;
    serde_json::from_str(&text).context("manifest.json is invalid JSON")
}

/// The verified bytes land under a scratch name first; the live database is
/// only replaced once they are fully on disk.
fn stage_database(workspace_path: &Path, dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let staging = workspace_path.join(format!("{}.importing", DB_FILE));
    if staging.exists() {
        let _ = std::fs::remove_file(&staging);
    }
    let mut out = File::create(&staging)
        .with_context(|| format!("cannot create staging file {}", staging.to_string_lossy()))?;
    out.write_all(bytes).context("cannot write staged database")?;
    out.flush().context("cannot flush staged database")?;
    drop(out);

    if dst.exists() {
        std::fs::remove_file(dst)
            .with_context(|| format!("cannot remove existing database {}", dst.to_string_lossy()))?;
    }
    std::fs::rename(&staging, dst)
        .with_context(|| format!("cannot move staged database to {}", dst.to_string_lossy()))?;
    Ok(())
}

fn has_zip_signature(path: &Path) -> anyhow::Result<bool> {
    let f = File::open(path)
        .with_context(|| format!("cannot open input file {}", path.to_string_lossy()))?;
    let mut magic = Vec::with_capacity(4);
    f.take(4)
        .read_to_end(&mut magic)
        .context("cannot read file signature")?;
    Ok(magic == *b"PK\x03\x04")
}
