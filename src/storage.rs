//! Durable JSON storage for the client registry and the seen ledger.
//!
//! Both documents are small and rewritten whole. Writes go to a sibling
//! temp file that is then renamed over the target, so a crash never
//! leaves a half-written document behind. A document that fails to parse
//! is moved aside as `<name>.bad_<YYYYmmdd_HHMMSS>` and loading continues
//! with an empty value.
//!
//! # Files
//!
//! | Document | Default path | Shape |
//! |----------|--------------|-------|
//! | Client registry | `<data>/user_preferences.json` | array of client objects |
//! | Seen ledger | `<data>/seen_history.json` | `{ chat_id: [listing_id, ...] }` |

use anyhow::{Context, Result};
use chrono::Local;
use prospector_core::client::normalize_client;
use prospector_core::{ClientConfig, SeenLedger};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::StorageConfig;

/// Resolved storage locations.
#[derive(Debug, Clone)]
pub struct Storage {
    base_dir: PathBuf,
    data_dir: PathBuf,
    session_dir: PathBuf,
    history_path: PathBuf,
    preferences_path: PathBuf,
}

impl Storage {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            data_dir: config.data_dir.clone(),
            session_dir: config.session_dir(),
            history_path: config.history_path(),
            preferences_path: config.preferences_path(),
        }
    }

    /// Storage rooted in a single directory. Used by tests and `init`.
    pub fn in_dir(dir: &Path) -> Self {
        let config = StorageConfig {
            base_dir: dir.to_path_buf(),
            data_dir: dir.join("data"),
            ..StorageConfig::default()
        };
        Self::from_config(&config)
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn preferences_path(&self) -> &Path {
        &self.preferences_path
    }

    /// Create the data and session directories plus the parents of both
    /// documents.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.session_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        for file in [&self.history_path, &self.preferences_path] {
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }
        Ok(())
    }

    /// Move pre-rename files from the base directory into their current
    /// locations. Targets that already exist are never overwritten.
    pub fn migrate_legacy_paths(&self) -> Result<usize> {
        let moves = [
            (self.base_dir.join("historico_vistos.json"), &self.history_path),
            (
                self.base_dir.join("preferencias_usuario.json"),
                &self.preferences_path,
            ),
            (self.base_dir.join("sessao_facebook"), &self.session_dir),
        ];

        let mut moved = 0;
        for (legacy, target) in moves {
            if !legacy.exists() || target.exists() {
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            fs::rename(&legacy, target).with_context(|| {
                format!(
                    "Failed to move {} to {}",
                    legacy.display(),
                    target.display()
                )
            })?;
            info!(from = %legacy.display(), to = %target.display(), "migrated legacy path");
            moved += 1;
        }
        Ok(moved)
    }

    /// Load and normalize the client registry. Non-object entries are
    /// dropped.
    pub fn load_clients(&self) -> Result<Vec<ClientConfig>> {
        let Some(doc) = read_json(&self.preferences_path)? else {
            return Ok(Vec::new());
        };
        let Value::Array(entries) = doc else {
            warn!(path = %self.preferences_path.display(), "client registry is not a list, ignoring");
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .filter(|entry| entry.is_object())
            .map(normalize_client)
            .collect())
    }

    pub fn save_clients(&self, clients: &[ClientConfig]) -> Result<()> {
        write_json(&self.preferences_path, &clients)
    }

    pub fn load_seen(&self) -> Result<SeenLedger> {
        Ok(read_json(&self.history_path)?
            .map(|doc| SeenLedger::from_document(&doc))
            .unwrap_or_default())
    }

    pub fn save_seen(&self, ledger: &SeenLedger) -> Result<()> {
        write_json(&self.history_path, &ledger.to_document())
    }
}

/// Read a JSON document. Missing files are `None`; corrupt files are moved
/// aside and also yield `None`.
fn read_json(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match serde_json::from_str::<Value>(&content) {
        Ok(doc) => Ok(Some(doc)),
        Err(e) => {
            let backup = backup_corrupt_file(path)?;
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "corrupt JSON document moved aside"
            );
            Ok(None)
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(value).context("Failed to serialize document")?;
    let tmp = sibling_with_suffix(path, ".tmp");
    fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn backup_corrupt_file(path: &Path) -> Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup = sibling_with_suffix(path, &format!(".bad_{stamp}"));
    fs::rename(path, &backup).with_context(|| {
        format!(
            "Failed to move corrupt {} to {}",
            path.display(),
            backup.display()
        )
    })?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_load_empty() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::in_dir(tmp.path());
        assert!(storage.load_clients().unwrap().is_empty());
        assert!(storage.load_seen().unwrap().is_empty());
    }

    #[test]
    fn test_clients_roundtrip_normalized() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::in_dir(tmp.path());
        storage.ensure_directories().unwrap();
        fs::write(
            storage.preferences_path(),
            json!([{"chatId": "9", "termo": "tv"}, "junk", 3]).to_string(),
        )
        .unwrap();

        let clients = storage.load_clients().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].chat_id, "9");
        assert_eq!(clients[0].search_term, "tv");

        storage.save_clients(&clients).unwrap();
        assert_eq!(storage.load_clients().unwrap(), clients);
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::in_dir(tmp.path());
        storage.ensure_directories().unwrap();
        fs::write(storage.history_path(), "{not json").unwrap();

        let ledger = storage.load_seen().unwrap();
        assert!(ledger.is_empty());
        assert!(!storage.history_path().exists());

        let backups: Vec<_> = fs::read_dir(tmp.path().join("data"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("seen_history.json.bad_")
            })
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_seen_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::in_dir(tmp.path());
        let mut ledger = SeenLedger::new();
        ledger.mark("1", "cl_2");
        ledger.mark("1", "cl_1");
        storage.save_seen(&ledger).unwrap();

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(storage.history_path()).unwrap()).unwrap();
        assert_eq!(raw, json!({"1": ["cl_1", "cl_2"]}));
        assert_eq!(storage.load_seen().unwrap(), ledger);
    }

    #[test]
    fn test_legacy_migration_does_not_overwrite() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::in_dir(tmp.path());
        fs::write(tmp.path().join("historico_vistos.json"), r#"{"1": ["x"]}"#).unwrap();
        fs::write(tmp.path().join("preferencias_usuario.json"), "[]").unwrap();
        fs::create_dir_all(tmp.path().join("data")).unwrap();
        fs::write(storage.preferences_path(), r#"[{"chat_id": "keep"}]"#).unwrap();

        let moved = storage.migrate_legacy_paths().unwrap();
        assert_eq!(moved, 1);
        assert!(storage.load_seen().unwrap().contains("1", "x"));
        assert_eq!(storage.load_clients().unwrap()[0].chat_id, "keep");
        assert!(tmp.path().join("preferencias_usuario.json").exists());
    }
}
