// Plugin data persistence: `data.json` with a `.bak` sibling. Saves are
// serialized through one mutex; loads observe the last completed write via
// a cache invalidated on save.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::fs::FilesystemService;
use crate::paths::SystemPath;
use crate::settings::Settings;

pub const PLUGIN_SCHEMA_VERSION: u32 = 2;
const DATA_FILE: &str = "data.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginData {
    pub schema_version: u32,
    pub settings: Settings,
    /// Ordered, insertion-preserving set of applied migration IDs.
    pub applied_migrations: Vec<String>,
    #[serde(rename = "last_plugin_migrated_to", skip_serializing_if = "Option::is_none")]
    pub last_migrated_to: Option<String>,
}

impl Default for PluginData {
    fn default() -> Self {
        Self {
            schema_version: PLUGIN_SCHEMA_VERSION,
            settings: Settings::default(),
            applied_migrations: Vec::new(),
            last_migrated_to: None,
        }
    }
}

// Settings deserialize through `Settings::from_json` so the legacy-key
// rewrite and boolean coercion apply; plain derive would bypass both.
#[derive(Deserialize)]
struct RawPluginData {
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    settings: Value,
    #[serde(default)]
    applied_migrations: Vec<String>,
    #[serde(rename = "last_plugin_migrated_to", default)]
    last_migrated_to: Option<String>,
}

impl PluginData {
    fn from_raw(raw: RawPluginData) -> Self {
        Self {
            schema_version: raw.schema_version.unwrap_or(PLUGIN_SCHEMA_VERSION),
            settings: Settings::from_json(raw.settings),
            applied_migrations: raw.applied_migrations,
            last_migrated_to: raw.last_migrated_to,
        }
    }

    pub fn record_migrations(&mut self, newly_applied: Vec<String>) {
        for id in newly_applied {
            if !self.applied_migrations.contains(&id) {
                self.applied_migrations.push(id);
            }
        }
        self.last_migrated_to = self.applied_migrations.last().cloned();
    }
}

pub struct PluginDataStore {
    fs: Arc<FilesystemService>,
    path: SystemPath,
    save_lock: Mutex<()>,
    cache: RwLock<Option<PluginData>>,
}

impl PluginDataStore {
    pub fn new(fs: Arc<FilesystemService>) -> Self {
        let path = fs.plugin_data_path(DATA_FILE);
        Self {
            fs,
            path,
            save_lock: Mutex::new(()),
            cache: RwLock::new(None),
        }
    }

    /// Load plugin data, falling back to defaults when neither the primary
    /// nor the `.bak` sibling is readable.
    pub fn load(&self) -> Result<PluginData> {
        if let Some(cached) = self.cache.read().clone() {
            return Ok(cached);
        }
        let data = match self.fs.try_read_json::<RawPluginData>(&self.path)? {
            Some(raw) => PluginData::from_raw(raw),
            None => PluginData::default(),
        };
        *self.cache.write() = Some(data.clone());
        Ok(data)
    }

    pub async fn save(&self, data: &PluginData) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        self.fs.write_json_atomic(&self.path, data)?;
        *self.cache.write() = Some(data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, PluginDataStore) {
        let dir = TempDir::new().unwrap();
        let vault = dir.path().join("vault");
        std::fs::create_dir_all(&vault).unwrap();
        let fs = Arc::new(
            FilesystemService::new(
                SystemPath::new(&vault),
                SystemPath::new(&dir.path().join("data")),
            )
            .unwrap(),
        );
        (dir, PluginDataStore::new(fs))
    }

    #[tokio::test]
    async fn test_load_defaults_when_absent() {
        let (_dir, store) = store();
        let data = store.load().unwrap();
        assert_eq!(data.schema_version, PLUGIN_SCHEMA_VERSION);
        assert!(data.applied_migrations.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let (_dir, store) = store();
        let mut data = PluginData::default();
        data.record_migrations(vec!["1.3.0-backfill-uids".to_string()]);
        store.save(&data).await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, data);
        assert_eq!(
            loaded.last_migrated_to.as_deref(),
            Some("1.3.0-backfill-uids")
        );
    }

    #[tokio::test]
    async fn test_applied_migrations_preserve_order() {
        let (_dir, store) = store();
        let mut data = PluginData::default();
        data.record_migrations(vec!["b".to_string()]);
        data.record_migrations(vec!["a".to_string(), "b".to_string()]);
        store.save(&data).await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.applied_migrations, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_legacy_settings_key_rewritten_on_load() {
        let (_dir, store) = store();
        let raw = json!({
            "schema_version": 1,
            "settings": { "koreaderMountPoint": "/mnt/device" },
            "applied_migrations": []
        });
        store
            .fs
            .write_json_atomic(&store.path, &raw)
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(
            loaded.settings.koreader_scan_path.as_deref(),
            Some("/mnt/device")
        );
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_save() {
        let (_dir, store) = store();
        let first = store.load().unwrap();
        let mut updated = first.clone();
        updated.settings.log_level = 3;
        store.save(&updated).await.unwrap();
        assert_eq!(store.load().unwrap().settings.log_level, 3);
    }
}
