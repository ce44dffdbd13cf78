use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use spvcore_sdk::{ArcCallback, ArcConfig, EngineConfig, FeeUnit, SyncTaskConfig};

/// Node configuration, read from a JSON file. Every field has a default so a
/// partial file (or none at all) still yields a runnable node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub database_path: String,
    pub arc: ArcSection,
    pub token_overlay: Option<TokenOverlaySection>,
    pub paymail: PaymailSection,
    pub engine: EngineSection,
    pub sync: SyncSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "spvcore.sqlite3".to_string(),
            arc: ArcSection::default(),
            token_overlay: None,
            paymail: PaymailSection::default(),
            engine: EngineSection::default(),
            sync: SyncSection::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallbackSection {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArcSection {
    pub url: String,
    pub token: String,
    pub deployment_id: String,
    pub wait_for: String,
    pub callback: Option<CallbackSection>,
    pub timeout_secs: u64,
}

impl Default for ArcSection {
    fn default() -> Self {
        let arc = ArcConfig::default();
        Self {
            url: arc.url,
            token: arc.token,
            deployment_id: arc.deployment_id,
            wait_for: arc.wait_for,
            callback: None,
            timeout_secs: arc.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenOverlaySection {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymailSection {
    pub timeout_secs: u64,
}

impl Default for PaymailSection {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSection {
    pub lock_wait_secs: u64,
    pub lock_ttl_secs: u64,
    pub call_timeout_secs: u64,
    pub revert_query_timeout_secs: u64,
    pub draft_expiry_secs: u64,
    pub fee_unit: FeeUnit,
}

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            lock_wait_secs: engine.lock_wait.as_secs(),
            lock_ttl_secs: engine.lock_ttl.as_secs(),
            call_timeout_secs: engine.call_timeout.as_secs(),
            revert_query_timeout_secs: engine.revert_query_timeout.as_secs(),
            draft_expiry_secs: engine.draft_expiry.as_secs(),
            fee_unit: engine.fee_unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSection {
    pub interval_secs: u64,
    pub callback_grace_secs: u64,
    pub mine_grace_secs: u64,
    pub problematic_after_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        let sync = SyncTaskConfig::default();
        Self {
            interval_secs: 60,
            callback_grace_secs: sync.callback_grace.as_secs(),
            mine_grace_secs: sync.mine_grace.as_secs(),
            problematic_after_secs: sync.problematic_after.as_secs(),
        }
    }
}

impl AppConfig {
    /// Read the config file at `path`. A missing file yields the defaults;
    /// an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            log::warn!("config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, String> {
        serde_json::from_str(contents).map_err(|e| format!("Invalid config: {e}"))
    }

    pub fn arc_config(&self) -> ArcConfig {
        ArcConfig {
            url: self.arc.url.clone(),
            token: self.arc.token.clone(),
            deployment_id: self.arc.deployment_id.clone(),
            wait_for: self.arc.wait_for.clone(),
            callback: self.arc.callback.as_ref().map(|cb| ArcCallback {
                url: cb.url.clone(),
                token: cb.token.clone(),
            }),
            timeout: Duration::from_secs(self.arc.timeout_secs),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let e = &self.engine;
        EngineConfig {
            lock_wait: Duration::from_secs(e.lock_wait_secs),
            lock_ttl: Duration::from_secs(e.lock_ttl_secs),
            call_timeout: Duration::from_secs(e.call_timeout_secs),
            revert_query_timeout: Duration::from_secs(e.revert_query_timeout_secs),
            draft_expiry: Duration::from_secs(e.draft_expiry_secs),
            fee_unit: e.fee_unit,
        }
    }

    pub fn sync_config(&self) -> SyncTaskConfig {
        SyncTaskConfig {
            callback_enabled: self.arc_config().callback_enabled(),
            callback_grace: Duration::from_secs(self.sync.callback_grace_secs),
            mine_grace: Duration::from_secs(self.sync.mine_grace_secs),
            problematic_after: Duration::from_secs(self.sync.problematic_after_secs),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs.max(1))
    }

    pub fn paymail_timeout(&self) -> Duration {
        Duration::from_secs(self.paymail.timeout_secs)
    }

    /// Bearer token the chain service presents on callbacks, if callbacks are on.
    pub fn callback_token(&self) -> Option<&str> {
        self.arc
            .callback
            .as_ref()
            .filter(|cb| !cb.url.is_empty())
            .map(|cb| cb.token.as_str())
    }
}
