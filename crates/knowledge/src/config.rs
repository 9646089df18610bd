//! Knowledge base configuration management.
//!
//! Every base lives in `.kbase/knowledge/<base>/`:
//! - `config.yaml`: the [`KnowledgeBaseConfig`]
//! - `lancedb/`: the base's LanceDB vector store
//!
//! Conversations for the whole workspace live in `.kbase/conversations.db`.

use crate::types::KnowledgeBaseConfig;
use kbase_core::{AppError, AppResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Load a base's configuration; the base must exist.
pub fn load_config(workspace: &Path, base_name: &str) -> AppResult<KnowledgeBaseConfig> {
    let config_path = get_config_path(workspace, base_name);

    if !config_path.exists() {
        return Err(AppError::Knowledge(format!(
            "Knowledge base '{}' does not exist. Run 'kbase knowledge create {}' first.",
            base_name, base_name
        )));
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        AppError::Knowledge(format!("Failed to read config at {:?}: {}", config_path, e))
    })?;

    let mut config: KnowledgeBaseConfig = serde_yaml::from_str(&content).map_err(|e| {
        AppError::Knowledge(format!("Failed to parse config at {:?}: {}", config_path, e))
    })?;

    // The directory name is authoritative
    config.name = base_name.to_string();

    tracing::debug!("Loaded knowledge base config for '{}'", base_name);
    Ok(config)
}

/// Save a base's configuration, creating its directory.
pub fn save_config(workspace: &Path, config: &KnowledgeBaseConfig) -> AppResult<()> {
    let config_path = get_config_path(workspace, &config.name);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Knowledge(format!("Failed to create config directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)
        .map_err(|e| AppError::Knowledge(format!("Failed to serialize config: {}", e)))?;

    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Knowledge(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved knowledge base config for '{}'", config.name);
    Ok(())
}

/// Whether a base has been created.
pub fn base_exists(workspace: &Path, base_name: &str) -> bool {
    get_config_path(workspace, base_name).exists()
}

/// Remove a base directory. Missing bases are not an error.
pub fn remove_base_dir(workspace: &Path, base_name: &str) -> AppResult<bool> {
    let dir = get_base_dir(workspace, base_name);
    if !dir.exists() {
        return Ok(false);
    }

    fs::remove_dir_all(&dir).map_err(|e| {
        AppError::Knowledge(format!("Failed to remove {:?}: {}", dir, e))
    })?;
    Ok(true)
}

/// Get the base directory for a knowledge base.
pub fn get_base_dir(workspace: &Path, base_name: &str) -> PathBuf {
    workspace.join(".kbase").join("knowledge").join(base_name)
}

/// Get the path to a base's config file.
pub fn get_config_path(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("config.yaml")
}

/// Get the LanceDB directory for a base.
pub fn get_index_path(workspace: &Path, base_name: &str) -> PathBuf {
    get_base_dir(workspace, base_name).join("lancedb")
}

/// SQLite database holding conversations.
pub fn get_conversations_db(workspace: &Path) -> PathBuf {
    workspace.join(".kbase").join("conversations.db")
}
