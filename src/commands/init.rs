//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::ProfileStore;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write a default configuration and create the working directories
pub async fn cmd_init(base_dir: &Path, config_path: &Path, force: bool) -> Result<PathBuf> {
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let config = Config::with_base_dir(base_dir);
    config.validate()?;

    std::fs::create_dir_all(&config.paths.input_dir)?;
    std::fs::create_dir_all(&config.paths.log_dir)?;
    config.save(config_path)?;

    let store = ProfileStore::connect(&config.paths.db_file, &config.store).await?;
    store.ensure_schema().await?;
    store.close().await;

    info!("Initialized argo-ingest in {:?}", base_dir);
    Ok(config_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        cmd_init(tmp.path(), &config_path, false).await.unwrap();

        let config = Config::load(&config_path).unwrap();
        assert!(config.paths.input_dir.is_dir());
        assert!(config.paths.db_file.exists());
        assert!(cmd_init(tmp.path(), &config_path, false).await.is_err());
        assert!(cmd_init(tmp.path(), &config_path, true).await.is_ok());
    }
}
