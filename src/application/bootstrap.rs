use crate::infrastructure::config::{ensure_default_configs, read_preferences};
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let _ = read_preferences(&config_dir)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_layout_and_default_configs() {
        let root = std::env::temp_dir().join(format!(
            "focuslearn-bootstrap-test-{}",
            std::process::id()
        ));
        let result = bootstrap_workspace(&root).expect("bootstrap");

        assert!(result.config_dir.join("app.json").exists());
        assert!(result.config_dir.join("preferences.json").exists());
        assert!(root.join("state").is_dir());
        assert!(result.logs_dir.is_dir());

        bootstrap_workspace(&root).expect("second bootstrap is idempotent");
        let _ = fs::remove_dir_all(&root);
    }
}
