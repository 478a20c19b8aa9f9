use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::constants::{
    CONFIG_FILE_NAME, ENV_CONFIG_PATH, ENV_WORKSPACE, SYSTEM_CONFIG_PATH, USER_CONFIG_DIR,
};
use crate::loader::layers::{ConfigLayerEntry, ConfigLayerSource, ConfigLayerStack};
use crate::root::ConfineConfig;

/// Locations searched below the workspace layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSearchPaths {
    pub system: Option<PathBuf>,
    pub user: Vec<PathBuf>,
}

impl Default for ConfigSearchPaths {
    fn default() -> Self {
        let system = cfg!(unix).then(|| PathBuf::from(SYSTEM_CONFIG_PATH));
        let user = dirs::home_dir()
            .map(|home| home.join(USER_CONFIG_DIR).join(CONFIG_FILE_NAME))
            .into_iter()
            .collect();
        Self { system, user }
    }
}

impl ConfigSearchPaths {
    /// No system or user layers; only the workspace file counts.
    pub fn none() -> Self {
        Self {
            system: None,
            user: Vec::new(),
        }
    }
}

/// Loads and validates `ConfineConfig` from its layers.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub(crate) config: ConfineConfig,
    config_path: Option<PathBuf>,
    workspace_root: Option<PathBuf>,
    pub(crate) layer_stack: ConfigLayerStack,
}

impl ConfigManager {
    /// Load from `CONFINE_CONFIG_PATH`, `CONFINE_WORKSPACE` or the current
    /// directory, in that order.
    pub fn load() -> Result<Self> {
        if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
            let trimmed = config_path.trim();
            if !trimmed.is_empty() {
                return Self::load_from_file(trimmed).with_context(|| {
                    format!("Failed to load configuration from {ENV_CONFIG_PATH}={trimmed}")
                });
            }
        }

        if let Ok(workspace) = std::env::var(ENV_WORKSPACE) {
            let trimmed = workspace.trim();
            if !trimmed.is_empty() {
                return Self::load_from_workspace(trimmed).with_context(|| {
                    format!("Failed to load configuration from {ENV_WORKSPACE}={trimmed}")
                });
            }
        }

        let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
        Self::load_from_workspace(cwd)
    }

    pub fn load_from_workspace(workspace: impl AsRef<Path>) -> Result<Self> {
        Self::load_from_workspace_with(workspace, &ConfigSearchPaths::default())
    }

    pub fn load_from_workspace_with(
        workspace: impl AsRef<Path>,
        search: &ConfigSearchPaths,
    ) -> Result<Self> {
        let workspace_root = workspace.as_ref().to_path_buf();
        let mut layer_stack = Self::base_layers(search);

        let workspace_config = workspace_root.join(CONFIG_FILE_NAME);
        if workspace_config.exists() {
            let toml = Self::load_toml_from_file(&workspace_config)?;
            layer_stack.push(ConfigLayerEntry::new(
                ConfigLayerSource::Workspace {
                    file: workspace_config,
                },
                toml,
            ));
        }

        let config = Self::resolve(&layer_stack).context("Configuration failed validation")?;
        let config_path = layer_stack.top_file().map(Path::to_path_buf);

        Ok(Self {
            config,
            config_path,
            workspace_root: Some(workspace_root),
            layer_stack,
        })
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_from_file_with(path, &ConfigSearchPaths::default())
    }

    pub fn load_from_file_with(path: impl AsRef<Path>, search: &ConfigSearchPaths) -> Result<Self> {
        let path = path.as_ref();
        let mut layer_stack = Self::base_layers(search);

        let toml = Self::load_toml_from_file(path)?;
        layer_stack.push(ConfigLayerEntry::new(
            ConfigLayerSource::Workspace {
                file: path.to_path_buf(),
            },
            toml,
        ));

        let config = Self::resolve(&layer_stack).with_context(|| {
            format!("Failed to validate effective config with file: {}", path.display())
        })?;

        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
            workspace_root: path.parent().map(Path::to_path_buf),
            layer_stack,
        })
    }

    /// System and user layers. Unreadable files are skipped with a warning so
    /// a broken global file never blocks a workspace.
    fn base_layers(search: &ConfigSearchPaths) -> ConfigLayerStack {
        let mut layer_stack = ConfigLayerStack::default();

        if let Some(system) = &search.system
            && system.exists()
        {
            match Self::load_toml_from_file(system) {
                Ok(toml) => layer_stack.push(ConfigLayerEntry::new(
                    ConfigLayerSource::System {
                        file: system.clone(),
                    },
                    toml,
                )),
                Err(err) => tracing::warn!(path = %system.display(), error = %err, "skipping system config"),
            }
        }

        for user in &search.user {
            if !user.exists() {
                continue;
            }
            match Self::load_toml_from_file(user) {
                Ok(toml) => layer_stack.push(ConfigLayerEntry::new(
                    ConfigLayerSource::User { file: user.clone() },
                    toml,
                )),
                Err(err) => tracing::warn!(path = %user.display(), error = %err, "skipping user config"),
            }
        }

        layer_stack
    }

    pub(crate) fn resolve(layer_stack: &ConfigLayerStack) -> Result<ConfineConfig> {
        let config: ConfineConfig = if layer_stack.is_empty() {
            ConfineConfig::default()
        } else {
            layer_stack
                .effective_config()
                .try_into()
                .context("Failed to deserialize effective configuration")?
        };
        config.validate()?;
        Ok(config)
    }

    fn load_toml_from_file(path: &Path) -> Result<toml::Value> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let value: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(value)
    }

    pub fn config(&self) -> &ConfineConfig {
        &self.config
    }

    pub fn into_config(self) -> ConfineConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    pub fn layer_stack(&self) -> &ConfigLayerStack {
        &self.layer_stack
    }

    pub fn effective_config(&self) -> toml::Value {
        self.layer_stack.effective_config()
    }
}
