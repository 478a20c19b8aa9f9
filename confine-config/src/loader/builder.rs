use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::loader::layers::{ConfigLayerEntry, ConfigLayerSource};
use crate::loader::manager::{ConfigManager, ConfigSearchPaths};

/// Builds a [`ConfigManager`] with runtime overrides on top of the file layers.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    workspace: Option<PathBuf>,
    config_file: Option<PathBuf>,
    search: Option<ConfigSearchPaths>,
    overrides: Vec<(String, toml::Value)>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace = Some(path.into());
        self
    }

    /// Use this file instead of `<workspace>/confine.toml`.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn search_paths(mut self, search: ConfigSearchPaths) -> Self {
        self.search = Some(search);
        self
    }

    /// Override a dotted key, e.g. `limits.max_cpu_time`.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Overrides from `key=value` strings. Values parse as TOML and fall back
    /// to plain strings.
    pub fn set_from_str(mut self, pairs: &[(String, String)]) -> Self {
        for (key, raw) in pairs {
            let value = parse_override(raw);
            self.overrides.push((key.clone(), value));
        }
        self
    }

    pub fn build(self) -> Result<ConfigManager> {
        let search = self.search.unwrap_or_default();
        let mut manager = match self.config_file {
            Some(file) => ConfigManager::load_from_file_with(file, &search)?,
            None => {
                let workspace = match self.workspace {
                    Some(workspace) => workspace,
                    None => std::env::current_dir().context("Failed to resolve current directory")?,
                };
                ConfigManager::load_from_workspace_with(workspace, &search)?
            }
        };

        if self.overrides.is_empty() {
            return Ok(manager);
        }

        let mut runtime = toml::Table::new();
        for (key, value) in self.overrides {
            insert_dotted_key(&mut runtime, &key, value);
        }
        manager.layer_stack.push(ConfigLayerEntry::new(
            ConfigLayerSource::Runtime,
            toml::Value::Table(runtime),
        ));
        manager.config = ConfigManager::resolve(&manager.layer_stack)
            .context("Configuration failed validation after runtime overrides")?;

        Ok(manager)
    }
}

fn parse_override(raw: &str) -> toml::Value {
    // A bare value is not a TOML document; wrap it in a key to parse it.
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

fn insert_dotted_key(table: &mut toml::Table, key: &str, value: toml::Value) {
    let mut parts = key.split('.').peekable();
    let mut current = table;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if !entry.is_table() {
            *entry = toml::Value::Table(toml::Table::new());
        }
        current = match entry.as_table_mut() {
            Some(next) => next,
            None => return,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_values_parse_as_toml() {
        assert_eq!(parse_override("42"), toml::Value::Integer(42));
        assert_eq!(parse_override("true"), toml::Value::Boolean(true));
        assert_eq!(parse_override("2.5"), toml::Value::Float(2.5));
        assert_eq!(
            parse_override("standard"),
            toml::Value::String("standard".into())
        );
    }

    #[test]
    fn dotted_keys_create_nested_tables() {
        let mut table = toml::Table::new();
        insert_dotted_key(&mut table, "limits.max_cpu_time", toml::Value::Float(1.0));
        insert_dotted_key(&mut table, "limits.network_access", toml::Value::Boolean(true));
        let limits = table["limits"].as_table().expect("limits table");
        assert_eq!(limits.len(), 2);
        assert_eq!(limits["network_access"], toml::Value::Boolean(true));
    }
}
