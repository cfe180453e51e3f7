use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use delivery_upgrade::context::DEFAULT_LEGACY_PREFIX;
use delivery_upgrade::{MigrationOptions, RecoverySteps};

/// Name of the optional configuration file.
pub const CONFIG_FILE: &str = "delivery-upgrade.toml";

/// Project context for delivery-upgrade operations
pub struct ProjectContext {
    /// Path of the loaded config file, if one was found
    pub config_path: Option<PathBuf>,
    /// Loaded configuration (defaults when no file was found)
    pub config: DeliveryUpgradeConfig,
}

/// Configuration stored in delivery-upgrade.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryUpgradeConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub migration: MigrationSettings,
    #[serde(default)]
    pub recovery: RecoverySteps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "${DELIVERY_DB}".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_legacy_prefix")]
    pub legacy_prefix: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            legacy_prefix: default_legacy_prefix(),
        }
    }
}

fn default_legacy_prefix() -> String {
    DEFAULT_LEGACY_PREFIX.to_string()
}

impl ProjectContext {
    /// Load the config given with `--config`, or look for one from the current directory up.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let current_dir = std::env::current_dir().context("Failed to get current directory")?;
                Self::find_from(&current_dir)
            }
        }
    }

    /// Find the config file starting from the given directory; defaults when none exists
    pub fn find_from(start: &Path) -> Result<Self> {
        for dir in start.ancestors() {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }

        Ok(Self {
            config_path: None,
            config: DeliveryUpgradeConfig::default(),
        })
    }

    /// Load context from a known config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: DeliveryUpgradeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(Self {
            config_path: Some(path.to_path_buf()),
            config,
        })
    }

    /// Database path: the command-line value wins, then the config with env expansion
    pub fn database_path(&self, cli_value: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = cli_value {
            return Ok(path.to_path_buf());
        }
        let expanded = expand_env(&self.config.database.path).context(
            "No database given. Pass --database, set DELIVERY_DB, or configure [database] path",
        )?;
        Ok(PathBuf::from(expanded))
    }

    /// Migration options from the config, with any recovery step switched on by the CLI added
    pub fn migration_options(&self, cli_recovery: RecoverySteps) -> MigrationOptions {
        let configured = self.config.recovery;
        MigrationOptions {
            legacy_prefix: self.config.migration.legacy_prefix.clone(),
            recovery: RecoverySteps {
                fill_missing_grids: configured.fill_missing_grids || cli_recovery.fill_missing_grids,
                create_carrier_products: configured.create_carrier_products
                    || cli_recovery.create_carrier_products,
                correct_order_references: configured.correct_order_references
                    || cli_recovery.correct_order_references,
            },
        }
    }
}

/// Expand a whole-value `${VAR}` reference; any other value is returned unchanged.
fn expand_env(value: &str) -> Result<String> {
    if let Some(var_name) = value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        std::env::var(var_name).with_context(|| format!("Environment variable {var_name} not set"))
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeliveryUpgradeConfig::default();
        assert_eq!(config.database.path, "${DELIVERY_DB}");
        assert_eq!(config.migration.legacy_prefix, "openupgrade_legacy_9_0_");
        assert!(!config.recovery.any());
    }

    #[test]
    fn test_config_serialization() {
        let config = DeliveryUpgradeConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("legacy_prefix"));
        assert!(toml_str.contains("fill_missing_grids"));
    }

    #[test]
    fn test_find_from_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
            [database]
            path = "/var/lib/erp/erp.sqlite"

            [recovery]
            correct_order_references = true
            "#,
        )
        .unwrap();
        let nested = dir.path().join("deploy").join("scripts");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = ProjectContext::find_from(&nested).unwrap();
        assert_eq!(ctx.config_path.as_deref(), Some(dir.path().join(CONFIG_FILE).as_path()));
        assert_eq!(
            ctx.database_path(None).unwrap(),
            PathBuf::from("/var/lib/erp/erp.sqlite")
        );
        assert!(ctx.config.recovery.correct_order_references);
        assert_eq!(ctx.config.migration.legacy_prefix, DEFAULT_LEGACY_PREFIX);
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ProjectContext::find_from(dir.path()).unwrap();
        assert!(ctx.config_path.is_none());
        assert_eq!(ctx.config, DeliveryUpgradeConfig::default());
    }

    #[test]
    fn test_cli_database_overrides_config() {
        let ctx = ProjectContext {
            config_path: None,
            config: DeliveryUpgradeConfig::default(),
        };
        let path = ctx.database_path(Some(Path::new("cli.sqlite"))).unwrap();
        assert_eq!(path, PathBuf::from("cli.sqlite"));
    }

    #[test]
    fn test_cli_recovery_flags_add_to_config() {
        let mut config = DeliveryUpgradeConfig::default();
        config.recovery.fill_missing_grids = true;
        config.migration.legacy_prefix = "legacy_".to_string();
        let ctx = ProjectContext {
            config_path: None,
            config,
        };

        let options = ctx.migration_options(RecoverySteps {
            create_carrier_products: true,
            ..RecoverySteps::default()
        });
        assert_eq!(options.legacy_prefix, "legacy_");
        assert!(options.recovery.fill_missing_grids);
        assert!(options.recovery.create_carrier_products);
        assert!(!options.recovery.correct_order_references);
    }

    #[test]
    fn test_expand_env_literal() {
        assert_eq!(expand_env("erp.sqlite").unwrap(), "erp.sqlite");
        assert!(expand_env("${DELIVERY_UPGRADE_TEST_UNSET_VARIABLE}").is_err());
    }
}
