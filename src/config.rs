//! Configuration loading and schema definitions for testpub.
//!
//! Configuration comes from an optional TOML file; every value has a
//! default and command-line flags override file values. See
//! [`schema::Config`] for the layout.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads testpub configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema or fails validation
///
/// # Example
///
/// ```no_run
/// use testpub::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("testpub.toml"))?;
/// println!("Batch size: {}", config.publish.batch_size);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    Ok(config)
}

/// Loads testpub configuration from a TOML string.
///
/// # Example
///
/// ```
/// use testpub::config::load_config_str;
/// use testpub::publisher::AttachmentMode;
///
/// let config = load_config_str(r#"
///     [publish]
///     batch_size = 50
///     attachment_mode = "archive"
///
///     [run]
///     platform = "x64"
/// "#)?;
///
/// assert_eq!(config.publish.batch_size, 50);
/// assert_eq!(config.publish.attachment_mode, AttachmentMode::Archive);
/// assert_eq!(config.run.platform.as_deref(), Some("x64"));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    config.validate()?;

    Ok(config)
}

/// Loads `path` if it exists, otherwise returns the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!("No config file at {}, using defaults", path.display());
        Ok(Config::default())
    }
}

/// Renders the default configuration as TOML.
pub fn default_config_toml() -> Result<String> {
    toml::to_string_pretty(&Config::default()).context("Failed to render default config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::AttachmentMode;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.publish.batch_size, 1000);
        assert_eq!(config.publish.attachment_mode, AttachmentMode::Individual);
        assert!(config.publish.include_results_file);
        assert_eq!(config.limits.max_file_size, 78_643_200);
        assert_eq!(config.limits.max_encoded_size, 104_857_600);
        assert_eq!(
            config.limits.min_valid_date,
            Utc.with_ymd_and_hms(1753, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            [publish]
            batch_size = 3
            attachment_mode = "archive"
            include_results_file = false
            publish_run_attachments = false
            merge_results = false
            fail_on_failed_tests = true

            [limits]
            max_hierarchy_level = 4
            max_sub_results_per_level = 20
            max_file_size = 1024
            max_encoded_size = 2048
            min_valid_date = "2000-01-01T00:00:00Z"

            [run]
            owner = "agent"
            build_id = 77
            release_uri = "vstfs:///ReleaseManagement/Release/1"
            "#,
        )
        .unwrap();

        let parser = config.parser_options();
        assert!(!parser.include_results_file);
        assert_eq!(parser.limits.max_depth, 4);
        assert_eq!(parser.limits.max_per_level, 20);

        let publish = config.publish_options();
        assert_eq!(publish.batch_size, 3);
        assert_eq!(publish.attachment_mode, AttachmentMode::Archive);
        assert!(!publish.publish_run_attachments);
        assert_eq!(publish.attachment_limits.max_encoded_size, 2048);

        assert!(config.publish.fail_on_failed_tests);
        assert_eq!(config.run.build_id, 77);
        assert_eq!(config.run.owner.as_deref(), Some("agent"));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(load_config_str("[publish]\nbatch_size = 0").is_err());
        assert!(load_config_str("[publish]\nattachment_mode = \"zip\"").is_err());
        assert!(load_config_str("[limits]\nmax_hierarchy_level = 0").is_err());
    }

    #[test]
    fn test_default_toml_round_trips() {
        let rendered = default_config_toml().unwrap();
        assert_eq!(load_config_str(&rendered).unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("testpub.toml");
        std::fs::write(&path, "[publish]\nbatch_size = 10\n").unwrap();

        assert_eq!(load_config(&path).unwrap().publish.batch_size, 10);
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
        assert_eq!(
            load_config_or_default(&dir.path().join("missing.toml")).unwrap(),
            Config::default()
        );
    }
}
