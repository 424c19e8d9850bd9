//! Configuration schema definitions for testpub.
//!
//! Every section and field is optional; a missing file or an empty file
//! yields [`Config::default`].
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── PublishConfig   - Batching, attachment mode, merge and job policy
//! ├── LimitsConfig    - Hierarchy caps, attachment size caps, date floor
//! └── RunContext      - Owner, platform, configuration, build/release refs
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::{AttachmentLimits, DEFAULT_MAX_ENCODED_SIZE, DEFAULT_MAX_FILE_SIZE};
use crate::limits::{
    DEFAULT_MAX_HIERARCHY_LEVEL, DEFAULT_MAX_SUB_RESULTS_PER_LEVEL, HierarchyLimits,
};
use crate::model::RunContext;
use crate::parser::{ParserOptions, default_min_valid_date};
use crate::publisher::{AttachmentMode, DEFAULT_BATCH_SIZE, PublishOptions};

/// Root configuration structure for testpub.
///
/// # TOML Structure
///
/// ```toml
/// [publish]
/// batch_size = 500
/// attachment_mode = "archive"
///
/// [limits]
/// max_hierarchy_level = 5
///
/// [run]
/// owner = "build-agent"
/// platform = "x64"
/// configuration = "Release"
/// build_id = 1234
/// ```
///
/// # Example
///
/// ```
/// use testpub::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [publish]
///     batch_size = 250
/// "#).unwrap();
/// assert_eq!(config.publish.batch_size, 250);
/// assert_eq!(config.limits.max_hierarchy_level, 10);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// Default run context; command-line flags override individual values.
    #[serde(default)]
    pub run: RunContext,
}

/// Publishing behavior.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `batch_size` | 1000 |
/// | `attachment_mode` | `"individual"` |
/// | `include_results_file` | true |
/// | `publish_run_attachments` | true |
/// | `merge_results` | true |
/// | `fail_on_failed_tests` | false |
/// | `runner` | `"VSTest"` |
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PublishConfig {
    /// Results per `add_results` call. Must be at least 1.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub attachment_mode: AttachmentMode,

    /// Attach each source document to its run.
    #[serde(default = "default_true")]
    pub include_results_file: bool,

    /// Upload run-level attachments at all.
    #[serde(default = "default_true")]
    pub publish_run_attachments: bool,

    /// Publish several documents as a single run.
    #[serde(default = "default_true")]
    pub merge_results: bool,

    /// Exit non-zero when any published result failed.
    #[serde(default)]
    pub fail_on_failed_tests: bool,

    /// Runner name used in default run titles.
    #[serde(default = "default_runner")]
    pub runner: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            attachment_mode: AttachmentMode::default(),
            include_results_file: true,
            publish_run_attachments: true,
            merge_results: true,
            fail_on_failed_tests: false,
            runner: default_runner(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

fn default_runner() -> String {
    "VSTest".to_string()
}

/// Data-loss-prevention caps.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `max_hierarchy_level` | 10 |
/// | `max_sub_results_per_level` | 300 |
/// | `max_file_size` | 78643200 (75 MB) |
/// | `max_encoded_size` | 104857600 (100 MB) |
/// | `min_valid_date` | `"1753-01-01T00:00:00Z"` |
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_hierarchy_level")]
    pub max_hierarchy_level: usize,

    #[serde(default = "default_max_sub_results_per_level")]
    pub max_sub_results_per_level: usize,

    /// Raw attachment size cap in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Base64 attachment size cap in bytes.
    #[serde(default = "default_max_encoded_size")]
    pub max_encoded_size: u64,

    /// Result timestamps before this are replaced by the current time.
    /// Written as a quoted RFC 3339 string.
    #[serde(default = "default_min_valid_date")]
    pub min_valid_date: DateTime<Utc>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_hierarchy_level: default_max_hierarchy_level(),
            max_sub_results_per_level: default_max_sub_results_per_level(),
            max_file_size: default_max_file_size(),
            max_encoded_size: default_max_encoded_size(),
            min_valid_date: default_min_valid_date(),
        }
    }
}

fn default_max_hierarchy_level() -> usize {
    DEFAULT_MAX_HIERARCHY_LEVEL
}

fn default_max_sub_results_per_level() -> usize {
    DEFAULT_MAX_SUB_RESULTS_PER_LEVEL
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_max_encoded_size() -> u64 {
    DEFAULT_MAX_ENCODED_SIZE
}

impl LimitsConfig {
    pub fn hierarchy(&self) -> HierarchyLimits {
        HierarchyLimits {
            max_depth: self.max_hierarchy_level,
            max_per_level: self.max_sub_results_per_level,
        }
    }

    pub fn attachments(&self) -> AttachmentLimits {
        AttachmentLimits {
            max_file_size: self.max_file_size,
            max_encoded_size: self.max_encoded_size,
        }
    }
}

impl Config {
    /// Checks values serde cannot constrain.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.publish.batch_size >= 1, "publish.batch_size must be at least 1");
        anyhow::ensure!(
            self.limits.max_hierarchy_level >= 1,
            "limits.max_hierarchy_level must be at least 1"
        );
        anyhow::ensure!(
            self.limits.max_sub_results_per_level >= 1,
            "limits.max_sub_results_per_level must be at least 1"
        );
        anyhow::ensure!(
            self.limits.max_file_size > 0 && self.limits.max_encoded_size > 0,
            "limits.max_file_size and limits.max_encoded_size must be positive"
        );
        anyhow::ensure!(
            !self.publish.runner.trim().is_empty(),
            "publish.runner must not be empty"
        );
        Ok(())
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            include_results_file: self.publish.include_results_file,
            limits: self.limits.hierarchy(),
            min_valid_date: self.limits.min_valid_date,
        }
    }

    pub fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            batch_size: self.publish.batch_size,
            attachment_mode: self.publish.attachment_mode,
            publish_run_attachments: self.publish.publish_run_attachments,
            limits: self.limits.hierarchy(),
            attachment_limits: self.limits.attachments(),
        }
    }
}
