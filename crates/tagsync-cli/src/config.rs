//! YAML configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use tagsync_core::config::{
    ConflictPolicy, MissingFrontmatterPolicy, MutationOptions, ReconcileConfig, TagRuleConfig,
    DEFAULT_SIMILARITY_THRESHOLD,
};
use tagsync_core::error::{Result, TagsyncError};

use crate::readwise::{DEFAULT_API_URL, DEFAULT_TOKEN_ENV};

pub const DEFAULT_CONFIG: &str = "config.yaml";
const DEFAULT_PROPOSAL_CSV: &str = "tag_proposal.csv";

/// The file as written. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    obsidian_vault_path: Option<String>,
    readwise_token_env: Option<String>,
    readwise_api_url: Option<String>,
    similarity_threshold: Option<serde_yaml::Value>,
    conflict_policy: ConflictPolicy,
    cosmetic_renames: Option<bool>,
    missing_frontmatter: MissingFrontmatterPolicy,
    rewrite_inline_tags: bool,
    auto_tags: Vec<TagRuleConfig>,
    proposal_csv: Option<PathBuf>,
    workers: Option<usize>,
}

/// Resolved settings for one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// The file actually read.
    pub path: PathBuf,
    pub vault_path: Option<PathBuf>,
    pub token_env: String,
    pub api_url: String,
    pub reconcile: ReconcileConfig,
    pub mutation: MutationOptions,
    pub auto_tags: Vec<TagRuleConfig>,
    pub proposal_csv: PathBuf,
    pub workers: usize,
}

impl AppConfig {
    /// Load from `path`, or `./config.yaml` when none is given.
    ///
    /// # Errors
    ///
    /// [`TagsyncError::Config`] when no file is found or it does not parse.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let requested = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG), expand_home);
        let resolved = resolve_config_path(&requested)?;
        let text = fs::read_to_string(&resolved).map_err(|e| {
            TagsyncError::Config(format!("cannot read {}: {e}", resolved.display()))
        })?;
        Self::from_yaml(&text, resolved)
    }

    /// Parse configuration text read from `path`.
    ///
    /// # Errors
    ///
    /// [`TagsyncError::Config`] when the text is not a YAML mapping of the
    /// expected shape.
    pub fn from_yaml(text: &str, path: PathBuf) -> Result<Self> {
        let raw: Option<RawConfig> = serde_yaml::from_str(text)
            .map_err(|e| TagsyncError::Config(format!("{}: {e}", path.display())))?;
        let raw = raw.unwrap_or_default();

        let reconcile = ReconcileConfig {
            similarity_threshold: similarity_threshold(raw.similarity_threshold.as_ref()),
            conflict_policy: raw.conflict_policy,
            cosmetic_renames: raw.cosmetic_renames.unwrap_or(true),
        };
        let mutation = MutationOptions {
            missing_frontmatter: raw.missing_frontmatter,
            rewrite_inline_tags: raw.rewrite_inline_tags,
        };

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let proposal_csv = match raw.proposal_csv {
            Some(p) if p.is_absolute() => p,
            Some(p) => base.join(p),
            None => base.join(DEFAULT_PROPOSAL_CSV),
        };
        let workers = raw
            .workers
            .filter(|w| *w > 0)
            .unwrap_or_else(default_workers);

        Ok(Self {
            vault_path: raw
                .obsidian_vault_path
                .as_deref()
                .map(|p| expand_home(Path::new(p))),
            token_env: raw
                .readwise_token_env
                .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string()),
            api_url: raw
                .readwise_api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            reconcile,
            mutation,
            auto_tags: raw.auto_tags,
            proposal_csv,
            workers,
            path,
        })
    }

    /// The vault directory, required by every command that reads notes.
    ///
    /// # Errors
    ///
    /// [`TagsyncError::Config`] when `obsidian_vault_path` is not set.
    pub fn vault_path(&self) -> Result<&Path> {
        self.vault_path.as_deref().ok_or_else(|| {
            TagsyncError::Config(format!(
                "obsidian_vault_path is not set in {}",
                self.path.display()
            ))
        })
    }
}

/// Use `path` if it exists, else a sibling `<name>-default` template.
fn resolve_config_path(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if !name.ends_with("-default") {
            let fallback = path.with_file_name(format!("{name}-default"));
            if fallback.exists() {
                info!(
                    missing = %path.display(),
                    template = %fallback.display(),
                    "configuration file not found, using default template"
                );
                return Ok(fallback);
            }
        }
    }
    Err(TagsyncError::Config(format!(
        "configuration file not found at {}. Copy config.yaml-default to config.yaml \
         and update it for your vault, or pass --config to point to a different file.",
        path.display()
    )))
}

/// Integer in 0..=100; out-of-range values clamp, anything else falls back.
fn similarity_threshold(value: Option<&serde_yaml::Value>) -> u8 {
    let Some(value) = value else {
        return DEFAULT_SIMILARITY_THRESHOLD;
    };
    let parsed = match value {
        serde_yaml::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        serde_yaml::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) => u8::try_from(v.clamp(0, 100)).unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
        None => {
            warn!(?value, "similarity_threshold is not an integer, using default");
            DEFAULT_SIMILARITY_THRESHOLD
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}
