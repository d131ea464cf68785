//! TOML configuration for a migration run.
//!
//! The file is read once at startup and treated as immutable for the rest of the run.
//!
//! ```toml
//! [source]
//! url = "https://dev.example.com/old-org"
//! project = "Legacy"
//! query = "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project"
//!
//! [target]
//! url = "https://dev.example.com/new-org"
//! project = "Platform"
//!
//! [batch]
//! size = 50
//! parallelism = 4
//!
//! [relations]
//! attachments = true
//! ```

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Upper bound the batch endpoint accepts per call.
pub const MAX_BATCH_SIZE: usize = 200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid url in {section}.url: {source}")]
    InvalidUrl {
        section: &'static str,
        source: url::ParseError,
    },
    #[error("{0}")]
    Invalid(String),
    #[error("missing env var: {0}")]
    MissingEnv(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub source: EndpointConfig,
    pub target: EndpointConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub phases: PhaseToggles,
    #[serde(default)]
    pub relations: RelationToggles,
    #[serde(default)]
    pub fields: FieldRules,
    #[serde(default)]
    pub post_move: PostMoveConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Collection url, e.g. `https://dev.example.com/org`.
    pub url: String,
    pub project: String,
    /// Record selection query. Only read for the source endpoint.
    #[serde(default)]
    pub query: Option<String>,
    /// Name of the env var holding the personal access token.
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Records per batch write (default: 50).
    pub size: usize,
    /// Batches processed concurrently (default: 4).
    pub parallelism: usize,
    /// Attempts per network operation, including the first (default: 5).
    pub max_attempts: u32,
    /// Linear backoff increment between attempts (default: 1000ms).
    pub backoff_step_ms: u64,
    /// Per-request timeout, meant to catch hangs (default: 1h).
    pub request_timeout_secs: u64,
    /// Query the target for duplicates before retrying a failed create batch.
    pub verify_on_create_failure: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 50,
            parallelism: 4,
            max_attempts: 5,
            backoff_step_ms: 1000,
            request_timeout_secs: 3600,
            verify_on_create_failure: true,
        }
    }
}

impl BatchConfig {
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseToggles {
    pub core_fields: bool,
    pub relations: bool,
    pub post_move: bool,
}

impl Default for PhaseToggles {
    fn default() -> Self {
        Self {
            core_fields: true,
            relations: true,
            post_move: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationToggles {
    /// Work item to work item links.
    pub links: bool,
    /// Hyperlinks and artifact links other than the cross-reference.
    pub remote_links: bool,
    /// Attached files, re-uploaded to the target.
    pub attachments: bool,
}

impl Default for RelationToggles {
    fn default() -> Self {
        Self {
            links: true,
            remote_links: true,
            attachments: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    /// Source fields never copied.
    pub ignored: Vec<String>,
    /// Field renames applied before writing.
    pub replacements: Vec<FieldReplacement>,
    /// Per-field value translation, keyed by the target field name.
    pub value_maps: HashMap<String, HashMap<String, String>>,
    /// Literal text substitutions applied to string field values.
    pub content_substitutions: Vec<ContentSubstitution>,
    /// Transfer images embedded in rich text fields and rewrite their urls.
    pub inline_images: bool,
    /// Tag added to every record written on the target.
    pub target_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldReplacement {
    pub source: String,
    /// `None` drops the field.
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSubstitution {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostMoveConfig {
    /// Tag written back onto successfully migrated source records.
    pub source_tag: String,
}

impl Default for PostMoveConfig {
    fn default() -> Self {
        Self {
            source_tag: "migrated".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Directory receiving raw request/response dumps of failed batches.
    pub dir: Option<PathBuf>,
}

impl MigrationConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        raw.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let source_url = parse_url("source", &self.source.url)?;
        let target_url = parse_url("target", &self.target.url)?;

        if self.source.project.trim().is_empty() || self.target.project.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "source.project and target.project must be set".to_string(),
            ));
        }
        if self
            .source
            .query
            .as_deref()
            .is_none_or(|query| query.trim().is_empty())
        {
            return Err(ConfigError::Invalid("source.query must be set".to_string()));
        }
        if source_url == target_url && self.source.project.eq_ignore_ascii_case(&self.target.project)
        {
            return Err(ConfigError::Invalid(
                "source and target must not be the same project".to_string(),
            ));
        }
        if self.batch.size == 0 || self.batch.size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "batch.size must be in [1, {MAX_BATCH_SIZE}], got {}",
                self.batch.size
            )));
        }
        if self.batch.parallelism == 0 {
            return Err(ConfigError::Invalid("batch.parallelism must be > 0".to_string()));
        }
        if self.batch.max_attempts == 0 {
            return Err(ConfigError::Invalid("batch.max_attempts must be > 0".to_string()));
        }
        if self.phases.post_move && self.post_move.source_tag.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "post_move.source_tag must be set when phases.post_move is enabled".to_string(),
            ));
        }
        for replacement in &self.fields.replacements {
            if replacement.source.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "fields.replacements entries need a source field".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn source_token(&self) -> Result<String, ConfigError> {
        read_token(self.source.token_env.as_deref(), "FERRY_SOURCE_TOKEN")
    }

    pub fn target_token(&self) -> Result<String, ConfigError> {
        read_token(self.target.token_env.as_deref(), "FERRY_TARGET_TOKEN")
    }
}

impl std::str::FromStr for MigrationConfig {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(raw)?)
    }
}

fn parse_url(section: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { section, source })
}

fn read_token(name: Option<&str>, default_name: &str) -> Result<String, ConfigError> {
    let name = name.unwrap_or(default_name);
    env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [source]
        url = "https://dev.example.com/old"
        project = "Legacy"
        query = "SELECT [System.Id] FROM WorkItems"

        [target]
        url = "https://dev.example.com/new"
        project = "Platform"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: MigrationConfig = MINIMAL.parse().unwrap();
        assert_eq!(config.batch.size, 50);
        assert_eq!(config.batch.parallelism, 4);
        assert_eq!(config.batch.request_timeout(), Duration::from_secs(3600));
        assert!(config.batch.verify_on_create_failure);
        assert!(config.phases.relations);
        assert!(!config.relations.attachments);
        assert_eq!(config.post_move.source_tag, "migrated");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_field_rules() {
        let raw = format!(
            "{MINIMAL}
            [fields]
            ignored = [\"Custom.Secret\"]
            replacements = [{{ source = \"Custom.Old\", target = \"Custom.New\" }}, {{ source = \"Custom.Gone\" }}]
            target_tag = \"imported\"

            [fields.value_maps.\"System.State\"]
            Doing = \"Active\"
            "
        );
        let config: MigrationConfig = raw.parse().unwrap();
        assert_eq!(config.fields.ignored, vec!["Custom.Secret".to_string()]);
        assert_eq!(config.fields.replacements[1].target, None);
        assert_eq!(
            config.fields.value_maps["System.State"]["Doing"],
            "Active".to_string()
        );
        assert_eq!(config.fields.target_tag.as_deref(), Some("imported"));
    }

    #[test]
    fn rejects_out_of_range_batch_settings() {
        let mut config: MigrationConfig = MINIMAL.parse().unwrap();
        config.batch.size = MAX_BATCH_SIZE + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config: MigrationConfig = MINIMAL.parse().unwrap();
        config.batch.parallelism = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_same_source_and_target_project() {
        let mut config: MigrationConfig = MINIMAL.parse().unwrap();
        config.target.url = config.source.url.clone();
        config.target.project = "legacy".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_missing_query_and_bad_urls() {
        let mut config: MigrationConfig = MINIMAL.parse().unwrap();
        config.source.query = None;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config: MigrationConfig = MINIMAL.parse().unwrap();
        config.target.url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { section: "target", .. })
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = MigrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.target.project, "Platform");
        assert!(matches!(
            MigrationConfig::from_file("/definitely/not/here.toml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
