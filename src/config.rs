use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::EvidenceSource;
use crate::error::LoaderError;

pub const DEFAULT_CONFIG_FILE: &str = "imicrobe-load.json";
pub const DEFAULT_KEGG_BASE_URL: &str = "https://rest.kegg.jp";
pub const DEFAULT_PFAM_URL: &str =
    "https://ftp.ebi.ac.uk/pub/databases/Pfam/current_release/database_files/pfamA.txt.gz";
// KEGG `get` accepts at most ten entries per request.
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_REFERENCE_GROUP_SIZE: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    SkipBatch,
    Abort,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub kegg_base_url: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default)]
    pub sample_limit: Option<usize>,
    #[serde(default)]
    pub evidence_source: Option<EvidenceSource>,
    #[serde(default)]
    pub pfam_file: Option<String>,
    #[serde(default)]
    pub pfam_url: Option<String>,
    #[serde(default)]
    pub reference_group_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database: Utf8PathBuf,
    pub kegg_base_url: String,
    pub batch_size: usize,
    pub failure_policy: FailurePolicy,
    pub sample_limit: Option<usize>,
    pub evidence_source: EvidenceSource,
    pub pfam_file: Utf8PathBuf,
    pub pfam_url: String,
    pub reference_group_size: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, LoaderError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !config_path.as_std_path().exists() {
            if path.is_some() {
                return Err(LoaderError::MissingConfig(config_path.into_std_path_buf()));
            }
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| LoaderError::ConfigRead(config_path.clone().into_std_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| LoaderError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, LoaderError> {
        let batch_size = config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(LoaderError::ConfigParse(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let reference_group_size = config
            .reference_group_size
            .unwrap_or(DEFAULT_REFERENCE_GROUP_SIZE);
        if reference_group_size == 0 {
            return Err(LoaderError::ConfigParse(
                "reference_group_size must be at least 1".to_string(),
            ));
        }

        let database = match config.database {
            Some(path) => Utf8PathBuf::from(path),
            None => default_data_dir()?.join("imicrobe.sqlite"),
        };
        let pfam_file = match config.pfam_file {
            Some(path) => Utf8PathBuf::from(path),
            None => default_data_dir()?.join("pfamA.txt.gz"),
        };

        Ok(ResolvedConfig {
            database,
            kegg_base_url: config
                .kegg_base_url
                .unwrap_or_else(|| DEFAULT_KEGG_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            batch_size,
            failure_policy: config.failure_policy.unwrap_or_default(),
            sample_limit: config.sample_limit,
            evidence_source: config.evidence_source.unwrap_or(EvidenceSource::UProC),
            pfam_file,
            pfam_url: config.pfam_url.unwrap_or_else(|| DEFAULT_PFAM_URL.to_string()),
            reference_group_size,
        })
    }
}

impl ResolvedConfig {
    pub fn with_database(mut self, database: Option<&Utf8Path>) -> Self {
        if let Some(database) = database {
            self.database = database.to_path_buf();
        }
        self
    }
}

pub fn default_data_dir() -> Result<Utf8PathBuf, LoaderError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("imicrobe-loader")).ok()
        })
        .ok_or_else(|| LoaderError::Filesystem("unable to resolve cache directory".to_string()))
}
