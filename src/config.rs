//! Catalog configuration for databrew
//!
//! The catalog is a TOML file naming the datasets to mirror. It is found by
//! searching, in order, the `--catalog` argument, the `DATABREW_CATALOG`
//! environment variable, `./databrew.toml`, `./catalog.toml` and the user
//! config directory. `databrew init` writes a commented starting catalog.
//!
//! ```toml
//! [settings]
//! auto_download = false
//! jobs = 1
//! request_timeout = "5m"
//!
//! [vars]
//! DATA = "~/data"
//!
//! [records.sst]
//! url = "ftp://ftp.example.org/sst/{t:%Y}/sst_{t:%Y%m%d}*.nc"
//! local_store = "{DATA}/sst/{t:%Y}/sst_{t:%Y%m%d}.nc"
//! ```
//!
//! Upper-case `[vars]` are substituted into every record's templates before
//! the templates are validated.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::pairs::check_template_alignment;
use crate::app::remote::{check_host, BackendConnector, Credentials, Protocol, RemoteSettings};
use crate::app::template::{expand_home, PathTemplate};
use crate::app::{Record, RecordSettings};
use crate::constants::{cds, env, files, http, workers};
use crate::errors::{ConfigError, ConfigResult, Result, TemplateError};

/// Catalog file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    /// Settings shared by all records
    #[serde(default)]
    pub settings: CatalogSettings,
    /// Values substituted for `{NAME}` fields in templates
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Records by name
    #[serde(default)]
    pub records: BTreeMap<String, RecordConfig>,
    /// File the catalog was read from
    #[serde(skip)]
    source: Option<PathBuf>,
}

/// `[settings]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogSettings {
    /// Fetch missing files without asking
    pub auto_download: bool,
    /// Parallel connections per fetch
    pub jobs: usize,
    /// Draw progress bars on a terminal
    pub show_progress: bool,
    /// Interval between Climate Data Store task polls
    #[serde(with = "humantime_serde")]
    pub cds_poll_interval: Duration,
    /// Give up on a Climate Data Store task still pending after this long
    #[serde(with = "humantime_serde")]
    pub cds_max_wait: Duration,
    /// Whole-request timeout for HTTP and CDS transfers
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            auto_download: false,
            jobs: workers::DEFAULT_JOBS,
            show_progress: true,
            cds_poll_interval: cds::DEFAULT_POLL_INTERVAL,
            cds_max_wait: cds::DEFAULT_MAX_WAIT,
            request_timeout: http::DEFAULT_TIMEOUT,
        }
    }
}

impl CatalogSettings {
    pub fn record_settings(&self) -> RecordSettings {
        RecordSettings {
            auto_download: self.auto_download,
            jobs: self.jobs,
            show_progress: self.show_progress,
        }
    }
}

/// `[records.<name>]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordConfig {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    /// Variables held in each file
    #[serde(default)]
    pub variables: Vec<String>,
    /// Remote URL template
    pub url: String,
    /// Local path template
    pub local_store: String,
    #[serde(default)]
    pub login: Option<LoginConfig>,
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineConfig>,
}

/// `[records.<name>.login]` table
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoginConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable holding the password
    pub password_env: Option<String>,
    pub port: Option<u16>,
}

impl std::fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_env", &self.password_env)
            .field("port", &self.port)
            .finish()
    }
}

/// `[records.<name>.pipelines.<pipe>]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Where the processed output of each file is written
    pub data_path: String,
}

/// Validated templates of one record
#[derive(Debug, Clone)]
pub struct RecordTemplates {
    pub remote: PathTemplate,
    pub local: PathTemplate,
    pub pipelines: BTreeMap<String, PathTemplate>,
}

impl Catalog {
    /// Find, read and validate the catalog
    pub async fn load(catalog_override: Option<PathBuf>) -> Result<Self> {
        let path = match catalog_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path }.into());
                }
                path
            }
            None => Self::find_catalog_file()?,
        };

        debug!("Loading catalog from: {}", path.display());
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;

        let mut catalog = Self::from_toml_str(&content)?;
        catalog.source = Some(path.clone());
        info!(
            "Loaded {} record{} from {}",
            catalog.records.len(),
            if catalog.records.len() == 1 { "" } else { "s" },
            path.display()
        );
        Ok(catalog)
    }

    /// Parse and validate catalog text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let catalog: Catalog = toml::from_str(content).map_err(ConfigError::from)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// File the catalog was loaded from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Check settings and every record
    pub fn validate(&self) -> Result<()> {
        if self.settings.jobs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "settings.jobs".into(),
                value: "0".into(),
                reason: "at least one job is needed".into(),
            }
            .into());
        }
        if let Some(name) = self.vars.keys().find(|k| k.to_uppercase() != **k) {
            return Err(ConfigError::InvalidValue {
                field: format!("vars.{name}"),
                value: name.clone(),
                reason: "variable names must be upper case".into(),
            }
            .into());
        }
        for name in self.records.keys() {
            self.templates(name)?;
        }
        Ok(())
    }

    pub fn record_names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn record_config(&self, name: &str) -> ConfigResult<&RecordConfig> {
        self.records.get(name).ok_or_else(|| ConfigError::UnknownRecord {
            name: name.to_string(),
            available: self.records.keys().cloned().collect(),
        })
    }

    /// Parse a record's templates with catalog variables substituted
    pub fn templates(&self, name: &str) -> Result<RecordTemplates> {
        let config = self.record_config(name)?;

        Protocol::from_url(&config.url)?;
        check_host(&config.url)?;

        let remote = self.template(name, &config.url)?;
        let local = self.template(name, &config.local_store)?;
        check_template_alignment(&[&remote, &local])?;

        let mut pipelines = BTreeMap::new();
        for (pipe, pipeline) in &config.pipelines {
            let data = self.template(name, &pipeline.data_path)?;
            check_template_alignment(&[&remote, &local, &data])?;
            pipelines.insert(pipe.clone(), data);
        }

        Ok(RecordTemplates {
            remote,
            local,
            pipelines,
        })
    }

    fn template(&self, record: &str, raw: &str) -> ConfigResult<PathTemplate> {
        let wrap = |source: TemplateError| ConfigError::Template {
            record: record.to_string(),
            source,
        };

        let vars: HashMap<String, String> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let filled = PathTemplate::new(raw).map_err(wrap)?.fill(&vars);
        if let Some(field) = filled.unfilled_fields().first() {
            return Err(wrap(TemplateError::UnresolvedField {
                template: raw.to_string(),
                field: field.to_string(),
            }));
        }
        PathTemplate::new(expand_home(filled.as_str())).map_err(wrap)
    }

    /// Credentials of a record, reading `password_env` from the environment
    pub fn credentials(&self, name: &str) -> ConfigResult<Credentials> {
        let config = self.record_config(name)?;
        let Some(login) = &config.login else {
            return Ok(Credentials::anonymous());
        };

        let password = match (&login.password, &login.password_env) {
            (Some(password), _) => password.clone(),
            (None, Some(var)) => {
                std::env::var(var).map_err(|_| ConfigError::MissingPasswordEnv {
                    record: name.to_string(),
                    var: var.clone(),
                })?
            }
            (None, None) => String::new(),
        };

        let anonymous = Credentials::anonymous();
        Ok(Credentials {
            username: login.username.clone().unwrap_or(anonymous.username),
            password,
            port: login.port,
        })
    }

    /// Build a ready-to-use record
    pub fn build_record(&self, name: &str) -> Result<Record> {
        let templates = self.templates(name)?;
        let credentials = self.credentials(name)?;

        let mut settings = RemoteSettings::for_url(templates.remote.as_str(), credentials)?;
        settings.request_timeout = self.settings.request_timeout;
        settings.cds_poll_interval = self.settings.cds_poll_interval;
        settings.cds_max_wait = self.settings.cds_max_wait;

        let mut record = Record::new(
            name,
            templates.remote,
            templates.local,
            Arc::new(BackendConnector::new(settings)),
        )?
        .with_settings(self.settings.record_settings());
        for (pipe, data) in templates.pipelines {
            record = record.with_pipeline(pipe, data)?;
        }
        Ok(record)
    }

    /// Write the default catalog unless one exists; returns its path
    pub async fn initialize_first_run(target: Option<PathBuf>) -> Result<PathBuf> {
        let path = match target {
            Some(path) => path,
            None => Self::default_catalog_path()?,
        };
        if path.exists() {
            info!("Catalog already exists: {}", path.display());
            return Ok(path);
        }

        info!("Creating default catalog...");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, Self::generate_default_catalog_content())
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;

        println!("📁 Created default catalog:");
        println!("   {}", path.display());
        println!("   Add records by editing this file.");
        println!();
        Ok(path)
    }

    fn find_catalog_file() -> Result<PathBuf> {
        let mut search_paths = Vec::new();
        if let Ok(path) = std::env::var(env::CATALOG) {
            search_paths.push(PathBuf::from(path));
        }
        search_paths.extend(files::CATALOG_FILE_NAMES.iter().map(PathBuf::from));
        if let Ok(path) = Self::default_catalog_path() {
            search_paths.push(path);
        }

        for path in &search_paths {
            if path.exists() {
                debug!("Found catalog file: {}", path.display());
                return Ok(path.clone());
            }
        }

        debug!("No catalog found in standard locations");
        Err(ConfigError::NotFound {
            path: search_paths
                .last()
                .cloned()
                .unwrap_or_else(|| PathBuf::from(files::CATALOG_FILE)),
        }
        .into())
    }

    /// Catalog path in the user config directory
    pub fn default_catalog_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::InvalidValue {
            field: "config_dir".into(),
            value: String::new(),
            reason: "could not determine user config directory".into(),
        })?;
        Ok(config_dir
            .join(files::CONFIG_DIR_NAME)
            .join(files::CATALOG_FILE))
    }

    fn generate_default_catalog_content() -> String {
        format!(
            r#"# databrew catalog
# Each [records.<name>] table maps a remote URL template to a local path
# template. Dates are written as {{t:<strftime>}}, e.g. {{t:%Y%m%d}}.
# Upper-case [vars] are substituted into every template as {{NAME}}.

[settings]
# Fetch missing files without asking
auto_download = false
# Parallel connections per fetch (capped at CPUs - 1)
jobs = {jobs}
show_progress = true
cds_poll_interval = "{poll}"
cds_max_wait = "{max_wait}"
request_timeout = "{timeout}"

[vars]
DATA = "~/data"

[records.oisst]
description = "NOAA 1/4 degree daily Optimum Interpolation Sea Surface Temperature v2.1"
doi = "https://doi.org/10.25921/RE9P-PT57"
variables = ["sst", "anom", "err", "ice"]
url = "https://www.ncei.noaa.gov/data/sea-surface-temperature-optimum-interpolation/v2.1/access/avhrr/{{t:%Y%m}}/oisst-avhrr-v02r01.{{t:%Y%m%d}}.nc"
local_store = "{{DATA}}/oisst/{{t:%Y}}/oisst-avhrr-v02r01.{{t:%Y%m%d}}.nc"

# [records.era5_wind]
# url = "cds://cds.climate.copernicus.eu/reanalysis-era5-single-levels?year={{t:%Y}}&month={{t:%m}}"
# local_store = "{{DATA}}/era5/era5_wind_{{t:%Y%m}}.nc"
# [records.era5_wind.login]
# username = "12345"
# password_env = "CDS_API_KEY"

# [records.smos]
# url = "ftp://ftp.example.org/smos/{{t:%Y}}/SMOS_L4_{{t:%Y%m%d}}*.nc"
# local_store = "{{DATA}}/smos/{{t:%Y}}/SMOS_L4_{{t:%Y%m%d}}.nc"
# [records.smos.pipelines.monthly]
# data_path = "{{DATA}}/smos/processed/{{t:%Y%m%d}}.nc"
"#,
            jobs = workers::DEFAULT_JOBS,
            poll = format!("{}s", cds::DEFAULT_POLL_INTERVAL.as_secs()),
            max_wait = format!("{}s", cds::DEFAULT_MAX_WAIT.as_secs()),
            timeout = format!("{}s", http::DEFAULT_TIMEOUT.as_secs()),
        )
    }
}
