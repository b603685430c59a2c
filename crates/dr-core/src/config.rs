//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! server, conversion, engine, cleanup and delivery sections. Every section
//! defaults sensibly so a completely empty file is valid.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Extra time allowed on top of the per-engine budgets before a whole job is
/// declared timed out.
const JOB_TIMEOUT_SLACK_SECS: u64 = 10;

/// Locations searched when no config path is given, in order.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "./docrelay.toml",
    "./config.toml",
    "~/.config/docrelay/config.toml",
    "/etc/docrelay/config.toml",
];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub conversion: ConversionConfig,
    pub engines: EnginesConfig,
    pub cleanup: CleanupConfig,
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Parse a `Config` from a TOML string without validating it.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("parse error: {e}")))
    }

    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `custom_path`, else the first default location that exists,
    /// else built-in defaults.
    pub fn load_or_default(custom_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = custom_path {
            return Self::load(path);
        }

        for path_str in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(path_str);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                tracing::debug!("Using config file {}", path.display());
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Check for settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.conversion.max_workers == 0 {
            return Err(Error::Config("conversion.max_workers must be at least 1".into()));
        }
        if self.conversion.timeout_secs == 0 {
            return Err(Error::Config("conversion.timeout_secs must be at least 1".into()));
        }
        if self.conversion.input_extensions.is_empty() {
            return Err(Error::Config(
                "conversion.input_extensions must list at least one extension".into(),
            ));
        }
        if self.cleanup.max_age_secs == 0 {
            return Err(Error::Config("cleanup.max_age_secs must be at least 1".into()));
        }
        if self.cleanup.interval_secs == 0 {
            return Err(Error::Config("cleanup.interval_secs must be at least 1".into()));
        }
        if self.delivery.multiplier == 0 {
            return Err(Error::Config("delivery.multiplier must be at least 1".into()));
        }
        for (name, template) in &self.delivery.endpoints {
            if !template.contains("{base}") {
                return Err(Error::Config(format!(
                    "delivery.endpoints.{name} must contain {{base}}"
                )));
            }
        }
        if !self
            .delivery
            .endpoints
            .contains_key(&self.delivery.default_endpoint)
        {
            return Err(Error::Config(format!(
                "delivery.default_endpoint '{}' is not defined in delivery.endpoints",
                self.delivery.default_endpoint
            )));
        }
        Ok(())
    }

    /// Non-fatal issues worth logging at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }
        if self.conversion.max_workers > 15 {
            warnings.push(format!(
                "conversion.max_workers is {}; LibreOffice degrades above 15-20 concurrent instances",
                self.conversion.max_workers
            ));
        }
        if self.cleanup.interval_secs > self.cleanup.max_age_secs {
            warnings.push(
                "cleanup.interval_secs exceeds cleanup.max_age_secs; jobs will outlive their max age"
                    .into(),
            );
        }
        if self.engines.order.is_empty() {
            warnings.push("engines.order is empty; every job will fail".into());
        }
        if let Some(ref p) = self.engines.libreoffice_path {
            if !p.exists() {
                warnings.push(format!(
                    "engines.libreoffice_path does not exist: {}",
                    p.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

// ---------------------------------------------------------------------------
// ConversionConfig
// ---------------------------------------------------------------------------

/// Worker pool, upload limits and artifact storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Number of concurrent conversion slots.
    pub max_workers: usize,
    /// Wall-clock budget for a single engine attempt.
    pub timeout_secs: u64,
    /// Budget for a whole job's fallback chain. Derived from
    /// `timeout_secs` and the engine count when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,
    pub max_upload_bytes: u64,
    /// Accepted input extensions, without the leading dot.
    pub input_extensions: Vec<String>,
    /// Directory holding per-job input and output files.
    pub artifact_dir: PathBuf,
    /// Assumed conversion time used for wait estimates before any job has
    /// finished.
    pub estimated_job_secs: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            timeout_secs: 60,
            job_timeout_secs: None,
            max_upload_bytes: 50 * 1024 * 1024,
            input_extensions: vec!["docx".into()],
            artifact_dir: std::env::temp_dir().join("docrelay"),
            estimated_job_secs: 30,
        }
    }
}

impl ConversionConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Overall budget for a job that may try `engine_count` engines.
    pub fn job_timeout(&self, engine_count: usize) -> Duration {
        let secs = self.job_timeout_secs.unwrap_or_else(|| {
            self.timeout_secs * engine_count.max(1) as u64 + JOB_TIMEOUT_SLACK_SECS
        });
        Duration::from_secs(secs)
    }

    /// Case-insensitive extension check.
    pub fn accepts(&self, filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.input_extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    /// Accepted extensions formatted for error messages, e.g. `.docx, .doc`.
    pub fn expected_extensions(&self) -> String {
        self.input_extensions
            .iter()
            .map(|e| format!(".{}", e.trim_start_matches('.')))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ---------------------------------------------------------------------------
// EnginesConfig
// ---------------------------------------------------------------------------

/// The conversion engines docrelay knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// LibreOffice in headless mode.
    LibreOffice,
    /// The `docx2pdf` CLI, which drives Microsoft Word.
    Docx2Pdf,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::LibreOffice => "libreoffice",
            EngineKind::Docx2Pdf => "docx2pdf",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine priority and executable overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    /// Engines in the order they are tried.
    pub order: Vec<EngineKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libreoffice_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docx2pdf_path: Option<PathBuf>,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            order: vec![EngineKind::LibreOffice, EngineKind::Docx2Pdf],
            libreoffice_path: None,
            docx2pdf_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CleanupConfig
// ---------------------------------------------------------------------------

/// Reaper schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_secs: u64,
    /// Jobs older than this are removed regardless of status.
    pub max_age_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            max_age_secs: 3600,
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

// ---------------------------------------------------------------------------
// DeliveryConfig
// ---------------------------------------------------------------------------

/// Callback upload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// JSON field that must be truthy in a 2xx response body.
    pub confirmation_key: String,
    /// Variant used when a submission does not name one.
    pub default_endpoint: String,
    /// URL templates keyed by variant name. Placeholders: `{base}`, `{id}`,
    /// `{token}`.
    pub endpoints: BTreeMap<String, String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert("direct".to_string(), "{base}".to_string());
        endpoints.insert(
            "document".to_string(),
            "{base}/documents/{token}/pdf".to_string(),
        );
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            multiplier: 2,
            max_delay_ms: 60_000,
            request_timeout_secs: 30,
            confirmation_key: "success".into(),
            default_endpoint: "direct".into(),
            endpoints,
        }
    }
}

impl DeliveryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.conversion.max_workers, 4);
        assert_eq!(config.conversion.timeout_secs, 60);
        assert_eq!(config.conversion.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.cleanup.interval_secs, 600);
        assert_eq!(config.cleanup.max_age_secs, 3600);
        assert_eq!(config.delivery.max_retries, 3);
        assert_eq!(
            config.engines.order,
            vec![EngineKind::LibreOffice, EngineKind::Docx2Pdf]
        );
        assert!(config.validate().is_ok());
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [conversion]
            max_workers = 8

            [engines]
            order = ["docx2pdf"]
            "#,
        )
        .unwrap();
        assert_eq!(config.conversion.max_workers, 8);
        assert_eq!(config.conversion.timeout_secs, 60);
        assert_eq!(config.engines.order, vec![EngineKind::Docx2Pdf]);
    }

    #[test]
    fn unknown_engine_is_parse_error() {
        let err = Config::from_toml("[engines]\norder = [\"pandoc\"]").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.conversion.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_undefined_default_endpoint() {
        let mut config = Config::default();
        config.delivery.default_endpoint = "missing".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_template_without_base() {
        let mut config = Config::default();
        config
            .delivery
            .endpoints
            .insert("bad".into(), "http://elsewhere/{id}".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn warns_on_many_workers() {
        let mut config = Config::default();
        config.conversion.max_workers = 24;
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("max_workers"));
    }

    #[test]
    fn job_timeout_derivation() {
        let mut conversion = ConversionConfig::default();
        assert_eq!(conversion.job_timeout(2), Duration::from_secs(130));
        assert_eq!(conversion.job_timeout(0), Duration::from_secs(70));
        conversion.job_timeout_secs = Some(5);
        assert_eq!(conversion.job_timeout(2), Duration::from_secs(5));
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let conversion = ConversionConfig::default();
        assert!(conversion.accepts("Report.DOCX"));
        assert!(conversion.accepts("a.b.docx"));
        assert!(!conversion.accepts("report.doc"));
        assert!(!conversion.accepts("docx"));
        assert_eq!(conversion.expected_extensions(), ".docx");
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docrelay.toml");
        std::fs::write(&path, "[server]\nport = 9100\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 9100);

        let loaded = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.server.port, 9100);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = Config::load(Path::new("/nonexistent/docrelay.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
