use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::IngestError;

/// Runtime settings: defaults, then `ingest.toml` (or `--config`), then `PQ_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub congress_dir: PathBuf,
    pub news_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub accept_unterminated_body: bool,
    pub portal: PortalSettings,
}

/// Timeouts and login details for the document portal.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalSettings {
    pub login_timeout_secs: u64,
    pub account_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub field_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub login_attempts: u32,
    pub account_name: String,
    pub user_agent: String,
}

impl PortalSettings {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn account_timeout(&self) -> Duration {
        Duration::from_secs(self.account_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn field_timeout(&self) -> Duration {
        Duration::from_secs(self.field_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, IngestError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name("ingest").required(false),
        };
        let settings = Config::builder()
            .set_default("db_path", "data/proquest.sqlite")?
            .set_default("congress_dir", "data/congress")?
            .set_default("news_dir", "data/news")?
            .set_default("credentials_path", "login.bin")?
            .set_default("log_level", "info")?
            .set_default("accept_unterminated_body", true)?
            .set_default("portal.login_timeout_secs", 10)?
            .set_default("portal.account_timeout_secs", 30)?
            .set_default("portal.page_timeout_secs", 30)?
            .set_default("portal.field_timeout_secs", 5)?
            .set_default("portal.poll_interval_ms", 500)?
            .set_default("portal.login_attempts", 3)?
            .set_default("portal.account_name", "WASHINGTON STATE UNIVERSITY")?
            .set_default(
                "portal.user_agent",
                concat!("proquest_ingest/", env!("CARGO_PKG_VERSION")),
            )?
            .add_source(file)
            .add_source(
                Environment::with_prefix("PQ")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let settings: Settings = settings.try_deserialize()?;
        if settings.portal.login_attempts == 0 {
            return Err(IngestError::Configuration(
                "portal.login_attempts must be at least 1".into(),
            ));
        }
        Ok(settings)
    }
}

impl From<config::ConfigError> for IngestError {
    fn from(e: config::ConfigError) -> Self {
        IngestError::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(&path, "").unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.news_dir, PathBuf::from("data/news"));
        assert_eq!(s.portal.field_timeout(), Duration::from_secs(5));
        assert_eq!(s.portal.page_timeout(), Duration::from_secs(30));
        assert!(s.accept_unterminated_body);
        assert!(s.log_file.is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "db_path = \"/tmp/x.sqlite\"\naccept_unterminated_body = false\n[portal]\nfield_timeout_secs = 12\n",
        )
        .unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.db_path, PathBuf::from("/tmp/x.sqlite"));
        assert!(!s.accept_unterminated_body);
        assert_eq!(s.portal.field_timeout_secs, 12);
        assert_eq!(s.portal.login_attempts, 3);
    }

    #[test]
    fn zero_login_attempts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[portal]\nlogin_attempts = 0\n").unwrap();
        assert!(matches!(
            Settings::load(Some(&path)),
            Err(IngestError::Configuration(_))
        ));
    }

    #[test]
    fn missing_explicit_file_is_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/ingest.toml"))).is_err());
    }
}
