use std::fmt;
use std::path::Path;

use crate::error::IngestError;

/// Portal/database login loaded once per run from an `identity|secret` file.
#[derive(Clone)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IngestError::source_unavailable(path.display().to_string(), e))?;
        Self::parse(&raw).ok_or_else(|| {
            IngestError::Configuration(format!(
                "{} must contain 'identity|secret'",
                path.display()
            ))
        })
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let line = raw.lines().next()?;
        let (identity, secret) = line.split_once('|')?;
        let identity = identity.trim();
        if identity.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Credentials {
            identity: identity.to_string(),
            secret: secret.trim_end_matches(['\r', '\n']).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipe_separated_pair() {
        let c = Credentials::parse("jdoe|s3cr|et\n").unwrap();
        assert_eq!(c.identity, "jdoe");
        assert_eq!(c.secret, "s3cr|et");
    }

    #[test]
    fn rejects_incomplete() {
        assert!(Credentials::parse("jdoe").is_none());
        assert!(Credentials::parse("|secret").is_none());
        assert!(Credentials::parse("jdoe|").is_none());
        assert!(Credentials::parse("").is_none());
    }

    #[test]
    fn debug_hides_secret() {
        let c = Credentials::parse("jdoe|hunter2").unwrap();
        assert!(!format!("{:?}", c).contains("hunter2"));
    }

    #[test]
    fn load_missing_file() {
        let err = Credentials::load(Path::new("/nonexistent/login.bin")).unwrap_err();
        assert!(matches!(err, IngestError::SourceUnavailable { .. }));
    }
}
