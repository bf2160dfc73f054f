//! On-disk persistence of the OAuth credential.
//!
//! One JSON record per user, owner-only permissions. Every failure here is soft: it is
//! logged and reported as "no credential", which forces a fresh authentication instead
//! of aborting the process.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;

use crate::auth::credential::Credential;

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    endpoint: String,
}

impl TokenStore {
    /// `endpoint` is the Caido base URL credentials are scoped to.
    pub fn new(path: PathBuf, endpoint: impl Into<String>) -> Self {
        Self {
            path,
            endpoint: endpoint.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Overwrite the stored credential, tagged with the active endpoint.
    pub fn save(&self, credential: &Credential) {
        let record = Credential {
            source_endpoint: self.endpoint.clone(),
            saved_at: Utc::now(),
            ..credential.clone()
        };
        match self.write_record(&record) {
            Ok(()) => tracing::info!(path = %self.path.display(), "Token saved to disk"),
            Err(err) => tracing::error!(
                path = %self.path.display(),
                "Failed to save token to disk: {err}"
            ),
        }
    }

    /// Load the stored credential if it was issued for the active endpoint.
    pub fn load(&self) -> Option<Credential> {
        match self.read_record() {
            Ok(Some(record)) if record.source_endpoint == self.endpoint => {
                tracing::info!("Loaded saved token from disk");
                Some(record)
            }
            Ok(Some(record)) => {
                tracing::info!(
                    "Saved token is for {}, current instance is {} - skipping",
                    record.source_endpoint,
                    self.endpoint
                );
                None
            }
            Ok(None) => {
                tracing::debug!("No saved token file found");
                None
            }
            Err(err) => {
                tracing::error!(
                    path = %self.path.display(),
                    "Failed to load token from disk: {err}"
                );
                None
            }
        }
    }

    fn write_record(&self, record: &Credential) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
                }
            }
        }

        let mut options = fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        #[cfg(unix)]
        {
            // mode() only applies on creation
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_record(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }
}
