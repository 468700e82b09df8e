use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::CredentialError;

const SERVICE_ACCOUNT: &str = "service_account";

#[derive(Deserialize)]
struct ServiceAccountKey {
    #[serde(rename = "type")]
    key_type: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
    project_id: Option<String>,
}

/// A validated service account key file.
///
/// Only the location of the key and the principal it names are kept; the
/// private key is handed to the authentication backend straight from the file.
#[derive(Clone)]
pub struct Credentials {
    path: PathBuf,
    client_email: String,
    project_id: Option<String>,
}

impl Credentials {
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref().to_path_buf();

        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound { path });
            }
            Err(source) => return Err(CredentialError::Unreadable { path, source }),
        };

        let key: ServiceAccountKey = serde_json::from_slice(&contents).map_err(|err| {
            CredentialError::Malformed {
                path: path.clone(),
                // serde_json reports position only, never the offending text
                reason: format!("invalid JSON at line {} column {}", err.line(), err.column()),
            }
        })?;

        let malformed = |reason: &str| CredentialError::Malformed {
            path: path.clone(),
            reason: reason.to_string(),
        };

        if key.key_type.as_deref() != Some(SERVICE_ACCOUNT) {
            return Err(malformed("\"type\" must be \"service_account\""));
        }
        let client_email = key
            .client_email
            .filter(|email| !email.is_empty())
            .ok_or_else(|| malformed("\"client_email\" is missing"))?;
        if key.private_key.map_or(true, |private_key| private_key.is_empty()) {
            return Err(malformed("\"private_key\" is missing"));
        }

        log::debug!("loaded service account key for {client_email}");

        Ok(Self {
            path,
            client_email,
            project_id: key.project_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The service account the key authenticates as.
    pub fn principal(&self) -> &str {
        &self.client_email
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("path", &self.path)
            .field("principal", &self.client_email)
            .finish_non_exhaustive()
    }
}
