use std::path::Path;

use crate::error::RunError;

/// Cloud-init document handed to the droplet at first boot, verbatim.
///
/// The droplet API carries `user_data` as a JSON string, so the file must
/// be valid UTF-8; anything else fails like an unreadable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData(pub String);

impl UserData {
    pub async fn load(path: &Path) -> Result<Self, RunError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RunError::ReadUserData {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "loaded user data");
        Ok(Self(content))
    }
}
