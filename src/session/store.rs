//! On-disk session store
//!
//! Maps session ids to directories under the temp root and resolves upload
//! file paths. Path resolution enforces lexical containment: a filename must
//! be a single normal path component, so the resulting path always stays
//! under `<temp_root>/<session_id>/`.

use std::path::{Component, Path, PathBuf};

use crate::error::BitsError;
use crate::session::SessionId;

/// Filesystem-backed session registry.
#[derive(Debug, Clone)]
pub struct SessionStore {
    temp_root: PathBuf,
}

impl SessionStore {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }

    /// Directory backing the given session.
    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.temp_root.join(id.to_string())
    }

    /// Mints a session id and creates its directory.
    pub async fn create(&self) -> Result<(SessionId, PathBuf), BitsError> {
        let id = SessionId::mint();
        let dir = self.session_dir(&id);

        tokio::fs::create_dir_all(&dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok((id, dir))
    }

    /// Whether the session's directory exists.
    pub async fn exists(&self, id: &SessionId) -> bool {
        tokio::fs::metadata(self.session_dir(id))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Resolves the upload file path for a session.
    ///
    /// The filename must be a single normal path component; separators,
    /// `..`, and Windows drive/UNC prefixes are rejected so the resolved
    /// path cannot escape the session directory.
    pub fn file_path(&self, id: &SessionId, filename: &str) -> Result<PathBuf, BitsError> {
        validate_filename(filename)?;

        let dir = self.session_dir(id);
        let path = dir.join(filename);
        debug_assert!(path.starts_with(&dir));
        Ok(path)
    }
}

fn validate_filename(filename: &str) -> Result<(), BitsError> {
    let reject = |reason: &str| {
        Err(BitsError::BadRequest(format!(
            "unsafe filename {filename:?}: {reason}"
        )))
    };

    if filename.is_empty() {
        return reject("empty");
    }
    if filename.contains('/') || filename.contains('\\') {
        return reject("path separator");
    }
    if filename.len() >= 2 && filename.as_bytes()[1] == b':' {
        return reject("drive prefix");
    }

    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => reject("not a plain file name"),
    }
}
