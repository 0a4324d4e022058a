use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use huck_types::models::Profile;

use crate::error::ClientError;

/// Key the logged-in profile is stored under.
const SESSION_KEY: &str = "chat_user";

/// Local session persistence: one JSON file holding the serialized profile.
/// No expiry and no server-side validation; logout just removes it.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<Profile>, ClientError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut entries: HashMap<String, serde_json::Value> = serde_json::from_slice(&raw)?;
        let profile = entries
            .remove(SESSION_KEY)
            .map(serde_json::from_value::<Profile>)
            .transpose()?;
        debug!("Session loaded from {}", self.path.display());
        Ok(profile)
    }

    pub async fn save(&self, profile: &Profile) -> Result<(), ClientError> {
        let entries = HashMap::from([(SESSION_KEY, profile)]);
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(&entries)?).await?;
        info!("Session saved for {}", profile.username);
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn profile() -> Profile {
        Profile {
            id: Uuid::from_u128(1),
            username: "kenshiro".into(),
            color: "text-red-500".into(),
        }
    }

    #[tokio::test]
    async fn missing_file_means_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        assert_eq!(store.load().await.unwrap(), None);
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));

        store.save(&profile()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(profile()));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["chat_user"]["username"], "kenshiro");

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_is_an_error_not_a_logout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"not json").unwrap();
        let err = SessionStore::new(path).load().await;
        assert!(matches!(err, Err(ClientError::SessionFormat(_))));
    }
}
