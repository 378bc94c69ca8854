use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::ProjectDirs;
use sha2::{Digest, Sha256};

use crate::models::farming::FarmingSession;

/// Device-local cache of farming sessions, one JSON file per device.
///
/// This is the only copy of accrued-but-unsynced earnings, so it is written
/// before anything is sent to the remote store.
#[derive(Clone)]
pub struct SessionCache {
    dir: PathBuf,
}

impl SessionCache {
    pub async fn open(dir: Option<&str>) -> Result<Self, anyhow::Error> {
        let dir = match dir {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("app", "coinfarm", "coinfarm")
                .context("Could not resolve a data directory for the session cache")?
                .data_local_dir()
                .join("sessions"),
        };
        tokio::fs::create_dir_all(&dir).await?;
        log::info!("Session cache at {}", dir.display());

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, device_id: &str) -> PathBuf {
        let digest = Sha256::digest(device_id.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }

    pub async fn load(&self, device_id: &str) -> Result<Option<FarmingSession>, anyhow::Error> {
        let path = self.file_for(device_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, session: &FarmingSession) -> Result<(), anyhow::Error> {
        let path = self.file_for(&session.device_id);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(session)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn clear(&self, device_id: &str) -> Result<(), anyhow::Error> {
        match tokio::fs::remove_file(self.file_for(device_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load_all(&self) -> Result<Vec<FarmingSession>, anyhow::Error> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(session) => sessions.push(session),
                    Err(e) => log::warn!("Ignoring unreadable session {}: {}", path.display(), e),
                },
                Err(e) => log::warn!("Could not read session {}: {}", path.display(), e),
            }
        }

        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::User;
    use crate::test_utils::identity;

    async fn cache() -> (tempfile::TempDir, SessionCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::open(dir.path().to_str()).await.unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let (_dir, cache) = cache().await;
        let user = User::new(&identity("1"), 2.0, 0);
        let session = FarmingSession::start(&user, "phone/../../etc", 100).unwrap();

        assert_eq!(cache.load("phone/../../etc").await.unwrap(), None);
        cache.save(&session).await.unwrap();
        assert_eq!(cache.load("phone/../../etc").await.unwrap(), Some(session));
        assert_eq!(cache.load("tablet").await.unwrap(), None);

        cache.clear("phone/../../etc").await.unwrap();
        assert_eq!(cache.load("phone/../../etc").await.unwrap(), None);
        cache.clear("phone/../../etc").await.unwrap();
    }

    #[tokio::test]
    async fn test_load_all() {
        let (_dir, cache) = cache().await;
        let user = User::new(&identity("1"), 1.0, 0);
        for device in ["a", "b", "c"] {
            let session = FarmingSession::start(&user, device, 0).unwrap();
            cache.save(&session).await.unwrap();
        }
        tokio::fs::write(cache.dir().join("junk.json"), b"{")
            .await
            .unwrap();

        let mut devices: Vec<String> = cache
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.device_id)
            .collect();
        devices.sort();
        assert_eq!(devices, vec!["a", "b", "c"]);
    }
}
