//! Downloads an instance's preserved artifacts into its local working area.

use std::path::{Path, PathBuf};

use acquire_aws::s3::{ObjectStore, TransferError};

/// Per-instance working area under `work_root`. Created lazily, reused by
/// every analysis step, never garbage collected. Concurrent runs against
/// the same instance id are not safe; callers must serialize them.
pub struct ArtifactFetcher<'a, S: ObjectStore> {
    store: &'a S,
    work_root: &'a Path,
}

impl<'a, S: ObjectStore> ArtifactFetcher<'a, S> {
    pub fn new(store: &'a S, work_root: &'a Path) -> Self {
        Self { store, work_root }
    }

    pub fn working_area(&self, instance_id: &str) -> PathBuf {
        self.work_root.join(instance_id)
    }

    /// Idempotent fetch: a non-empty working area is treated as authoritative
    /// and returned as-is, even if a previous download was partial. That is a
    /// deliberate trade-off against re-downloading multi-gigabyte captures,
    /// not a freshness guarantee.
    pub async fn download_incident_data(
        &self,
        instance_id: &str,
    ) -> Result<Vec<PathBuf>, TransferError> {
        let area = self.working_area(instance_id);

        if let Some(existing) = self.existing_listing(&area)? {
            tracing::info!(
                instance_id,
                files = existing.len(),
                "working area already populated, skipping re-fetch"
            );
            return Ok(existing);
        }

        tracing::info!(instance_id, "attempting to download incident data");
        std::fs::create_dir_all(&area)?;

        let keys = self.store.list_keys(instance_id).await?;
        let mut files = Vec::with_capacity(keys.len());
        for key in keys {
            tracing::info!(key, "attempting download");
            let dest = self.work_root.join(&key);
            self.store.download(&key, &dest).await?;
            files.push(dest);
        }
        Ok(files)
    }

    fn existing_listing(&self, area: &Path) -> Result<Option<Vec<PathBuf>>, TransferError> {
        if !area.is_dir() {
            return Ok(None);
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(area)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        if files.is_empty() {
            return Ok(None);
        }
        files.sort();
        Ok(Some(files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockStore {
        objects: Mutex<Vec<(String, Vec<u8>)>>,
        list_calls: AtomicUsize,
        download_calls: AtomicUsize,
    }

    impl MockStore {
        fn seeded(keys: &[&str]) -> Self {
            Self {
                objects: Mutex::new(
                    keys.iter()
                        .map(|k| (k.to_string(), b"data".to_vec()))
                        .collect(),
                ),
                ..Default::default()
            }
        }

        fn store_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst) + self.download_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObjectStore for MockStore {
        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, TransferError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .objects
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect())
        }

        async fn download(&self, key: &str, dest: &Path) -> Result<(), TransferError> {
            self.download_calls.fetch_add(1, Ordering::SeqCst);
            let objects = self.objects.lock().unwrap();
            let (_, data) = objects
                .iter()
                .find(|(k, _)| k == key)
                .ok_or_else(|| TransferError::MissingArtifact(key.to_string()))?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(dest, data).unwrap();
            Ok(())
        }

        async fn upload(&self, _src: &Path, _key: &str) -> Result<(), TransferError> {
            unreachable!("fetcher never uploads")
        }
    }

    #[tokio::test]
    async fn populated_working_area_short_circuits_storage() {
        let work_root = tempfile::tempdir().unwrap();
        let area = work_root.path().join("i-abc123");
        std::fs::create_dir_all(&area).unwrap();
        std::fs::write(area.join("capture.aff4"), b"ram").unwrap();
        std::fs::write(area.join("profile.zip"), b"zip").unwrap();

        let store = MockStore::seeded(&["i-abc123/capture.aff4"]);
        let fetcher = ArtifactFetcher::new(&store, work_root.path());

        let files = fetcher.download_incident_data("i-abc123").await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(store.store_calls(), 0);
    }

    #[tokio::test]
    async fn empty_working_area_downloads_every_listed_object() {
        let work_root = tempfile::tempdir().unwrap();
        let store = MockStore::seeded(&[
            "i-abc123/capture.aff4",
            "i-abc123/profile.zip",
            "i-abc123/interrogate/processes.json",
        ]);
        let fetcher = ArtifactFetcher::new(&store, work_root.path());

        let files = fetcher.download_incident_data("i-abc123").await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(store.download_calls.load(Ordering::SeqCst), 3);
        assert!(work_root.path().join("i-abc123/capture.aff4").exists());
        assert!(work_root
            .path()
            .join("i-abc123/interrogate/processes.json")
            .exists());
    }

    #[tokio::test]
    async fn empty_listing_is_not_an_error() {
        let work_root = tempfile::tempdir().unwrap();
        let store = MockStore::seeded(&[]);
        let fetcher = ArtifactFetcher::new(&store, work_root.path());

        let files = fetcher.download_incident_data("i-none").await.unwrap();
        assert!(files.is_empty());
    }
}
