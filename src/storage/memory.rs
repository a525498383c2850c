//! In-memory object storage for tests and local runs

use super::{ObjectStorage, PutObject, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    objects: HashMap<(String, String), PutObject>,
    failure: Option<StorageError>,
    puts: usize,
}

/// [`ObjectStorage`] backed by a `HashMap`, with failure injection
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every following call with `failure`, or recover with `None`.
    pub fn set_failure(&self, failure: Option<StorageError>) {
        self.state().failure = failure;
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<PutObject> {
        self.state().objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempted writes, failed ones included
    pub fn put_attempts(&self) -> usize {
        self.state().puts
    }

    fn check(state: &State) -> Result<(), StorageError> {
        match &state.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put_object(&self, object: PutObject) -> Result<(), StorageError> {
        let mut state = self.state();
        state.puts += 1;
        Self::check(&state)?;
        state
            .objects
            .insert((object.bucket.clone(), object.key.clone()), object);
        Ok(())
    }

    async fn head_bucket(&self, _bucket: &str) -> Result<(), StorageError> {
        Self::check(&self.state())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let mut state = self.state();
        Self::check(&state)?;
        state.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::storage::ArtifactStore;
    use crate::Error;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn store(backend: &Arc<MemoryStorage>) -> ArtifactStore {
        let settings = StorageSettings {
            bucket: "renders".into(),
            ..Default::default()
        };
        ArtifactStore::new(settings, Some(backend.clone() as Arc<dyn ObjectStorage>))
    }

    #[tokio::test]
    async fn upload_stores_object_with_metadata() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store(&backend);
        let mut metadata = BTreeMap::new();
        metadata.insert("width".to_string(), "800".to_string());

        let stored = store
            .upload(vec![9; 42], "image/png", "images", "png", metadata.clone())
            .await
            .unwrap();
        assert_eq!(stored.size_bytes, 42);
        assert_eq!(stored.bucket, "renders");
        assert!(stored.url.ends_with(&stored.key));

        let object = backend.object("renders", &stored.key).unwrap();
        assert_eq!(object.content_type, "image/png");
        assert_eq!(object.metadata, metadata);
        assert!(object.public_read);
        assert!(store.check_connectivity().await);

        store.delete(&stored.key).await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn upstream_errors_keep_their_code() {
        let backend = Arc::new(MemoryStorage::new());
        backend.set_failure(Some(StorageError::new("AccessDenied", "Access Denied")));
        let store = store(&backend);

        let err = store
            .upload(vec![1], "image/png", "images", "png", BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::StorageUploadFailure {
                code: "AccessDenied".into(),
                message: "Access Denied".into()
            }
        );
        assert_eq!(backend.put_attempts(), 1);
        assert!(!store.check_connectivity().await);
    }

    #[tokio::test]
    async fn failed_delete_is_not_reported_as_upload() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store(&backend);
        let stored = store
            .upload(vec![7; 8], "image/png", "images", "png", BTreeMap::new())
            .await
            .unwrap();

        backend.set_failure(Some(StorageError::new("AccessDenied", "Access Denied")));
        let err = store.delete(&stored.key).await.unwrap_err();
        assert_eq!(
            err,
            Error::StorageDeleteFailure {
                code: "AccessDenied".into(),
                message: "Access Denied".into()
            }
        );
        assert_eq!(err.to_string(), "Storage delete failed (AccessDenied): Access Denied");
        assert!(backend.object("renders", &stored.key).is_some());
    }
}
