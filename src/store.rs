//! Persistence boundary for profiles and their documents.

use crate::error::{LiasseError, Result};
use crate::profile::{DocumentRecord, ProfileData, ProfileRecord, ProfileStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load_profile(&self, profile_id: &str) -> Result<ProfileRecord>;

    async fn save_profile(&self, profile: &ProfileRecord) -> Result<()>;

    async fn list_documents(&self, profile_id: &str) -> Result<Vec<DocumentRecord>>;

    async fn save_document(&self, profile_id: &str, document: &DocumentRecord) -> Result<()>;

    async fn read_document(&self, profile_id: &str, document_id: &str) -> Result<Vec<u8>>;
}

struct StoredDocument {
    record: DocumentRecord,
    bytes: Vec<u8>,
}

/// Profile rows keep their data as a JSON blob, the way a document database would.
struct StoredProfile {
    id: String,
    company_name: Option<String>,
    status: ProfileStatus,
    data: Value,
    documents: Vec<StoredDocument>,
}

/// In-process store used by tests, demos and single-binary deployments.
#[derive(Default)]
pub struct MemoryStore {
    profiles: Mutex<HashMap<String, StoredProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StoredProfile>>> {
        self.profiles
            .lock()
            .map_err(|_| LiasseError::Storage("profile store lock poisoned".to_string()))
    }

    pub fn insert_profile(&self, profile: ProfileRecord) -> Result<()> {
        let data = profile.data.to_json()?;
        self.lock()?.insert(
            profile.id.clone(),
            StoredProfile {
                id: profile.id,
                company_name: profile.company_name,
                status: profile.status,
                data,
                documents: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn add_document(
        &self,
        profile_id: &str,
        document: DocumentRecord,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let mut profiles = self.lock()?;
        let profile = profiles
            .get_mut(profile_id)
            .ok_or_else(|| LiasseError::ProfileNotFound(profile_id.to_string()))?;
        profile.documents.push(StoredDocument {
            record: document,
            bytes,
        });
        Ok(())
    }

    /// Raw data blob, as an external observer polling the store would see it.
    pub fn profile_blob(&self, profile_id: &str) -> Result<Value> {
        self.lock()?
            .get(profile_id)
            .map(|p| p.data.clone())
            .ok_or_else(|| LiasseError::ProfileNotFound(profile_id.to_string()))
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn load_profile(&self, profile_id: &str) -> Result<ProfileRecord> {
        let profiles = self.lock()?;
        let stored = profiles
            .get(profile_id)
            .ok_or_else(|| LiasseError::ProfileNotFound(profile_id.to_string()))?;
        Ok(ProfileRecord {
            id: stored.id.clone(),
            company_name: stored.company_name.clone(),
            status: stored.status,
            data: ProfileData::from_json(&stored.data)?,
        })
    }

    async fn save_profile(&self, profile: &ProfileRecord) -> Result<()> {
        let data = profile.data.to_json()?;
        let mut profiles = self.lock()?;
        let stored = profiles
            .get_mut(&profile.id)
            .ok_or_else(|| LiasseError::ProfileNotFound(profile.id.clone()))?;
        stored.company_name = profile.company_name.clone();
        stored.status = profile.status;
        stored.data = data;
        Ok(())
    }

    async fn list_documents(&self, profile_id: &str) -> Result<Vec<DocumentRecord>> {
        let profiles = self.lock()?;
        let stored = profiles
            .get(profile_id)
            .ok_or_else(|| LiasseError::ProfileNotFound(profile_id.to_string()))?;
        Ok(stored.documents.iter().map(|d| d.record.clone()).collect())
    }

    async fn save_document(&self, profile_id: &str, document: &DocumentRecord) -> Result<()> {
        let mut profiles = self.lock()?;
        let stored = profiles
            .get_mut(profile_id)
            .ok_or_else(|| LiasseError::ProfileNotFound(profile_id.to_string()))?;
        let slot = stored
            .documents
            .iter_mut()
            .find(|d| d.record.id == document.id)
            .ok_or_else(|| LiasseError::Storage(format!("unknown document {}", document.id)))?;
        slot.record = document.clone();
        Ok(())
    }

    async fn read_document(&self, profile_id: &str, document_id: &str) -> Result<Vec<u8>> {
        let profiles = self.lock()?;
        let stored = profiles
            .get(profile_id)
            .ok_or_else(|| LiasseError::ProfileNotFound(profile_id.to_string()))?;
        stored
            .documents
            .iter()
            .find(|d| d.record.id == document_id)
            .map(|d| d.bytes.clone())
            .ok_or_else(|| LiasseError::Storage(format!("unknown document {}", document_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_profile_round_trip() {
        let store = MemoryStore::new();
        store
            .insert_profile(ProfileRecord::new("p1", Some("ACME SARL".to_string())))
            .unwrap();

        let mut profile = store.load_profile("p1").await.unwrap();
        profile.status = ProfileStatus::Processing;
        profile.data.fiscal_years = Some("2023".to_string());
        store.save_profile(&profile).await.unwrap();

        let loaded = store.load_profile("p1").await.unwrap();
        assert_eq!(loaded.status, ProfileStatus::Processing);
        assert_eq!(store.profile_blob("p1").unwrap()["fiscal_years"], json!("2023"));
    }

    #[tokio::test]
    async fn test_documents() {
        let store = MemoryStore::new();
        store.insert_profile(ProfileRecord::new("p1", None)).unwrap();
        store
            .add_document("p1", DocumentRecord::new("d1", "2023.pdf"), vec![1, 2, 3])
            .unwrap();

        let mut docs = store.list_documents("p1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(store.read_document("p1", "d1").await.unwrap(), vec![1, 2, 3]);

        docs[0].extracted_data = Some(json!({"fiscal_year": 2023}));
        store.save_document("p1", &docs[0]).await.unwrap();
        let docs = store.list_documents("p1").await.unwrap();
        assert_eq!(docs[0].extracted_data, Some(json!({"fiscal_year": 2023})));
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let store = MemoryStore::new();
        let err = store.load_profile("nope").await.unwrap_err();
        assert!(matches!(err, LiasseError::ProfileNotFound(_)));
        assert!(store.read_document("nope", "d").await.is_err());
    }
}
