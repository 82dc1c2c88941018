use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{ BlobStore, ProfileStore };
use crate::error::StoreError;
use crate::models::diagnosis::ImageUpload;
use crate::models::user::{ SessionContext, UserProfile };

fn poisoned() -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<String, UserProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, ctx: &SessionContext) -> Result<Option<UserProfile>, StoreError> {
        let profiles = self.profiles.lock().map_err(|_| poisoned())?;
        Ok(profiles.get(&ctx.user_id).cloned())
    }

    async fn put(&self, ctx: &SessionContext, profile: &UserProfile) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().map_err(|_| poisoned())?;
        profiles.insert(ctx.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn set_image(&self, ctx: &SessionContext, url: &str) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().map_err(|_| poisoned())?;
        profiles.entry(ctx.user_id.clone()).or_default().profile_image = Some(url.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.lock().map(|b| b.contains_key(name)).unwrap_or(false)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        _ctx: &SessionContext,
        name: &str,
        image: &ImageUpload
    ) -> Result<String, StoreError> {
        let mut blobs = self.blobs.lock().map_err(|_| poisoned())?;
        blobs.insert(name.to_string(), image.bytes.clone());
        Ok(format!("memory://{}?token={}", name, Uuid::new_v4()))
    }
}
