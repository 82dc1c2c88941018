use async_trait::async_trait;
use log::debug;
use reqwest::header::{ AUTHORIZATION, CONTENT_TYPE };
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

use super::{ BlobStore, ProfileStore };
use crate::error::StoreError;
use crate::firebase::database::RealtimeDb;
use crate::firebase::user_path;
use crate::models::diagnosis::ImageUpload;
use crate::models::user::{ SessionContext, UserProfile };

pub struct FirebaseProfileStore {
    db: RealtimeDb,
}

impl FirebaseProfileStore {
    pub fn new(database_url: &str) -> Self {
        Self { db: RealtimeDb::new(database_url) }
    }
}

#[async_trait]
impl ProfileStore for FirebaseProfileStore {
    async fn get(&self, ctx: &SessionContext) -> Result<Option<UserProfile>, StoreError> {
        self.db.get::<UserProfile>(&user_path(&ctx.user_id), &ctx.id_token).await
    }

    // PATCH, not PUT: `users/{uid}` also holds the chat log.
    async fn put(&self, ctx: &SessionContext, profile: &UserProfile) -> Result<(), StoreError> {
        self.db.patch(&user_path(&ctx.user_id), &ctx.id_token, profile).await
    }

    async fn set_image(&self, ctx: &SessionContext, url: &str) -> Result<(), StoreError> {
        self.db.patch(&user_path(&ctx.user_id), &ctx.id_token, &json!({ "profileImage": url })).await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    name: String,
    bucket: String,
    #[serde(default)]
    download_tokens: Option<String>,
}

pub struct FirebaseBlobStore {
    http: HttpClient,
    bucket: String,
}

impl FirebaseBlobStore {
    pub fn new(bucket: &str) -> Self {
        Self { http: HttpClient::new(), bucket: bucket.to_string() }
    }
}

fn encode_object_name(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes()).collect()
}

fn download_url(resp: &UploadResponse) -> String {
    let mut url = format!(
        "https://firebasestorage.googleapis.com/v0/b/{}/o/{}?alt=media",
        resp.bucket,
        encode_object_name(&resp.name)
    );
    // Several tokens may be returned comma separated; any of them works.
    if let Some(token) = resp.download_tokens.as_deref().and_then(|t| t.split(',').next()) {
        url.push_str("&token=");
        url.push_str(token);
    }
    url
}

#[async_trait]
impl BlobStore for FirebaseBlobStore {
    async fn upload(
        &self,
        ctx: &SessionContext,
        name: &str,
        image: &ImageUpload
    ) -> Result<String, StoreError> {
        let url = format!("https://firebasestorage.googleapis.com/v0/b/{}/o", self.bucket);
        let resp = self.http
            .post(&url)
            .query(&[("uploadType", "media"), ("name", name)])
            .header(AUTHORIZATION, format!("Firebase {}", ctx.id_token))
            .header(CONTENT_TYPE, image.mime_type.as_str())
            .body(image.bytes.clone())
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { status: status.as_u16(), body });
        }
        let uploaded: UploadResponse = resp.json().await?;
        debug!("Uploaded {} to bucket {}", uploaded.name, uploaded.bucket);
        Ok(download_url(&uploaded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_encodes_object_path() {
        let resp = UploadResponse {
            name: "profileImages/u1".into(),
            bucket: "eggplant.appspot.com".into(),
            download_tokens: Some("tok-a,tok-b".into()),
        };
        assert_eq!(
            download_url(&resp),
            "https://firebasestorage.googleapis.com/v0/b/eggplant.appspot.com/o/profileImages%2Fu1?alt=media&token=tok-a"
        );
    }
}
