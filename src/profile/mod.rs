mod firebase;
mod memory;

use async_trait::async_trait;
use log::{ info, warn };
use std::sync::Arc;
use thiserror::Error;

use crate::auth::{ AuthError, AuthProvider };
use crate::error::StoreError;
use crate::models::diagnosis::ImageUpload;
use crate::models::notice::Notice;
use crate::models::user::{ SessionContext, UserProfile };

pub use self::firebase::{ FirebaseBlobStore, FirebaseProfileStore };
pub use self::memory::{ MemoryBlobStore, MemoryProfileStore };

/// Keyed profile records (`users/{uid}`).
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, ctx: &SessionContext) -> Result<Option<UserProfile>, StoreError>;

    /// Writes the profile fields, leaving other children of the user record alone.
    async fn put(&self, ctx: &SessionContext, profile: &UserProfile) -> Result<(), StoreError>;

    async fn set_image(&self, ctx: &SessionContext, url: &str) -> Result<(), StoreError>;
}

/// Binary object storage for profile pictures.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the bytes under `name` and returns a URL they can be downloaded from.
    async fn upload(
        &self,
        ctx: &SessionContext,
        name: &str,
        image: &ImageUpload
    ) -> Result<String, StoreError>;
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("All fields are required.")]
    MissingFields,

    #[error("{0}")]
    PasswordMismatch(&'static str),

    #[error("User data not found in the database.")]
    ProfileMissing,

    #[error("Current password is incorrect.")]
    CurrentPasswordIncorrect,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProfileError {
    pub fn notice(&self) -> Notice {
        match self {
            ProfileError::Auth(e) => e.notice(),
            ProfileError::Store(e) => Notice::new("Error", e.to_string()),
            other => Notice::new("Error", other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub profile_image: Option<ImageUpload>,
}

pub fn profile_image_name(user_id: &str) -> String {
    format!("profileImages/{}", user_id)
}

/// Registration, login and account maintenance on top of the identity
/// provider, the profile records and the image bucket.
pub struct ProfileService {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ProfileService {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileStore>,
        blobs: Arc<dyn BlobStore>
    ) -> Self {
        Self { auth, profiles, blobs }
    }

    pub async fn register(&self, form: RegistrationForm) -> Result<SessionContext, ProfileError> {
        if [&form.name, &form.email, &form.password, &form.confirm_password]
            .iter()
            .any(|f| f.trim().is_empty())
        {
            return Err(ProfileError::MissingFields);
        }
        if form.password != form.confirm_password {
            return Err(ProfileError::PasswordMismatch("Passwords do not match."));
        }

        let ctx = self.auth.sign_up(form.email.trim(), &form.password).await?;

        let profile_image = match form.profile_image.as_ref().filter(|img| !img.is_empty()) {
            Some(image) => Some(self.blobs.upload(&ctx, &profile_image_name(&ctx.user_id), image).await?),
            None => None,
        };

        let profile = UserProfile {
            name: form.name.trim().to_string(),
            email: form.email.trim().to_string(),
            profile_image,
        };
        self.profiles.put(&ctx, &profile).await?;
        info!("Profile created for {}", ctx.user_id);
        Ok(ctx)
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str
    ) -> Result<(SessionContext, UserProfile), ProfileError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ProfileError::MissingFields);
        }
        let ctx = self.auth.sign_in(email.trim(), password).await?;
        let profile = self.profiles.get(&ctx).await?.ok_or(ProfileError::ProfileMissing)?;
        info!("User {} logged in", ctx.user_id);
        Ok((ctx, profile))
    }

    pub async fn update_profile_image(
        &self,
        ctx: &SessionContext,
        image: &ImageUpload
    ) -> Result<String, ProfileError> {
        if image.is_empty() {
            return Err(ProfileError::MissingFields);
        }
        let url = self.blobs.upload(ctx, &profile_image_name(&ctx.user_id), image).await?;
        self.profiles.set_image(ctx, &url).await?;
        info!("Profile image updated for {}", ctx.user_id);
        Ok(url)
    }

    pub async fn change_password(
        &self,
        ctx: &SessionContext,
        current: &str,
        new_password: &str,
        confirm: &str
    ) -> Result<SessionContext, ProfileError> {
        if current.is_empty() || new_password.is_empty() || confirm.is_empty() {
            return Err(ProfileError::MissingFields);
        }
        if new_password != confirm {
            return Err(ProfileError::PasswordMismatch("New passwords do not match."));
        }

        let fresh = match self.auth.sign_in(&ctx.email, current).await {
            Ok(fresh) => fresh,
            Err(AuthError::WrongPassword) => {
                return Err(ProfileError::CurrentPasswordIncorrect);
            }
            Err(e) => {
                warn!("Re-authentication failed for {}: {}", ctx.user_id, e);
                return Err(e.into());
            }
        };
        let updated = self.auth.update_password(&fresh, new_password).await?;
        info!("Password changed for {}", ctx.user_id);
        Ok(updated)
    }

    /// Ends the session. The context is consumed so it cannot be reused.
    pub fn logout(&self, ctx: SessionContext) {
        info!("User {} logged out", ctx.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryAuth;

    fn service() -> (ProfileService, Arc<MemoryProfileStore>, Arc<MemoryBlobStore>) {
        let profiles = Arc::new(MemoryProfileStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let svc = ProfileService::new(Arc::new(MemoryAuth::new()), profiles.clone(), blobs.clone());
        (svc, profiles, blobs)
    }

    fn form() -> RegistrationForm {
        RegistrationForm {
            name: "Ayesha".into(),
            email: "ayesha@farm.pk".into(),
            password: "brinjal1".into(),
            confirm_password: "brinjal1".into(),
            profile_image: Some(ImageUpload::new(vec![1, 2, 3], "image/png", "me.png")),
        }
    }

    #[tokio::test]
    async fn register_then_login_returns_profile() {
        let (svc, _, blobs) = service();
        let ctx = svc.register(form()).await.unwrap();
        assert!(blobs.contains(&profile_image_name(&ctx.user_id)));

        let (login_ctx, profile) = svc.login("ayesha@farm.pk", "brinjal1").await.unwrap();
        assert_eq!(login_ctx.user_id, ctx.user_id);
        assert_eq!(profile.name, "Ayesha");
        assert!(profile.profile_image.is_some());
    }

    #[tokio::test]
    async fn registration_is_validated_locally() {
        let (svc, profiles, _) = service();
        let mut missing = form();
        missing.name = " ".into();
        assert!(matches!(svc.register(missing).await, Err(ProfileError::MissingFields)));

        let mut mismatch = form();
        mismatch.confirm_password = "other".into();
        let err = svc.register(mismatch).await.unwrap_err();
        assert_eq!(err.notice().message, "Passwords do not match.");
        assert_eq!(profiles.len(), 0);
    }

    #[tokio::test]
    async fn login_without_profile_record_fails() {
        let auth = Arc::new(MemoryAuth::new());
        auth.sign_up("ghost@farm.pk", "secret1").await.unwrap();
        let svc = ProfileService::new(
            auth,
            Arc::new(MemoryProfileStore::new()),
            Arc::new(MemoryBlobStore::new())
        );
        let err = svc.login("ghost@farm.pk", "secret1").await.unwrap_err();
        assert!(matches!(err, ProfileError::ProfileMissing));
    }

    #[tokio::test]
    async fn wrong_password_maps_to_alert() {
        let (svc, _, _) = service();
        svc.register(form()).await.unwrap();
        let err = svc.login("ayesha@farm.pk", "wrong-pw").await.unwrap_err();
        assert_eq!(err.notice().title, "Incorrect Password");
    }

    #[tokio::test]
    async fn change_password_requires_current_password() {
        let (svc, _, _) = service();
        let ctx = svc.register(form()).await.unwrap();

        let err = svc.change_password(&ctx, "wrong-pw", "newpass1", "newpass1").await.unwrap_err();
        assert!(matches!(err, ProfileError::CurrentPasswordIncorrect));

        let err = svc.change_password(&ctx, "brinjal1", "newpass1", "newpass2").await.unwrap_err();
        assert_eq!(err.to_string(), "New passwords do not match.");

        svc.change_password(&ctx, "brinjal1", "newpass1", "newpass1").await.unwrap();
        assert!(svc.login("ayesha@farm.pk", "newpass1").await.is_ok());
    }

    #[tokio::test]
    async fn profile_image_update_stores_url() {
        let (svc, profiles, _) = service();
        let mut no_image = form();
        no_image.profile_image = None;
        let ctx = svc.register(no_image).await.unwrap();

        let image = ImageUpload::new(vec![9; 16], "image/jpeg", "new.jpg");
        let url = svc.update_profile_image(&ctx, &image).await.unwrap();
        let stored = profiles.get(&ctx).await.unwrap().unwrap();
        assert_eq!(stored.profile_image.as_deref(), Some(url.as_str()));
        assert_eq!(stored.name, "Ayesha");
    }
}
