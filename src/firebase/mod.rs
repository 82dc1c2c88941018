pub mod database;

/// Connection settings of the hosted backend project.
#[derive(Clone)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub auth_url: String,
    pub database_url: String,
    pub storage_bucket: Option<String>,
}

impl std::fmt::Debug for FirebaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseConfig")
            .field("auth_url", &self.auth_url)
            .field("database_url", &self.database_url)
            .field("storage_bucket", &self.storage_bucket)
            .finish_non_exhaustive()
    }
}

/// Database location of a user's profile record.
pub fn user_path(user_id: &str) -> String {
    format!("users/{}", user_id)
}

/// Database location of a user's chat log.
pub fn chats_path(user_id: &str) -> String {
    format!("users/{}/chats", user_id)
}
