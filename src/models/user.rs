use serde::{ Deserialize, Serialize };

/// Record stored at `users/{uid}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "profileImage", default)]
    pub profile_image: Option<String>,
}

/// Identity of the signed-in user. Created by login/registration and handed to
/// every component that talks to a per-user remote resource.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: String,
    pub email: String,
    pub id_token: String,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}
