use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{ AuthError, AuthProvider };
use crate::models::user::SessionContext;

struct Account {
    user_id: String,
    password: String,
}

/// In-process accounts keyed by email. Mirrors the hosted provider's checks
/// closely enough for offline runs and tests.
#[derive(Default)]
pub struct MemoryAuth {
    accounts: Mutex<HashMap<String, Account>>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Account>>, AuthError> {
        self.accounts.lock().map_err(|_| AuthError::Unknown("account table poisoned".to_string()))
    }
}

fn session(email: &str, user_id: &str) -> SessionContext {
    SessionContext {
        user_id: user_id.to_string(),
        email: email.to_string(),
        id_token: Uuid::new_v4().to_string(),
    }
}

fn validate_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AuthError::InvalidEmail),
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < 6 {
        return Err(AuthError::WeakPassword("Password should be at least 6 characters".to_string()));
    }
    Ok(())
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SessionContext, AuthError> {
        let email = validate_email(email)?;
        validate_password(password)?;
        let mut accounts = self.lock()?;
        if accounts.contains_key(&email) {
            return Err(AuthError::EmailExists);
        }
        let user_id = Uuid::new_v4().simple().to_string();
        accounts.insert(email.clone(), Account { user_id: user_id.clone(), password: password.to_string() });
        Ok(session(&email, &user_id))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionContext, AuthError> {
        let email = validate_email(email)?;
        let accounts = self.lock()?;
        let account = accounts.get(&email).ok_or(AuthError::UserNotFound)?;
        if account.password != password {
            return Err(AuthError::WrongPassword);
        }
        Ok(session(&email, &account.user_id))
    }

    async fn update_password(
        &self,
        ctx: &SessionContext,
        new_password: &str
    ) -> Result<SessionContext, AuthError> {
        validate_password(new_password)?;
        let mut accounts = self.lock()?;
        let account = accounts.get_mut(&ctx.email).ok_or(AuthError::UserNotFound)?;
        account.password = new_password.to_string();
        Ok(session(&ctx.email, &account.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_checks_password() {
        let auth = MemoryAuth::new();
        let created = auth.sign_up("Grower@Farm.pk", "secret1").await.unwrap();
        let signed_in = auth.sign_in("grower@farm.pk", "secret1").await.unwrap();
        assert_eq!(created.user_id, signed_in.user_id);
        assert_eq!(auth.sign_in("grower@farm.pk", "nope").await, Err(AuthError::WrongPassword));
        assert_eq!(auth.sign_in("other@farm.pk", "secret1").await, Err(AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn rejects_bad_email_and_duplicates() {
        let auth = MemoryAuth::new();
        assert_eq!(auth.sign_up("not-an-email", "secret1").await, Err(AuthError::InvalidEmail));
        auth.sign_up("a@b.pk", "secret1").await.unwrap();
        assert_eq!(auth.sign_up("a@b.pk", "secret2").await, Err(AuthError::EmailExists));
    }
}
