//! Login, registration, profile edits and logout.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::models::{ProfileUpdate, UserProfile};
use crate::prefs::Prefs;
use crate::state::TripStateStore;
use crate::store::{RemoteStore, StoreError};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("no account matches phone {0}")]
    UnknownUser(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Account {
    store: Arc<dyn RemoteStore>,
    prefs: Prefs,
}

impl Account {
    pub fn new(store: Arc<dyn RemoteStore>, prefs: Prefs) -> Self {
        Self { store, prefs }
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.prefs.current_user()
    }

    pub async fn login(
        &self,
        phone: &str,
        credential: Option<&str>,
    ) -> Result<UserProfile, AccountError> {
        let phone = phone.trim();
        let user = self
            .store
            .find_user(phone, credential.filter(|c| !c.is_empty()))
            .await?
            .ok_or_else(|| AccountError::UnknownUser(phone.to_string()))?;

        self.prefs.save_user(&user);
        info!("Logged in as {} ({})", user.name, user.phone);
        Ok(user)
    }

    /// Signs up, or logs in when the phone is already registered.
    pub async fn register(&self, user: UserProfile) -> Result<UserProfile, AccountError> {
        let saved = match self.store.find_user(&user.phone, None).await? {
            Some(existing) => {
                info!("User found: {:?}", existing.id);
                existing
            }
            None => {
                let created = self.store.insert_user(&user).await?;
                info!("New user created: {:?}", created.id);
                created
            }
        };

        self.prefs.save_user(&saved);
        Ok(saved)
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile, AccountError> {
        let mut user = self.current_user().ok_or(AccountError::NotLoggedIn)?;
        if update.is_empty() {
            return Ok(user);
        }

        match user.id {
            Some(id) => self.store.update_user(id, &update).await?,
            None => {
                // Saved before ids were kept locally; find the row by phone.
                let remote = self
                    .store
                    .find_user(&user.phone, None)
                    .await?
                    .ok_or_else(|| AccountError::UnknownUser(user.phone.clone()))?;
                user.id = remote.id;
                if let Some(id) = remote.id {
                    self.store.update_user(id, &update).await?;
                }
            }
        }

        update.apply(&mut user);
        self.prefs.save_user(&user);
        Ok(user)
    }

    /// Forgets the user and any trip in progress on this device.
    pub fn logout(&self, state: &TripStateStore) {
        self.prefs.clear_all();
        state.clear();
        info!("Logged out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn account() -> (Account, Prefs) {
        let prefs = Prefs::in_memory();
        let store: Arc<dyn RemoteStore> = Arc::new(MemoryStore::new());
        (Account::new(store, prefs.clone()), prefs)
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (account, _) = account();
        let user = UserProfile::new("Asha", "555", "a@example.com")
            .with_credential(Some("pw".to_string()));

        let created = account.register(user.clone()).await.unwrap();
        assert_eq!(created.id, Some(1));

        // Registering the same phone again returns the existing row.
        let again = account.register(user).await.unwrap();
        assert_eq!(again.id, Some(1));

        assert!(matches!(
            account.login("555", Some("wrong")).await,
            Err(AccountError::UnknownUser(_))
        ));
        let logged_in = account.login(" 555 ", Some("pw")).await.unwrap();
        assert_eq!(logged_in.name, "Asha");
        assert_eq!(account.current_user().unwrap().id, Some(1));
    }

    #[tokio::test]
    async fn test_update_profile_requires_login() {
        let (account, _) = account();
        let update = ProfileUpdate {
            name: Some("New".to_string()),
            email: None,
        };
        assert!(matches!(
            account.update_profile(update.clone()).await,
            Err(AccountError::NotLoggedIn)
        ));

        account
            .register(UserProfile::new("Asha", "555", "a@example.com"))
            .await
            .unwrap();
        let updated = account.update_profile(update).await.unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(account.current_user().unwrap().name, "New");
        assert_eq!(account.login("555", None).await.unwrap().name, "New");
    }

    #[tokio::test]
    async fn test_logout_clears_trip_and_next_login_starts_empty() {
        let (account, prefs) = account();
        account
            .register(UserProfile::new("Asha", "555", "a@example.com"))
            .await
            .unwrap();

        let state = TripStateStore::new(prefs.clone());
        state.start(Utc::now());
        state.set_active_trip_id(4);
        state.add_point(1.0, 1.0);
        state.add_point(1.1, 1.1);

        account.logout(&state);
        assert!(!prefs.trip_active());
        assert!(!prefs.is_logged_in());
        assert!(!state.is_active());
        assert!(state.current_path().is_empty());
        assert_eq!(state.active_trip_id(), None);

        account.login("555", None).await.unwrap();
        let after_restart = TripStateStore::new(prefs);
        assert!(after_restart.current_path().is_empty());
        assert!(!after_restart.is_active());
    }
}
