use serde::{Deserialize, Serialize};

/// A row of the `users` table. The phone number is the login key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl UserProfile {
    pub fn new(name: &str, phone: &str, email: &str) -> Self {
        Self {
            id: None,
            name: name.trim().to_string(),
            phone: phone.trim().to_string(),
            email: email.trim().to_string(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.is_empty());
        self
    }
}

/// Partial update for the profile screen; unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }

    pub fn apply(&self, user: &mut UserProfile) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_row_decodes() {
        let user: UserProfile = serde_json::from_str(r#"{"id": 3, "phone": "555"}"#).unwrap();
        assert_eq!(user.id, Some(3));
        assert_eq!(user.phone, "555");
        assert!(user.name.is_empty());
        assert_eq!(user.credential, None);
    }

    #[test]
    fn test_insert_payload_skips_missing_id() {
        let user = UserProfile::new(" Asha ", "555", "a@example.com");
        let value = serde_json::to_value(&user).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("credential").is_none());
        assert_eq!(value["name"], "Asha");
    }

    #[test]
    fn test_profile_update_apply() {
        let mut user = UserProfile::new("Asha", "555", "a@example.com");
        let update = ProfileUpdate {
            email: Some("asha@example.com".to_string()),
            ..Default::default()
        };
        update.apply(&mut user);
        assert_eq!(user.name, "Asha");
        assert_eq!(user.email, "asha@example.com");
        assert!(ProfileUpdate::default().is_empty());
    }
}
