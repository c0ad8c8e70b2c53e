use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: Option<String>,
    pub rating: Option<f64>,
    pub identity_verified: bool,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: Option<String>,
    pub rating: Option<f64>,
    #[serde(default)]
    pub identity_verified: bool,
}

/// The caller behind a verified bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: i32,
    pub name: String,
    pub active: bool,
}

impl From<&User> for UserIdentity {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            active: user.active,
        }
    }
}
