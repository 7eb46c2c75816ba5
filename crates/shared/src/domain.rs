use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(GroupId);

/// A user as the platform stores it. `first_seen_at` stays NULL until the
/// user's first visit after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub first_seen_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn summary(&self) -> crate::protocol::UserSummary {
        crate::protocol::UserSummary {
            user_id: self.user_id,
            username: self.username.clone(),
        }
    }
}
