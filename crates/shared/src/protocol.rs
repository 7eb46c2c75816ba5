use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{GroupId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_id: GroupId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSummary {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub username: String,
    pub added_at: DateTime<Utc>,
}

/// Events observers can subscribe to. The assigner fires
/// `UserAddedToGraceGroup` exactly once per successful enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    UserAddedToGraceGroup {
        user: UserSummary,
        group: GroupSummary,
    },
}
