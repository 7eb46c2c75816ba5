use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use shared::{
    domain::{GroupId, UserId, UserProfile},
    events::{LoginContext, LoginListener},
    protocol::{GroupSummary, ServerEvent},
};

/// Trailing window, in seconds, during which a recorded `first_seen_at` still
/// counts as a first login. The platform stamps the timestamp moments before
/// login listeners run, so a fresh value must not disqualify the user.
pub const FIRST_LOGIN_WINDOW_SECS: i64 = 120;

/// Read-only snapshot of the grace-group site settings, taken at startup and
/// injected into the assigner. `target_group_id` is only trusted once it has
/// been validated as positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraceGroupSettings {
    pub enabled: bool,
    pub target_group_id: i64,
}

/// The group operations the assigner borrows from the platform. Membership is
/// a set on the platform side: `add_member` reports `false` when the store
/// refused the insert, including a concurrent duplicate it absorbed.
#[async_trait]
pub trait GroupHost: Send + Sync {
    async fn find_group(&self, group_id: GroupId) -> anyhow::Result<Option<GroupSummary>>;
    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> anyhow::Result<bool>;
    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InvalidUser,
    NotFirstLogin,
    AlreadyMember,
}

#[derive(Debug, Error)]
pub enum AssignError {
    #[error("configured grace group id {group_id} is not a positive group id")]
    InvalidConfiguration { group_id: i64 },
    #[error("target group with ID {group_id} not found")]
    GroupNotFound { group_id: i64 },
    #[error("group {group_id} rejected new member {user_id}")]
    AddRejected { group_id: i64, user_id: i64 },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// One tag per terminal state of a single invocation. Nothing is carried over
/// to the next login; the platform's membership rows are the only state.
#[derive(Debug)]
pub enum AssignOutcome {
    Added { user: UserId, group: GroupId },
    Skipped(SkipReason),
    Failed(AssignError),
}

/// Enrolls users into the configured grace group on their first login.
///
/// Registered as a [`LoginListener`]; every failure is logged and contained
/// here so the dispatcher and its other listeners never see one.
pub struct Assigner {
    settings: GraceGroupSettings,
    host: Arc<dyn GroupHost>,
    events: broadcast::Sender<ServerEvent>,
}

impl Assigner {
    pub fn new(
        settings: GraceGroupSettings,
        host: Arc<dyn GroupHost>,
        events: broadcast::Sender<ServerEvent>,
    ) -> Self {
        Self {
            settings,
            host,
            events,
        }
    }

    /// Reacts to a plain login event. First-visit detection falls back to the
    /// timestamp heuristic because the event itself carries no such guarantee.
    pub async fn handle_user_logged_in(
        &self,
        user: Option<&UserProfile>,
        now: DateTime<Utc>,
    ) -> AssignOutcome {
        if !self.settings.enabled {
            return AssignOutcome::Skipped(SkipReason::Disabled);
        }
        let Some(user) = persisted_user(user) else {
            return AssignOutcome::Skipped(SkipReason::InvalidUser);
        };
        if !is_first_login(user.first_seen_at, now) {
            debug!(
                user_id = user.user_id.0,
                username = %user.username,
                first_seen_at = ?user.first_seen_at,
                "not a first-time login, leaving group membership alone"
            );
            return AssignOutcome::Skipped(SkipReason::NotFirstLogin);
        }
        self.enroll(user).await
    }

    /// Reacts to the platform's dedicated first-login event, which already
    /// guarantees first-visit semantics, so the timestamp heuristic is skipped.
    pub async fn handle_user_first_logged_in(&self, user: Option<&UserProfile>) -> AssignOutcome {
        if !self.settings.enabled {
            return AssignOutcome::Skipped(SkipReason::Disabled);
        }
        let Some(user) = persisted_user(user) else {
            return AssignOutcome::Skipped(SkipReason::InvalidUser);
        };
        self.enroll(user).await
    }

    async fn enroll(&self, user: &UserProfile) -> AssignOutcome {
        match self.attempt_enroll(user).await {
            Ok(outcome) => outcome,
            Err(err) => {
                match &err {
                    AssignError::InvalidConfiguration { group_id } => {
                        warn!(group_id, "skipping grace-group assignment: {err}");
                    }
                    AssignError::GroupNotFound { group_id } => {
                        warn!(group_id, "skipping grace-group assignment: {err}");
                    }
                    AssignError::AddRejected { group_id, user_id } => {
                        error!(group_id, user_id, username = %user.username, "{err}");
                    }
                    AssignError::Unexpected(source) => {
                        error!(
                            user_id = user.user_id.0,
                            username = %user.username,
                            "grace-group assignment failed: {source:#}"
                        );
                    }
                }
                AssignOutcome::Failed(err)
            }
        }
    }

    async fn attempt_enroll(&self, user: &UserProfile) -> Result<AssignOutcome, AssignError> {
        let raw_group_id = self.settings.target_group_id;
        if raw_group_id <= 0 {
            return Err(AssignError::InvalidConfiguration {
                group_id: raw_group_id,
            });
        }
        let group_id = GroupId(raw_group_id);

        let group = self
            .host
            .find_group(group_id)
            .await?
            .ok_or(AssignError::GroupNotFound {
                group_id: raw_group_id,
            })?;

        if self.host.is_member(group_id, user.user_id).await? {
            debug!(
                user_id = user.user_id.0,
                username = %user.username,
                group_id = raw_group_id,
                group_name = %group.name,
                "user is already a grace-group member"
            );
            return Ok(AssignOutcome::Skipped(SkipReason::AlreadyMember));
        }

        if !self.host.add_member(group_id, user.user_id).await? {
            return Err(AssignError::AddRejected {
                group_id: raw_group_id,
                user_id: user.user_id.0,
            });
        }

        info!(
            user_id = user.user_id.0,
            username = %user.username,
            group_id = raw_group_id,
            group_name = %group.name,
            "added user to grace group"
        );
        let _ = self.events.send(ServerEvent::UserAddedToGraceGroup {
            user: user.summary(),
            group,
        });

        Ok(AssignOutcome::Added {
            user: user.user_id,
            group: group_id,
        })
    }
}

#[async_trait]
impl LoginListener for Assigner {
    async fn on_user_logged_in(&self, user: Option<&UserProfile>, _ctx: &LoginContext) {
        let _ = self.handle_user_logged_in(user, Utc::now()).await;
    }

    async fn on_user_first_logged_in(&self, user: Option<&UserProfile>) {
        let _ = self.handle_user_first_logged_in(user).await;
    }
}

/// A login counts as the first when the user has never been seen, or when the
/// recorded timestamp is inside the trailing window (strictly newer than
/// `now - FIRST_LOGIN_WINDOW_SECS`).
pub fn is_first_login(first_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match first_seen_at {
        None => true,
        Some(first_seen_at) => first_seen_at > now - Duration::seconds(FIRST_LOGIN_WINDOW_SECS),
    }
}

fn persisted_user(user: Option<&UserProfile>) -> Option<&UserProfile> {
    user.filter(|user| user.user_id.0 > 0)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
