use chrono::{Duration, Utc};

use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("grace_group_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn create_user_is_an_upsert_by_username() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let first = storage.create_user("alice").await.expect("user");
    let second = storage.create_user("alice").await.expect("user");
    assert_eq!(first, second);
}

#[tokio::test]
async fn record_first_seen_transitions_exactly_once() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("alice").await.expect("user");

    let profile = storage
        .user_profile(user)
        .await
        .expect("profile")
        .expect("some profile");
    assert!(profile.first_seen_at.is_none());

    let seen_at = Utc::now();
    assert!(storage
        .record_first_seen(user, seen_at)
        .await
        .expect("first stamp"));
    assert!(!storage
        .record_first_seen(user, seen_at + Duration::minutes(5))
        .await
        .expect("second stamp"));

    let profile = storage
        .user_profile(user)
        .await
        .expect("profile")
        .expect("some profile");
    let stored = profile.first_seen_at.expect("stamped");
    assert_eq!(stored.timestamp(), seen_at.timestamp());
}

#[tokio::test]
async fn find_group_miss_returns_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let missing = storage.find_group(GroupId(999)).await.expect("lookup");
    assert!(missing.is_none());
}

#[tokio::test]
async fn membership_is_a_set() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("alice").await.expect("user");
    let group = storage.create_group("grace").await.expect("group");

    assert!(storage
        .add_group_member(group, user)
        .await
        .expect("first add"));
    assert!(!storage
        .add_group_member(group, user)
        .await
        .expect("duplicate add"));

    assert!(storage
        .is_group_member(group, user)
        .await
        .expect("membership check"));
    assert_eq!(
        storage.group_member_count(group).await.expect("count"),
        1
    );
}

#[tokio::test]
async fn lists_members_with_usernames() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let group = storage.create_group("grace").await.expect("group");
    let bob = storage.create_user("bob").await.expect("user");
    let alice = storage.create_user("alice").await.expect("user");
    storage.add_group_member(group, bob).await.expect("add");
    storage.add_group_member(group, alice).await.expect("add");

    let members = storage.list_group_members(group).await.expect("members");
    let usernames: Vec<&str> = members.iter().map(|m| m.username.as_str()).collect();
    assert_eq!(usernames, vec!["alice", "bob"]);
}

#[tokio::test]
async fn recent_users_filters_by_creation_time() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.create_user("alice").await.expect("user");

    let recent = storage
        .recent_users(Utc::now() - Duration::hours(24))
        .await
        .expect("recent");
    assert_eq!(recent.len(), 1);

    let none = storage
        .recent_users(Utc::now() + Duration::hours(1))
        .await
        .expect("recent");
    assert!(none.is_empty());
}

#[tokio::test]
async fn group_host_trait_delegates_to_storage() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("alice").await.expect("user");
    let group = storage.create_group("grace").await.expect("group");

    let host: &dyn GroupHost = &storage;
    let found = host.find_group(group).await.expect("lookup");
    assert_eq!(found.expect("some group").name, "grace");
    assert!(host.add_member(group, user).await.expect("add"));
    assert!(host.is_member(group, user).await.expect("contains"));
    assert!(!host.add_member(group, user).await.expect("duplicate"));
}
