use anyhow::Result;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use grace_group::is_first_login;
use shared::domain::GroupId;
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://forum.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateGroup {
        name: String,
    },
    CreateUser {
        username: String,
    },
    /// Verifies a grace-group setup against the live database: target group,
    /// current members, recent signups, and the first-login heuristic.
    CheckSetup {
        #[arg(long)]
        group_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateGroup { name } => {
            let group_id = storage.create_group(&name).await?;
            println!("created group_id={}", group_id.0);
        }
        Command::CreateUser { username } => {
            let user_id = storage.create_user(&username).await?;
            println!("created user_id={}", user_id.0);
        }
        Command::CheckSetup { group_id } => {
            check_setup(&storage, group_id).await?;
        }
    }

    Ok(())
}

async fn check_setup(storage: &Storage, group_id: i64) -> Result<()> {
    println!("=== grace-group setup check ===");

    if group_id <= 0 {
        println!("✗ configured group id {group_id} is not positive; assignments will be skipped");
        return Ok(());
    }

    let target = storage.find_group(GroupId(group_id)).await?;
    match &target {
        Some(group) => {
            let members = storage.group_member_count(group.group_id).await?;
            println!("✓ target group found: '{}' (id {})", group.name, group.group_id.0);
            println!("  - members: {members}");
        }
        None => {
            println!("✗ target group NOT FOUND (id {group_id})");
            println!("  known groups:");
            for group in storage.list_groups().await? {
                println!("    - {} (id {})", group.name, group.group_id.0);
            }
        }
    }

    println!();
    println!("=== recent users (last 24 hours) ===");
    let recent = storage.recent_users(Utc::now() - Duration::hours(24)).await?;
    if recent.is_empty() {
        println!("no users created in the last 24 hours");
    }
    for user in recent {
        let first_seen = user
            .first_seen_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let in_group = match &target {
            Some(group) => {
                if storage.is_group_member(group.group_id, user.user_id).await? {
                    "yes"
                } else {
                    "no"
                }
            }
            None => "n/a",
        };
        println!("  - {} (id {})", user.username, user.user_id.0);
        println!("    created: {}", user.created_at.to_rfc3339());
        println!("    first seen: {first_seen}");
        println!("    in grace group: {in_group}");
    }

    println!();
    println!("=== first-login heuristic ===");
    let now = Utc::now();
    report_check(
        "unseen user counts as a first login",
        is_first_login(None, now),
    );
    report_check(
        "user seen one minute ago counts as a first login",
        is_first_login(Some(now - Duration::minutes(1)), now),
    );
    report_check(
        "user seen yesterday does not",
        !is_first_login(Some(now - Duration::days(1)), now),
    );

    Ok(())
}

fn report_check(label: &str, passed: bool) {
    let mark = if passed { '✓' } else { '✗' };
    println!("{mark} {label}");
}
