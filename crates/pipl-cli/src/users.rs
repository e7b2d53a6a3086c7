//! # User Subcommand
//!
//! Seeds and edits the in-file user directory: accounts, paid-namespace
//! memberships and owned projects.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde::de::DeserializeOwned;

use pipl_core::{AccessLevel, Membership, NamespaceId, OwnedProject, Plan, ProjectId, UserId, Visibility};
use pipl_enforcement::{DirectoryEntry, InMemoryDirectory};

/// Arguments for `pipl user`.
#[derive(Args, Debug)]
pub struct UserArgs {
    #[command(subcommand)]
    pub command: UserCommand,
}

/// User directory subcommands.
#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Add or replace an active account.
    Add {
        /// Account id.
        #[arg(long)]
        id: i64,
        /// Login name.
        #[arg(long)]
        username: String,
        /// Notice address.
        #[arg(long)]
        email: String,
    },

    /// Add a namespace membership.
    Join {
        /// Account id.
        #[arg(long)]
        id: i64,
        /// Namespace id.
        #[arg(long)]
        namespace: i64,
        /// Subscription plan of the namespace (e.g. `premium`, `free`).
        #[arg(long, value_parser = parse_snake::<Plan>)]
        plan: Plan,
        /// Access level (e.g. `developer`, `guest`, `minimal_access`).
        #[arg(long, value_parser = parse_snake::<AccessLevel>, default_value = "developer")]
        access_level: AccessLevel,
        /// Membership comes through a parent group.
        #[arg(long)]
        inherited: bool,
    },

    /// Remove every membership in one namespace, or all with `--all`.
    Leave {
        /// Account id.
        #[arg(long)]
        id: i64,
        /// Namespace id.
        #[arg(long, required_unless_present = "all")]
        namespace: Option<i64>,
        /// Leave every namespace.
        #[arg(long)]
        all: bool,
    },

    /// Add a project to the account's personal namespace.
    Project {
        /// Owner account id.
        #[arg(long)]
        id: i64,
        /// Project id.
        #[arg(long)]
        project_id: i64,
        /// Full project path.
        #[arg(long)]
        path: String,
        /// `public`, `internal` or `private`.
        #[arg(long, value_parser = parse_snake::<Visibility>, default_value = "private")]
        visibility: Visibility,
        /// Number of commits.
        #[arg(long, default_value_t = 0)]
        commits: u64,
        /// Project is archived.
        #[arg(long)]
        archived: bool,
    },
}

/// Parse a snake_case enum name through its serde representation.
pub fn parse_snake<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
        .map_err(|_| format!("unrecognized value {raw:?}"))
}

/// Execute `pipl user`.
pub fn run_user(args: &UserArgs, directory: &InMemoryDirectory) -> Result<u8> {
    match &args.command {
        UserCommand::Add {
            id,
            username,
            email,
        } => {
            let user_id = UserId::new(*id);
            let mut entry = DirectoryEntry::active(user_id, username.as_str(), email.as_str());
            if let Some(existing) = directory.entry(user_id) {
                entry.memberships = existing.memberships;
                entry.projects = existing.projects;
                entry.admin_notes = existing.admin_notes;
            }
            directory.upsert(entry);
            println!("OK: user {user_id} ({username}) saved");
        }

        UserCommand::Join {
            id,
            namespace,
            plan,
            access_level,
            inherited,
        } => {
            let user_id = UserId::new(*id);
            let Some(entry) = directory.entry(user_id) else {
                bail!("unknown user {user_id}");
            };
            let namespace_id = NamespaceId::new(*namespace);
            let mut memberships: Vec<Membership> = entry
                .memberships
                .into_iter()
                .filter(|m| m.namespace_id != namespace_id)
                .collect();
            memberships.push(Membership {
                namespace_id,
                access_level: *access_level,
                plan: *plan,
                inherited: *inherited,
            });
            directory.set_memberships(user_id, memberships);
            println!("OK: user {user_id} joined namespace {namespace_id}");
        }

        UserCommand::Leave { id, namespace, all } => {
            let user_id = UserId::new(*id);
            let Some(entry) = directory.entry(user_id) else {
                bail!("unknown user {user_id}");
            };
            let remaining: Vec<Membership> = match (all, namespace) {
                (true, _) => Vec::new(),
                (false, Some(ns)) => entry
                    .memberships
                    .into_iter()
                    .filter(|m| m.namespace_id != NamespaceId::new(*ns))
                    .collect(),
                (false, None) => bail!("either --namespace or --all is required"),
            };
            directory.set_memberships(user_id, remaining);
            println!("OK: user {user_id} memberships updated");
        }

        UserCommand::Project {
            id,
            project_id,
            path,
            visibility,
            commits,
            archived,
        } => {
            let user_id = UserId::new(*id);
            let added = directory.add_project(
                user_id,
                OwnedProject {
                    id: ProjectId::new(*project_id),
                    path: path.clone(),
                    visibility: *visibility,
                    archived: *archived,
                    commit_count: *commits,
                },
            );
            if !added {
                bail!("unknown user {user_id}");
            }
            println!("OK: project {path} added to user {user_id}");
        }
    }
    Ok(0)
}
