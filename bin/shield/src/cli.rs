//! Operator command line: one subcommand per exposed operation.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use shield_core::models::{GroupId, Reviewer, SuspectStatus, UserId};
use shield_engine::ShieldService;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "shield", version, about = "Group moderation pipeline")]
pub struct Cli {
    /// Reviewer passcode, required by commands that record a decision.
    #[arg(long, env = "SHIELD_PASSCODE", global = true, hide_env_values = true)]
    pub passcode: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Pending,
    Approved,
    Rejected,
}

impl From<StatusArg> for SuspectStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => SuspectStatus::Pending,
            StatusArg::Approved => SuspectStatus::Approved,
            StatusArg::Rejected => SuspectStatus::Rejected,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Harvest a group and queue its members for review.
    SubmitGroup { group_id: String },
    /// List candidates awaiting review.
    Pending,
    /// List banned individuals.
    Banned,
    /// Ban a pending candidate.
    Approve {
        user_id: u64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Clear a pending candidate without banning.
    Reject { user_id: u64 },
    /// List flagged groups.
    Suspects {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// Approve a flagged group and auto-ban its members.
    ApproveGroup { group_id: String },
    /// Reject a flagged group.
    RejectGroup { group_id: String },
    /// Look up whether an individual is banned.
    Query {
        user_id: u64,
        #[arg(long, env = "SHIELD_API_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Register a reviewer.
    AddReviewer { name: String, passcode: String },
    /// List reviewer names.
    Reviewers,
    /// File an API key request.
    RequestKey { project: String, contact: String },
    /// Grant a pending API key request.
    ApproveKey { request_id: Uuid },
    /// Drop a pending API key request.
    DenyKey { request_id: Uuid },
    /// List API key requests and grants.
    Keys,
    /// Print the action log.
    Log,
    /// Print counters.
    Stats,
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn acting_reviewer(service: &ShieldService, passcode: Option<&str>) -> anyhow::Result<Reviewer> {
    let passcode = passcode.context("this command needs --passcode or SHIELD_PASSCODE")?;
    Ok(service.authenticate_reviewer(passcode).await?)
}

pub async fn run(command: Command, service: &ShieldService, passcode: Option<&str>) -> anyhow::Result<()> {
    match command {
        Command::SubmitGroup { group_id } => {
            let added = service.submit_group(GroupId::parse(&group_id)?).await?;
            if added > 0 {
                println!("Submitted! {added} new users added for review.");
            } else {
                println!("No new users added or group is invalid.");
            }
        }
        Command::Pending => print(&service.list_pending().await)?,
        Command::Banned => print(&service.list_banned().await)?,
        Command::Approve { user_id, reason } => {
            let reviewer = acting_reviewer(service, passcode).await?;
            print(&service.approve_candidate(UserId(user_id), reason, &reviewer).await?)?;
        }
        Command::Reject { user_id } => {
            let reviewer = acting_reviewer(service, passcode).await?;
            print(&service.reject_candidate(UserId(user_id), &reviewer).await?)?;
        }
        Command::Suspects { status } => {
            print(&service.list_suspect_groups(status.map(Into::into)).await)?
        }
        Command::ApproveGroup { group_id } => {
            acting_reviewer(service, passcode).await?;
            let group_id = GroupId::parse(&group_id)?;
            let report = service
                .approve_suspect_group(group_id)
                .await
                .with_context(|| format!("cascade for group {group_id} did not finish; rerun approve-group to retry"))?;
            print(&report)?;
        }
        Command::RejectGroup { group_id } => {
            acting_reviewer(service, passcode).await?;
            print(&service.reject_suspect_group(GroupId::parse(&group_id)?).await?)?;
        }
        Command::Query { user_id, token } => {
            print(&service.query_ban_status(token.as_deref(), UserId(user_id)).await?)?
        }
        Command::AddReviewer { name, passcode } => {
            let reviewer = service.add_reviewer(&name, &passcode).await?;
            println!("Reviewer {} added.", reviewer.name);
        }
        Command::Reviewers => print(&service.list_reviewers().await)?,
        Command::RequestKey { project, contact } => {
            print(&service.request_api_key(&project, &contact).await?)?
        }
        Command::ApproveKey { request_id } => {
            acting_reviewer(service, passcode).await?;
            print(&service.approve_api_key_request(request_id).await?)?;
        }
        Command::DenyKey { request_id } => {
            acting_reviewer(service, passcode).await?;
            print(&service.deny_api_key_request(request_id).await?)?;
        }
        Command::Keys => {
            print(&serde_json::json!({
                "requests": service.list_key_requests().await,
                "grants": service.list_key_grants().await,
            }))?;
        }
        Command::Log => print(&service.action_log().await)?,
        Command::Stats => print(&service.stats().await)?,
    }
    Ok(())
}
