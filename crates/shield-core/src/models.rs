//! # Domain Models
//!
//! These structs represent the record sets Shield persists.
//! Field names serialize in camelCase so existing data files stay readable.
//! Every cross-reference (a candidate's group id, a log entry's username) is a
//! denormalized copy taken at write time, never a live reference.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Minimum number of already-banned members that gets a group flagged.
pub const SUSPECT_THRESHOLD: usize = 3;

/// Reason recorded on every flag raised by the detector.
pub const SUSPECT_REASON: &str = "group contains 3 or more banned members";

/// Reason recorded on every ban issued by a cascade.
pub const AUTO_BAN_REASON: &str = "auto-ban from approved suspect group";

/// Reason used when a reviewer bans without giving one.
pub const DEFAULT_BAN_REASON: &str = "No reason provided";

/// Placeholder shown when the directory could not resolve a group name.
pub const UNKNOWN_GROUP_NAME: &str = "Unknown Group";

/// Numeric identity of an individual in the external directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Numeric identity of a group in the external directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl GroupId {
    /// Rejects the zero id the directory never hands out.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().parse::<u64>() {
            Ok(id) if id > 0 => Ok(GroupId(id)),
            _ => Err(AppError::InvalidInput(format!("invalid group id {raw:?}"))),
        }
    }
}

/// Who made a moderation decision.
///
/// Persisted as a plain string: the reviewer's display name, or the sentinel
/// `"auto"` for decisions taken by a cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Actor {
    Reviewer(String),
    Auto,
}

impl Actor {
    pub const AUTO_SENTINEL: &'static str = "auto";
}

impl From<String> for Actor {
    fn from(raw: String) -> Self {
        if raw == Actor::AUTO_SENTINEL {
            Actor::Auto
        } else {
            Actor::Reviewer(raw)
        }
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        match actor {
            Actor::Reviewer(name) => name,
            Actor::Auto => Actor::AUTO_SENTINEL.to_string(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Reviewer(name) => f.write_str(name),
            Actor::Auto => f.write_str(Actor::AUTO_SENTINEL),
        }
    }
}

/// One `(identity, displayName)` pair as listed by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    pub username: String,
}

/// A page of group membership plus the opaque cursor for the next one.
#[derive(Debug, Clone, Default)]
pub struct MemberPage {
    pub members: Vec<Member>,
    /// `None` ends pagination.
    pub next_cursor: Option<String>,
}

/// Outcome of the best-effort group name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupName {
    Resolved(String),
    Unresolved,
}

impl GroupName {
    pub fn display_name(&self) -> &str {
        match self {
            GroupName::Resolved(name) => name,
            GroupName::Unresolved => UNKNOWN_GROUP_NAME,
        }
    }
}

/// An individual harvested from a source group, awaiting human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub user_id: UserId,
    pub username: String,
    pub group_id: GroupId,
    pub group_name: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed: bool,
}

/// Terminal, append-only record of a banned individual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannedRecord {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub reviewed_at: DateTime<Utc>,
    pub reviewed_by: Actor,
    pub reason: String,
}

impl BannedRecord {
    /// Closes out a candidate. The candidate is marked reviewed.
    pub fn from_candidate(mut candidate: Candidate, actor: Actor, reason: String) -> Self {
        candidate.reviewed = true;
        Self {
            candidate,
            reviewed_at: Utc::now(),
            reviewed_by: actor,
            reason,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.candidate.user_id
    }
}

/// Adjudication state of a flagged group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspectStatus {
    Pending,
    Approved,
    Rejected,
}

/// An operator's decision on a flagged group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupDecision {
    Approve,
    Reject,
}

impl SuspectStatus {
    /// Applies an operator decision.
    ///
    /// Returns `Ok(Some(next))` when the status changes, `Ok(None)` when the
    /// same decision was already applied, and `Conflict` when a terminal
    /// status is asked to flip.
    pub fn decide(self, decision: GroupDecision) -> Result<Option<SuspectStatus>> {
        match (self, decision) {
            (SuspectStatus::Pending, GroupDecision::Approve) => Ok(Some(SuspectStatus::Approved)),
            (SuspectStatus::Pending, GroupDecision::Reject) => Ok(Some(SuspectStatus::Rejected)),
            (SuspectStatus::Approved, GroupDecision::Approve)
            | (SuspectStatus::Rejected, GroupDecision::Reject) => Ok(None),
            (from, decision) => Err(AppError::Conflict(format!(
                "suspect group already {from:?}, cannot {decision:?}"
            ))),
        }
    }
}

/// A group flagged for disproportionate presence of banned individuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspectGroup {
    pub group_id: GroupId,
    /// The individual whose ban triggered the flag.
    pub triggered_by: UserId,
    pub reason: String,
    pub flagged_at: DateTime<Utc>,
    /// Banned members observed at flag time.
    pub banned_count: usize,
    pub status: SuspectStatus,
}

/// A human reviewer and the shared secret they sign in with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub name: String,
    pub passcode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    pub id: Uuid,
    pub project: String,
    pub contact: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyGrant {
    pub id: Uuid,
    pub project: String,
    pub contact: String,
    pub requested_at: DateTime<Utc>,
    pub token: String,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogAction {
    Approve,
    Deny,
    AutoBan,
}

impl LogAction {
    pub fn is_ban(self) -> bool {
        matches!(self, LogAction::Approve | LogAction::AutoBan)
    }
}

/// Immutable audit record; the only source of historical counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub action: LogAction,
    pub actor: Actor,
    pub user_id: UserId,
    pub username: String,
    pub group_id: GroupId,
    pub group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl LogEntry {
    pub fn for_candidate(
        action: LogAction,
        actor: Actor,
        candidate: &Candidate,
        reason: Option<String>,
    ) -> Self {
        Self {
            action,
            actor,
            user_id: candidate.user_id,
            username: candidate.username.clone(),
            group_id: candidate.group_id,
            group_name: candidate.group_name.clone(),
            reason,
            at: Utc::now(),
        }
    }

    pub fn for_ban(record: &BannedRecord) -> Self {
        let action = match record.reviewed_by {
            Actor::Auto => LogAction::AutoBan,
            Actor::Reviewer(_) => LogAction::Approve,
        };
        Self::for_candidate(
            action,
            record.reviewed_by.clone(),
            &record.candidate,
            Some(record.reason.clone()),
        )
    }
}

/// Answer to a ban lookup made with an API token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanStatus {
    pub banned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Simple counters for the review panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub pending: usize,
    pub banned: usize,
    pub suspects_pending: usize,
    pub approvals: usize,
    pub denials: usize,
    pub auto_bans: usize,
}
