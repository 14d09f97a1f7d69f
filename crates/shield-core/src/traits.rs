//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;

use crate::models::{GroupId, MemberPage, UserId};
use crate::records::EntitySet;

/// Durable storage contract for whole record sets.
///
/// A set is always read and written in full; there is no append at this layer.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the persisted bytes of a set, or `None` when it is absent or unreadable.
    async fn read(&self, set: EntitySet) -> Option<Vec<u8>>;

    /// Replaces the whole persisted set.
    async fn write(&self, set: EntitySet, contents: Vec<u8>) -> anyhow::Result<()>;
}

/// External group directory contract.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Human-readable name of a group.
    async fn group_name(&self, group_id: GroupId) -> anyhow::Result<String>;

    /// One page of a group's membership. `cursor` is `None` for the first page.
    async fn members_page(
        &self,
        group_id: GroupId,
        cursor: Option<String>,
    ) -> anyhow::Result<MemberPage>;

    /// Every group an individual currently belongs to.
    async fn user_groups(&self, user_id: UserId) -> anyhow::Result<Vec<GroupId>>;
}

/// Best-effort outbound notification contract.
///
/// Implementations must return immediately; delivery failures are theirs to log.
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, message: String);
}

/// Credential contract for reviewers and API consumers.
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait AccessProvider: Send + Sync {
    /// Generates a fresh random API token.
    fn issue_token(&self) -> anyhow::Result<String>;

    /// Compares a presented secret against a stored one.
    fn secrets_match(&self, presented: &str, stored: &str) -> bool;
}
