//! # Cascade Executor
//!
//! Bulk auto-ban of the queued candidates of an approved suspect group.
//!
//! Every step is idempotent, so a cascade that failed halfway can be retried
//! by approving the group again:
//! 1. the group is marked `approved` (a no-op when it already is);
//! 2. the group is re-harvested, never trusting the flag-time snapshot;
//! 3. pending candidates queued from this group who are still members and
//!    not yet banned get an `auto` ban; people never submitted are untouched;
//! 4. bans are saved, then their log entries, then the pending set shrinks.
//!    A retry finds anyone left banned-but-pending and writes the missing
//!    log entries before clearing them;
//! 5. one summary notification for the bans this run recorded.
//!
//! Failures after step 1 leave the group `approved` and surface the group id.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use shield_core::error::{AppError, Result};
use shield_core::models::{
    Actor, BannedRecord, Candidate, GroupDecision, GroupId, LogAction, LogEntry, SuspectGroup,
    UserId, AUTO_BAN_REASON,
};
use shield_core::records::{EntitySet, Records, RecordSet};
use shield_core::traits::Notifier;

use crate::harvester::Harvester;
use crate::service::unlogged_bans;

/// What one cascade run changed.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub group_id: GroupId,
    pub group_name: String,
    /// Auto bans whose log entry this run wrote, including ones an
    /// interrupted earlier run left unlogged.
    pub banned: Vec<BannedRecord>,
}

#[derive(Clone)]
pub struct Cascade {
    records: Arc<Records>,
    harvester: Harvester,
    notifier: Arc<dyn Notifier>,
}

impl Cascade {
    pub fn new(records: Arc<Records>, harvester: Harvester, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            records,
            harvester,
            notifier,
        }
    }

    pub async fn run(&self, group_id: GroupId) -> Result<CascadeReport> {
        self.mark_approved(group_id).await?;

        let report = self.execute(group_id).await.inspect_err(|err| {
            tracing::error!(
                %group_id,
                error = %err,
                "cascade aborted; group stays approved, approve again to retry"
            );
        })?;

        if !report.banned.is_empty() {
            self.notifier.notify(format!(
                "{} users auto-banned from suspect group {} ({})",
                report.banned.len(),
                report.group_id,
                report.group_name
            ));
        }
        Ok(report)
    }

    async fn mark_approved(&self, group_id: GroupId) -> Result<()> {
        let locked = self.records.lock(&[EntitySet::SuspectGroups]).await;
        let mut suspects: RecordSet<SuspectGroup> =
            locked.load_keyed(EntitySet::SuspectGroups).await?;
        let suspect = suspects
            .get_mut(&group_id)
            .ok_or_else(|| AppError::NotFound("SuspectGroup", group_id.to_string()))?;

        if let Some(next) = suspect.status.decide(GroupDecision::Approve)? {
            suspect.status = next;
            locked.save_keyed(EntitySet::SuspectGroups, &suspects).await?;
            tracing::info!(%group_id, "suspect group approved");
        }
        Ok(())
    }

    async fn execute(&self, group_id: GroupId) -> Result<CascadeReport> {
        let harvest = self.harvester.harvest(group_id).await?;
        let group_name = harvest.name.display_name().to_string();
        let members: HashSet<UserId> = harvest.members.iter().map(|m| m.user_id).collect();

        let locked = self
            .records
            .lock(&[EntitySet::Pending, EntitySet::Banned, EntitySet::ActionLog])
            .await;
        let mut pending: RecordSet<Candidate> = locked.load_keyed(EntitySet::Pending).await?;
        let mut banned: RecordSet<BannedRecord> = locked.load_keyed(EntitySet::Banned).await?;
        let mut log: Vec<LogEntry> = locked.load(EntitySet::ActionLog).await?;

        // Every queued candidate of this group that leaves the queue as banned.
        let mut settled = Vec::new();
        let mut fresh = Vec::new();
        for candidate in pending.iter().filter(|c| c.group_id == group_id) {
            if let Some(existing) = banned.get(&candidate.user_id) {
                settled.push(existing.clone());
            } else if members.contains(&candidate.user_id) {
                let record = BannedRecord::from_candidate(
                    candidate.clone(),
                    Actor::Auto,
                    AUTO_BAN_REASON.to_string(),
                );
                settled.push(record.clone());
                fresh.push(record);
            }
        }

        if !fresh.is_empty() {
            for record in &fresh {
                banned.insert(record.clone());
            }
            locked.save_keyed(EntitySet::Banned, &banned).await?;
        }

        let entries = unlogged_bans(&log, &settled);
        let recorded: HashSet<UserId> = entries
            .iter()
            .filter(|entry| entry.action == LogAction::AutoBan)
            .map(|entry| entry.user_id)
            .collect();
        if !entries.is_empty() {
            log.extend(entries);
            locked.save(EntitySet::ActionLog, &log).await?;
        }

        if !settled.is_empty() {
            pending.retain(|c| !(c.group_id == group_id && banned.contains(&c.user_id)));
            locked.save_keyed(EntitySet::Pending, &pending).await?;
        }
        drop(locked);

        let banned_now: Vec<BannedRecord> = settled
            .into_iter()
            .filter(|record| recorded.contains(&record.user_id()))
            .collect();
        tracing::info!(%group_id, count = banned_now.len(), "cascade complete");
        Ok(CascadeReport {
            group_id,
            group_name,
            banned: banned_now,
        })
    }
}
