//! # Moderation Service
//!
//! The operations exposed to the review panel and the operator CLI, and the
//! per-individual lifecycle they enforce:
//!
//! ```text
//! candidate:  pending ──approve──▶ banned (terminal)
//!             pending ──reject───▶ removed
//! group:      (absent) ──scan──▶ pending ──approve──▶ approved ──▶ cascade
//!                                        ──reject───▶ rejected (terminal)
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shield_core::error::{AppError, Result};
use shield_core::models::{
    Actor, BannedRecord, Candidate, GroupDecision, GroupId, LogAction, LogEntry, Reviewer, Stats,
    SuspectGroup, SuspectStatus, UserId, DEFAULT_BAN_REASON,
};
use shield_core::records::{EntitySet, Records, RecordSet};
use shield_core::traits::{AccessProvider, GroupDirectory, Notifier};

use crate::cascade::{Cascade, CascadeReport};
use crate::detector::Detector;
use crate::harvester::Harvester;

/// When the suspicion scan runs relative to the approval that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Scan before `approve_candidate` returns; flagged groups are reported.
    Inline,
    /// Scan on a spawned task once the ban is committed.
    Detached,
}

#[derive(Debug, Clone)]
pub struct ScanPolicy {
    pub mode: ScanMode,
    /// Inline scans running longer than this are abandoned.
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            mode: ScanMode::Detached,
            timeout: Duration::from_secs(120),
            concurrency: 4,
        }
    }
}

/// Result of approving a candidate.
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub record: BannedRecord,
    /// `false` when the ban already existed and this call only finished it.
    pub newly_banned: bool,
    /// Groups flagged by an inline scan. Always empty for detached scans.
    pub flagged: Vec<SuspectGroup>,
}

/// Log entries for the bans in `bans` that the log does not record yet.
pub(crate) fn unlogged_bans<'a>(
    log: &[LogEntry],
    bans: impl IntoIterator<Item = &'a BannedRecord>,
) -> Vec<LogEntry> {
    let logged: HashSet<UserId> = log
        .iter()
        .filter(|entry| entry.action.is_ban())
        .map(|entry| entry.user_id)
        .collect();
    bans.into_iter()
        .filter(|record| !logged.contains(&record.user_id()))
        .map(LogEntry::for_ban)
        .collect()
}

/// State shared across every request.
#[derive(Clone)]
pub struct ShieldService {
    pub(crate) records: Arc<Records>,
    pub(crate) harvester: Harvester,
    pub(crate) detector: Detector,
    pub(crate) cascade: Cascade,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) access: Arc<dyn AccessProvider>,
    pub(crate) scan: ScanPolicy,
}

impl ShieldService {
    pub fn new(
        records: Arc<Records>,
        directory: Arc<dyn GroupDirectory>,
        notifier: Arc<dyn Notifier>,
        access: Arc<dyn AccessProvider>,
        scan: ScanPolicy,
    ) -> Self {
        let harvester = Harvester::new(directory);
        let detector = Detector::new(Arc::clone(&records), harvester.clone(), scan.concurrency);
        let cascade = Cascade::new(Arc::clone(&records), harvester.clone(), Arc::clone(&notifier));
        Self {
            records,
            harvester,
            detector,
            cascade,
            notifier,
            access,
            scan,
        }
    }

    /// Harvests a group and queues every member not already pending or banned.
    ///
    /// A failed harvest is logged and reported as zero new candidates.
    pub async fn submit_group(&self, group_id: GroupId) -> Result<usize> {
        if group_id.0 == 0 {
            return Err(AppError::InvalidInput("group id must be positive".into()));
        }

        let harvest = match self.harvester.harvest(group_id).await {
            Ok(harvest) => harvest,
            Err(err) => {
                tracing::error!(%group_id, error = %err, "group submission failed");
                return Ok(0);
            }
        };

        let locked = self.records.lock(&[EntitySet::Pending]).await;
        let mut pending: RecordSet<Candidate> = locked.load_keyed(EntitySet::Pending).await?;
        let banned: RecordSet<BannedRecord> = self.records.load_keyed(EntitySet::Banned).await;

        let mut added = 0;
        for member in harvest.members {
            if !banned.contains(&member.user_id) && pending.insert(member) {
                added += 1;
            }
        }
        if added > 0 {
            locked.save_keyed(EntitySet::Pending, &pending).await?;
        }

        tracing::info!(%group_id, added, "group submitted for review");
        Ok(added)
    }

    /// Bans one pending candidate, then scans the groups they belong to.
    ///
    /// The ban and its log entry are durable before the candidate leaves the
    /// pending set. Repeating a call that failed midway writes whatever the
    /// first attempt did not, then scans.
    pub async fn approve_candidate(
        &self,
        user_id: UserId,
        reason: Option<String>,
        reviewer: &Reviewer,
    ) -> Result<Approval> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_BAN_REASON.to_string());

        let (record, newly_banned) = {
            let locked = self
                .records
                .lock(&[EntitySet::Pending, EntitySet::Banned, EntitySet::ActionLog])
                .await;
            let mut pending: RecordSet<Candidate> = locked.load_keyed(EntitySet::Pending).await?;
            let mut banned: RecordSet<BannedRecord> = locked.load_keyed(EntitySet::Banned).await?;
            let mut log: Vec<LogEntry> = locked.load(EntitySet::ActionLog).await?;

            let candidate = pending
                .remove(&user_id)
                .ok_or_else(|| AppError::NotFound("Candidate", user_id.to_string()))?;

            let (record, newly_banned) = match banned.get(&user_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let record = BannedRecord::from_candidate(
                        candidate,
                        Actor::Reviewer(reviewer.name.clone()),
                        reason,
                    );
                    banned.insert(record.clone());
                    locked.save_keyed(EntitySet::Banned, &banned).await?;
                    (record, true)
                }
            };

            let missing = unlogged_bans(&log, [&record]);
            if !missing.is_empty() {
                log.extend(missing);
                locked.save(EntitySet::ActionLog, &log).await?;
            }
            locked.save_keyed(EntitySet::Pending, &pending).await?;
            (record, newly_banned)
        };

        if newly_banned {
            tracing::info!(%user_id, actor = %reviewer.name, "candidate banned");
        } else {
            // Banned while still queued: an earlier approval stopped partway.
            tracing::info!(%user_id, "finished an interrupted ban");
        }

        let flagged = self.scan_after_ban(user_id).await;
        Ok(Approval {
            record,
            newly_banned,
            flagged,
        })
    }

    async fn scan_after_ban(&self, user_id: UserId) -> Vec<SuspectGroup> {
        match self.scan.mode {
            ScanMode::Inline => {
                match tokio::time::timeout(self.scan.timeout, self.detector.scan(user_id)).await {
                    Ok(flagged) => flagged,
                    Err(_) => {
                        tracing::warn!(%user_id, "suspicion scan timed out");
                        Vec::new()
                    }
                }
            }
            ScanMode::Detached => {
                let detector = self.detector.clone();
                let timeout = self.scan.timeout;
                tokio::spawn(async move {
                    if tokio::time::timeout(timeout, detector.scan(user_id)).await.is_err() {
                        tracing::warn!(%user_id, "suspicion scan timed out");
                    }
                });
                Vec::new()
            }
        }
    }

    /// Clears a pending candidate without banning. No tombstone is kept.
    pub async fn reject_candidate(&self, user_id: UserId, reviewer: &Reviewer) -> Result<Candidate> {
        let candidate = {
            let locked = self.records.lock(&[EntitySet::Pending]).await;
            let mut pending: RecordSet<Candidate> = locked.load_keyed(EntitySet::Pending).await?;
            let candidate = pending
                .remove(&user_id)
                .ok_or_else(|| AppError::NotFound("Candidate", user_id.to_string()))?;
            locked.save_keyed(EntitySet::Pending, &pending).await?;
            candidate
        };

        tracing::info!(%user_id, actor = %reviewer.name, "candidate cleared");
        let entry = LogEntry::for_candidate(
            LogAction::Deny,
            Actor::Reviewer(reviewer.name.clone()),
            &candidate,
            None,
        );
        if let Err(err) = self.records.append(EntitySet::ActionLog, vec![entry]).await {
            tracing::error!(%user_id, error = %err, "failed to record rejection");
        }
        Ok(candidate)
    }

    /// Approves a flagged group and runs its cascade.
    pub async fn approve_suspect_group(&self, group_id: GroupId) -> Result<CascadeReport> {
        self.cascade.run(group_id).await
    }

    pub async fn reject_suspect_group(&self, group_id: GroupId) -> Result<SuspectGroup> {
        let locked = self.records.lock(&[EntitySet::SuspectGroups]).await;
        let mut suspects: RecordSet<SuspectGroup> =
            locked.load_keyed(EntitySet::SuspectGroups).await?;
        let suspect = suspects
            .get_mut(&group_id)
            .ok_or_else(|| AppError::NotFound("SuspectGroup", group_id.to_string()))?;

        if let Some(next) = suspect.status.decide(GroupDecision::Reject)? {
            suspect.status = next;
            let updated = suspect.clone();
            locked.save_keyed(EntitySet::SuspectGroups, &suspects).await?;
            tracing::info!(%group_id, "suspect group rejected");
            return Ok(updated);
        }
        Ok(suspect.clone())
    }

    pub async fn list_pending(&self) -> Vec<Candidate> {
        self.records.load_keyed(EntitySet::Pending).await.into_records()
    }

    pub async fn list_banned(&self) -> Vec<BannedRecord> {
        self.records.load_keyed(EntitySet::Banned).await.into_records()
    }

    pub async fn list_suspect_groups(&self, status: Option<SuspectStatus>) -> Vec<SuspectGroup> {
        let suspects: RecordSet<SuspectGroup> =
            self.records.load_keyed(EntitySet::SuspectGroups).await;
        suspects
            .into_records()
            .into_iter()
            .filter(|suspect| status.map_or(true, |wanted| suspect.status == wanted))
            .collect()
    }

    pub async fn action_log(&self) -> Vec<LogEntry> {
        self.records.load(EntitySet::ActionLog).await
    }

    pub async fn stats(&self) -> Stats {
        let log = self.action_log().await;
        let count = |action| log.iter().filter(|entry| entry.action == action).count();
        Stats {
            pending: self.list_pending().await.len(),
            banned: self.list_banned().await.len(),
            suspects_pending: self.list_suspect_groups(Some(SuspectStatus::Pending)).await.len(),
            approvals: count(LogAction::Approve),
            denials: count(LogAction::Deny),
            auto_bans: count(LogAction::AutoBan),
        }
    }
}
