//! # Suspicion Detector
//!
//! Re-examines every group a newly banned individual belongs to and flags the
//! ones already holding [`SUSPECT_THRESHOLD`] or more banned members.
//!
//! The scan is best-effort and additive: a failing group is skipped, and the
//! only effect is new `pending` suspect records for an operator to adjudicate.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use shield_core::models::{
    BannedRecord, GroupId, SuspectGroup, SuspectStatus, UserId, SUSPECT_REASON, SUSPECT_THRESHOLD,
};
use shield_core::records::{EntitySet, Records, RecordSet};

use crate::harvester::Harvester;

#[derive(Clone)]
pub struct Detector {
    records: Arc<Records>,
    harvester: Harvester,
    concurrency: usize,
}

impl Detector {
    pub fn new(records: Arc<Records>, harvester: Harvester, concurrency: usize) -> Self {
        Self {
            records,
            harvester,
            concurrency: concurrency.max(1),
        }
    }

    /// Returns the suspect groups this scan created.
    pub async fn scan(&self, user_id: UserId) -> Vec<SuspectGroup> {
        let groups = match self.harvester.directory().user_groups(user_id).await {
            Ok(groups) => groups,
            Err(err) => {
                tracing::warn!(%user_id, error = %err, "group lookup failed, scan skipped");
                return Vec::new();
            }
        };

        // Groups already flagged in any status are never re-flagged, so skip their harvest.
        let known: RecordSet<SuspectGroup> = self.records.load_keyed(EntitySet::SuspectGroups).await;
        let mut seen = HashSet::new();
        let to_check: Vec<GroupId> = groups
            .into_iter()
            .filter(|group_id| !known.contains(group_id) && seen.insert(*group_id))
            .collect();
        if to_check.is_empty() {
            return Vec::new();
        }

        let harvester = &self.harvester;
        let harvests = stream::iter(to_check)
            .map(|group_id| async move { (group_id, harvester.harvest(group_id).await) })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let banned: RecordSet<BannedRecord> = self.records.load_keyed(EntitySet::Banned).await;
        let mut candidates = Vec::new();
        for (group_id, harvest) in harvests {
            let harvest = match harvest {
                Ok(harvest) => harvest,
                Err(err) => {
                    tracing::warn!(%group_id, error = %err, "group skipped during scan");
                    continue;
                }
            };
            let banned_count = harvest
                .members
                .iter()
                .map(|member| member.user_id)
                .collect::<HashSet<_>>()
                .into_iter()
                .filter(|id| banned.contains(id))
                .count();

            tracing::debug!(%group_id, banned_count, "group scanned");
            if banned_count >= SUSPECT_THRESHOLD {
                candidates.push(SuspectGroup {
                    group_id,
                    triggered_by: user_id,
                    reason: SUSPECT_REASON.to_string(),
                    flagged_at: Utc::now(),
                    banned_count,
                    status: SuspectStatus::Pending,
                });
            }
        }

        if candidates.is_empty() {
            return Vec::new();
        }
        self.persist(candidates).await
    }

    /// Inserts under the set lock, rechecking uniqueness against the current file.
    async fn persist(&self, candidates: Vec<SuspectGroup>) -> Vec<SuspectGroup> {
        let locked = self.records.lock(&[EntitySet::SuspectGroups]).await;
        let mut suspects: RecordSet<SuspectGroup> =
            match locked.load_keyed(EntitySet::SuspectGroups).await {
                Ok(suspects) => suspects,
                Err(err) => {
                    tracing::error!(error = %err, "suspect groups unavailable");
                    return Vec::new();
                }
            };

        let flagged: Vec<SuspectGroup> = candidates
            .into_iter()
            .filter(|suspect| suspects.insert(suspect.clone()))
            .collect();
        if flagged.is_empty() {
            return flagged;
        }

        if let Err(err) = locked.save_keyed(EntitySet::SuspectGroups, &suspects).await {
            tracing::error!(error = %err, "failed to persist flagged groups");
            return Vec::new();
        }
        for suspect in &flagged {
            tracing::info!(
                group_id = %suspect.group_id,
                banned_count = suspect.banned_count,
                triggered_by = %suspect.triggered_by,
                "group flagged as suspect"
            );
        }
        flagged
    }
}
