//! # Group Harvester
//!
//! Walks a group's membership listing page by page into a flat list of
//! candidates. Name lookup is best-effort; membership failures propagate.

use std::sync::Arc;

use chrono::Utc;
use shield_core::error::{AppError, Result};
use shield_core::models::{Candidate, GroupId, GroupName};
use shield_core::traits::GroupDirectory;

/// A group's full current membership.
#[derive(Debug, Clone)]
pub struct Harvest {
    pub group_id: GroupId,
    pub name: GroupName,
    /// Unreviewed candidates tagged with this group, in listing order.
    pub members: Vec<Candidate>,
}

#[derive(Clone)]
pub struct Harvester {
    directory: Arc<dyn GroupDirectory>,
}

impl Harvester {
    pub fn new(directory: Arc<dyn GroupDirectory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<dyn GroupDirectory> {
        &self.directory
    }

    pub async fn resolve_name(&self, group_id: GroupId) -> GroupName {
        match self.directory.group_name(group_id).await {
            Ok(name) => GroupName::Resolved(name),
            Err(err) => {
                tracing::warn!(%group_id, error = %err, "group name lookup failed");
                GroupName::Unresolved
            }
        }
    }

    /// Fetches every page until the directory stops returning a cursor.
    pub async fn harvest(&self, group_id: GroupId) -> Result<Harvest> {
        let name = self.resolve_name(group_id).await;
        let group_name = name.display_name().to_string();

        let mut members = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .directory
                .members_page(group_id, cursor.clone())
                .await
                .map_err(|err| {
                    AppError::ExternalDependency(format!("harvest of group {group_id}: {err:#}"))
                })?;

            let harvested_at = Utc::now();
            members.extend(page.members.into_iter().map(|member| Candidate {
                user_id: member.user_id,
                username: member.username,
                group_id,
                group_name: group_name.clone(),
                submitted_at: harvested_at,
                reviewed: false,
            }));

            match page.next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(AppError::ExternalDependency(format!(
                        "harvest of group {group_id}: directory repeated cursor {next:?}"
                    )));
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(%group_id, count = members.len(), "harvested group");
        Ok(Harvest {
            group_id,
            name,
            members,
        })
    }
}
