//! Reviewer accounts, API key workflow and the token-gated ban lookup.

use chrono::Utc;
use shield_core::error::{AppError, Result};
use shield_core::models::{Actor, BanStatus, BannedRecord, KeyGrant, KeyRequest, Reviewer, UserId};
use shield_core::records::{EntitySet, RecordSet};
use uuid::Uuid;

use crate::service::ShieldService;

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

impl ShieldService {
    /// Registers a reviewer. Passcodes must be distinct across reviewers, and
    /// the name reserved for cascade decisions cannot be taken.
    pub async fn add_reviewer(&self, name: &str, passcode: &str) -> Result<Reviewer> {
        let name = required("name", name)?;
        let passcode = required("passcode", passcode)?;
        if name.eq_ignore_ascii_case(Actor::AUTO_SENTINEL) {
            return Err(AppError::InvalidInput(format!(
                "reviewer name {name:?} is reserved"
            )));
        }

        let locked = self.records.lock(&[EntitySet::Reviewers]).await;
        let mut reviewers: RecordSet<Reviewer> = locked.load_keyed(EntitySet::Reviewers).await?;
        if reviewers
            .iter()
            .any(|existing| self.access.secrets_match(&passcode, &existing.passcode))
        {
            return Err(AppError::Conflict("passcode already in use".into()));
        }

        let reviewer = Reviewer { name, passcode };
        reviewers.insert(reviewer.clone());
        locked.save_keyed(EntitySet::Reviewers, &reviewers).await?;
        tracing::info!(reviewer = %reviewer.name, "reviewer added");
        Ok(reviewer)
    }

    /// Adds the reviewer unless the passcode is already registered.
    pub async fn ensure_reviewer(&self, name: &str, passcode: &str) -> Result<bool> {
        match self.add_reviewer(name, passcode).await {
            Ok(_) => Ok(true),
            Err(AppError::Conflict(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn authenticate_reviewer(&self, passcode: &str) -> Result<Reviewer> {
        let reviewers: Vec<Reviewer> = self.records.load(EntitySet::Reviewers).await;
        reviewers
            .into_iter()
            .find(|reviewer| self.access.secrets_match(passcode, &reviewer.passcode))
            .ok_or_else(|| AppError::Unauthorized("unknown reviewer passcode".into()))
    }

    pub async fn list_reviewers(&self) -> Vec<String> {
        let reviewers: Vec<Reviewer> = self.records.load(EntitySet::Reviewers).await;
        reviewers.into_iter().map(|reviewer| reviewer.name).collect()
    }

    pub async fn request_api_key(&self, project: &str, contact: &str) -> Result<KeyRequest> {
        let request = KeyRequest {
            id: Uuid::new_v4(),
            project: required("project", project)?,
            contact: required("contact", contact)?,
            requested_at: Utc::now(),
        };
        self.records
            .append(EntitySet::KeyRequests, vec![request.clone()])
            .await?;
        tracing::info!(request_id = %request.id, project = %request.project, "api key requested");
        Ok(request)
    }

    /// Moves a request to the grant list with a fresh token.
    ///
    /// The request is matched by id, not by position. The grant is written
    /// before the request is removed.
    pub async fn approve_api_key_request(&self, request_id: Uuid) -> Result<KeyGrant> {
        let locked = self
            .records
            .lock(&[EntitySet::KeyRequests, EntitySet::KeyGrants])
            .await;
        let mut requests: RecordSet<KeyRequest> = locked.load_keyed(EntitySet::KeyRequests).await?;
        let mut grants: Vec<KeyGrant> = locked.load(EntitySet::KeyGrants).await?;

        let request = requests
            .remove(&request_id)
            .ok_or_else(|| AppError::NotFound("KeyRequest", request_id.to_string()))?;
        let token = self.access.issue_token().map_err(AppError::internal)?;

        let grant = KeyGrant {
            id: request.id,
            project: request.project,
            contact: request.contact,
            requested_at: request.requested_at,
            token,
            granted_at: Utc::now(),
        };
        grants.push(grant.clone());
        locked.save(EntitySet::KeyGrants, &grants).await?;
        locked.save_keyed(EntitySet::KeyRequests, &requests).await?;

        tracing::info!(request_id = %grant.id, project = %grant.project, "api key granted");
        Ok(grant)
    }

    pub async fn deny_api_key_request(&self, request_id: Uuid) -> Result<KeyRequest> {
        let locked = self.records.lock(&[EntitySet::KeyRequests]).await;
        let mut requests: RecordSet<KeyRequest> = locked.load_keyed(EntitySet::KeyRequests).await?;
        let request = requests
            .remove(&request_id)
            .ok_or_else(|| AppError::NotFound("KeyRequest", request_id.to_string()))?;
        locked.save_keyed(EntitySet::KeyRequests, &requests).await?;
        tracing::info!(%request_id, "api key request denied");
        Ok(request)
    }

    pub async fn list_key_requests(&self) -> Vec<KeyRequest> {
        self.records.load(EntitySet::KeyRequests).await
    }

    pub async fn list_key_grants(&self) -> Vec<KeyGrant> {
        self.records.load(EntitySet::KeyGrants).await
    }

    /// Token-gated lookup. A positive answer notifies the operators.
    ///
    /// Nothing is read from the banned set until the token checks out.
    pub async fn query_ban_status(&self, token: Option<&str>, user_id: UserId) -> Result<BanStatus> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthorized("missing API token".into()))?;

        let grants: Vec<KeyGrant> = self.records.load(EntitySet::KeyGrants).await;
        let grant = grants
            .iter()
            .find(|grant| self.access.secrets_match(token, &grant.token))
            .ok_or_else(|| AppError::Unauthorized("invalid API token".into()))?;

        let banned: RecordSet<BannedRecord> = self.records.load_keyed(EntitySet::Banned).await;
        let Some(record) = banned.get(&user_id) else {
            return Ok(BanStatus {
                banned: false,
                reason: None,
                username: None,
            });
        };

        self.notifier.notify(format!(
            "{} looked up banned user {} ({})",
            grant.project, record.candidate.username, user_id
        ));
        Ok(BanStatus {
            banned: true,
            reason: Some(record.reason.clone()),
            username: Some(record.candidate.username.clone()),
        })
    }
}
