//! # shield-directory-roblox
//!
//! `GroupDirectory` over the public Roblox groups REST API.
//!
//! Endpoints used:
//! - `GET /v1/groups/{groupId}` for the group name
//! - `GET /v1/groups/{groupId}/users?limit=&cursor=` for paginated membership
//! - `GET /v2/users/{userId}/groups/roles` for an individual's groups

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use shield_core::models::{GroupId, Member, MemberPage, UserId};
use shield_core::traits::GroupDirectory;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://groups.roblox.com";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct DirectoryOptions {
    pub base_url: String,
    /// Members per page; the API accepts 10, 25, 50 or 100.
    pub page_size: u32,
    pub timeout: Duration,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 100,
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Deserialize)]
struct GroupInfo {
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsersPage {
    #[serde(default)]
    data: Vec<GroupUser>,
    next_page_cursor: Option<String>,
}

#[derive(Deserialize)]
struct GroupUser {
    user: UserRef,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRef {
    user_id: u64,
    username: String,
}

#[derive(Deserialize)]
struct RolesPage {
    #[serde(default)]
    data: Vec<GroupRole>,
}

#[derive(Deserialize)]
struct GroupRole {
    group: GroupRef,
}

#[derive(Deserialize)]
struct GroupRef {
    id: u64,
}

pub struct RobloxDirectory {
    client: reqwest::Client,
    options: DirectoryOptions,
}

impl RobloxDirectory {
    pub fn new(options: DirectoryOptions) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("shield/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, options })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.options.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, DirectoryError> {
        let resp = self.client.get(url).query(query).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl GroupDirectory for RobloxDirectory {
    async fn group_name(&self, group_id: GroupId) -> anyhow::Result<String> {
        let url = self.url(&format!("/v1/groups/{group_id}"));
        let info: GroupInfo = self.get_json(&url, &[]).await?;
        info.name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| anyhow::anyhow!("group {group_id} has no name"))
    }

    async fn members_page(
        &self,
        group_id: GroupId,
        cursor: Option<String>,
    ) -> anyhow::Result<MemberPage> {
        let url = self.url(&format!("/v1/groups/{group_id}/users"));
        let mut query = vec![("limit", self.options.page_size.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let page: UsersPage = self.get_json(&url, &query).await?;
        tracing::debug!(%group_id, members = page.data.len(), "fetched membership page");

        Ok(MemberPage {
            members: page
                .data
                .into_iter()
                .map(|entry| Member {
                    user_id: UserId(entry.user.user_id),
                    username: entry.user.username,
                })
                .collect(),
            next_cursor: page.next_page_cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn user_groups(&self, user_id: UserId) -> anyhow::Result<Vec<GroupId>> {
        let url = self.url(&format!("/v2/users/{user_id}/groups/roles"));
        let roles: RolesPage = self.get_json(&url, &[]).await?;
        Ok(roles
            .data
            .into_iter()
            .map(|role| GroupId(role.group.id))
            .collect())
    }
}
