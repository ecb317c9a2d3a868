//! Zealy public API client backing the quest gate.

use crate::config::QuestConfig;
use async_trait::async_trait;
use invite_core::{InviteError, InviteResult, QuestMember, QuestProvider, QuestTask};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct QuestRecord {
    id: String,
    name: String,
    #[serde(default)]
    published: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    id: String,
    #[serde(default)]
    discord_id: Option<String>,
    #[serde(default)]
    discord_handle: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewPage {
    #[serde(default)]
    items: Vec<ReviewItem>,
}

#[derive(Debug, Deserialize)]
struct ReviewItem {
    quest: ReviewQuest,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ReviewQuest {
    id: String,
    name: String,
}

/// Quest provider backed by one Zealy community.
pub struct ZealyClient {
    client: Client,
    community_url: String,
    api_key: String,
}

impl ZealyClient {
    pub fn new(config: &QuestConfig) -> InviteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InviteError::Provider(e.to_string()))?;

        Ok(Self {
            client,
            community_url: format!(
                "{}/communities/{}",
                config.base_url.trim_end_matches('/'),
                config.subdomain
            ),
            api_key: config.api_key.clone().unwrap_or_default(),
        })
    }

    async fn send(&self, path: &str, query: &[(&str, &str)]) -> InviteResult<reqwest::Response> {
        let url = format!("{}{}", self.community_url, path);
        self.client
            .get(&url)
            .query(query)
            .header("x-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "*/*")
            .send()
            .await
            .map_err(|e| InviteError::Provider(format!("GET {path}: {e}")))
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> InviteResult<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(InviteError::Provider(format!("GET {path}: status {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| InviteError::Provider(format!("GET {path}: {e}")))
    }
}

#[async_trait]
impl QuestProvider for ZealyClient {
    async fn list_tasks(&self) -> InviteResult<Vec<QuestTask>> {
        let response = self.send("/quests", &[]).await?;
        let quests: Vec<QuestRecord> = Self::decode("/quests", response).await?;
        Ok(published_tasks(quests))
    }

    async fn find_member(&self, wallet: &str) -> InviteResult<Option<QuestMember>> {
        let response = self.send("/users", &[("ethAddress", wallet)]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(wallet, "no quest member for wallet");
            return Ok(None);
        }
        let user: UserRecord = Self::decode("/users", response).await?;
        Ok(Some(QuestMember {
            id: user.id,
            discord_id: user.discord_id.filter(|id| !id.is_empty()),
            discord_handle: user.discord_handle.filter(|handle| !handle.is_empty()),
        }))
    }

    async fn list_completed_tasks(&self, member_id: &str) -> InviteResult<Vec<QuestTask>> {
        let response = self.send("/reviews", &[("userId", member_id)]).await?;
        let page: ReviewPage = Self::decode("/reviews", response).await?;
        Ok(completed_tasks(page))
    }
}

fn published_tasks(quests: Vec<QuestRecord>) -> Vec<QuestTask> {
    quests
        .into_iter()
        .filter(|quest| quest.published)
        .map(|quest| QuestTask {
            id: quest.id,
            name: quest.name,
        })
        .collect()
}

/// Successful reviews, one entry per quest.
fn completed_tasks(page: ReviewPage) -> Vec<QuestTask> {
    let mut seen = HashSet::new();
    page.items
        .into_iter()
        .filter(|item| item.status.eq_ignore_ascii_case("success"))
        .filter(|item| seen.insert(item.quest.id.clone()))
        .map(|item| QuestTask {
            id: item.quest.id,
            name: item.quest.name,
        })
        .collect()
}
