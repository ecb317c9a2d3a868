//! Quest provider contract and the task gate in front of task-code claims.

use crate::cache::{CachePolicy, TtlCache};
use crate::{InviteError, InviteResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A published quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestTask {
    pub id: String,
    pub name: String,
}

/// Quest-provider member linked to a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestMember {
    pub id: String,
    pub discord_id: Option<String>,
    pub discord_handle: Option<String>,
}

/// External quest provider.
#[async_trait]
pub trait QuestProvider: Send + Sync {
    /// Published tasks every claimant must complete.
    async fn list_tasks(&self) -> InviteResult<Vec<QuestTask>>;

    /// Member linked to `wallet`, `None` when the provider knows no such member.
    async fn find_member(&self, wallet: &str) -> InviteResult<Option<QuestMember>>;

    async fn list_completed_tasks(&self, member_id: &str) -> InviteResult<Vec<QuestTask>>;
}

/// Cached quest lookups plus the completion check for task claims.
pub struct TaskGate {
    provider: Arc<dyn QuestProvider>,
    tasks: TtlCache<(), Vec<QuestTask>>,
    members: TtlCache<String, QuestMember>,
    progress: TtlCache<String, Vec<QuestTask>>,
}

impl TaskGate {
    pub fn new(provider: Arc<dyn QuestProvider>, policy: CachePolicy) -> Self {
        Self {
            provider,
            tasks: TtlCache::new(policy.tasks_ttl),
            members: TtlCache::new(policy.member_ttl),
            progress: TtlCache::new(policy.progress_ttl),
        }
    }

    pub async fn required_tasks(&self) -> InviteResult<Vec<QuestTask>> {
        self.tasks
            .get_or_try_insert_with((), || self.provider.list_tasks())
            .await
    }

    /// Only found members are cached; an unknown wallet is asked again next time.
    pub async fn member(&self, wallet: &str) -> InviteResult<Option<QuestMember>> {
        let key = wallet.to_ascii_lowercase();
        if let Some(member) = self.members.get(&key) {
            return Ok(Some(member));
        }

        let member = self.provider.find_member(&key).await?;
        if let Some(member) = &member {
            self.members.insert(key, member.clone());
        }
        Ok(member)
    }

    pub async fn completed_tasks(&self, member: &QuestMember) -> InviteResult<Vec<QuestTask>> {
        self.progress
            .get_or_try_insert_with(member.id.clone(), || {
                self.provider.list_completed_tasks(&member.id)
            })
            .await
    }

    /// Completed tasks of the member behind `wallet`; empty for unknown wallets.
    pub async fn progress_for_wallet(&self, wallet: &str) -> InviteResult<Vec<QuestTask>> {
        match self.member(wallet).await? {
            Some(member) => self.completed_tasks(&member).await,
            None => Ok(Vec::new()),
        }
    }

    /// Admits `wallet` to a task claim.
    ///
    /// The member must exist, carry a Discord id, and have completed every
    /// required task. An empty required set admits nobody.
    pub async fn admit(&self, wallet: &str) -> InviteResult<QuestMember> {
        let required = self.required_tasks().await?;
        if required.is_empty() {
            return Err(InviteError::TaskIncomplete(
                "no published tasks to complete".to_string(),
            ));
        }

        let member = self.member(wallet).await?.ok_or_else(|| {
            InviteError::TaskIncomplete(format!("wallet {wallet} has no quest profile"))
        })?;

        let completed = self.completed_tasks(&member).await?;
        let done: HashSet<&str> = completed.iter().map(|task| task.id.as_str()).collect();
        let missing: Vec<&str> = required
            .iter()
            .map(|task| task.id.as_str())
            .filter(|id| !done.contains(id))
            .collect();
        if !missing.is_empty() {
            debug!(wallet, missing = missing.len(), "task gate closed");
            return Err(InviteError::TaskIncomplete(format!(
                "{} of {} tasks outstanding",
                missing.len(),
                required.len()
            )));
        }

        if member.discord_id.as_deref().map_or(true, str::is_empty) {
            return Err(InviteError::IdentityIncomplete(format!(
                "quest member {} has no linked discord account",
                member.id
            )));
        }

        Ok(member)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeQuestProvider;
    use super::*;
    use std::sync::atomic::Ordering;

    fn gate(provider: FakeQuestProvider) -> (TaskGate, Arc<FakeQuestProvider>) {
        let provider = Arc::new(provider);
        (
            TaskGate::new(provider.clone(), CachePolicy::default()),
            provider,
        )
    }

    #[tokio::test]
    async fn admits_member_with_all_tasks_done() {
        let (gate, _) = gate(
            FakeQuestProvider::default()
                .with_tasks(&["q1", "q2"])
                .with_member("0xabc", "m-1", Some("d-1"))
                .with_completed("m-1", &["q2", "q1", "q9"]),
        );

        let member = gate.admit("0xABC").await.unwrap();
        assert_eq!(member.id, "m-1");
    }

    #[tokio::test]
    async fn outstanding_task_keeps_gate_closed() {
        let (gate, _) = gate(
            FakeQuestProvider::default()
                .with_tasks(&["q1", "q2"])
                .with_member("0xabc", "m-1", Some("d-1"))
                .with_completed("m-1", &["q1"]),
        );

        assert!(matches!(
            gate.admit("0xabc").await,
            Err(InviteError::TaskIncomplete(_))
        ));
    }

    #[tokio::test]
    async fn empty_required_set_keeps_gate_closed() {
        let (gate, _) = gate(
            FakeQuestProvider::default()
                .with_member("0xabc", "m-1", Some("d-1"))
                .with_completed("m-1", &["q1"]),
        );

        assert!(matches!(
            gate.admit("0xabc").await,
            Err(InviteError::TaskIncomplete(_))
        ));
    }

    #[tokio::test]
    async fn member_without_discord_is_incomplete() {
        let (gate, _) = gate(
            FakeQuestProvider::default()
                .with_tasks(&["q1"])
                .with_member("0xabc", "m-1", None)
                .with_completed("m-1", &["q1"]),
        );

        assert!(matches!(
            gate.admit("0xabc").await,
            Err(InviteError::IdentityIncomplete(_))
        ));
    }

    #[tokio::test]
    async fn lookups_are_cached_per_policy() {
        let (gate, provider) = gate(
            FakeQuestProvider::default()
                .with_tasks(&["q1"])
                .with_member("0xabc", "m-1", Some("d-1")),
        );

        for _ in 0..3 {
            gate.required_tasks().await.unwrap();
            gate.member("0xabc").await.unwrap();
            gate.member("0xunknown").await.unwrap();
        }
        assert_eq!(provider.task_calls.load(Ordering::SeqCst), 1);
        // One for the known member, three for the unknown one.
        assert_eq!(provider.member_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unknown_wallet_has_no_progress() {
        let (gate, _) = gate(FakeQuestProvider::default());
        assert!(gate.progress_for_wallet("0xnobody").await.unwrap().is_empty());
    }
}
