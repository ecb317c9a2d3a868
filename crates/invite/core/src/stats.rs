use crate::model::CodeType;
use crate::store::InviteStorage;
use crate::InviteResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pool counters for one code type, or all of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeStats {
    pub total: u64,
    pub remaining: u64,
}

impl CodeStats {
    pub fn bound(&self) -> u64 {
        self.total.saturating_sub(self.remaining)
    }
}

impl std::ops::Add for CodeStats {
    type Output = CodeStats;

    fn add(self, rhs: CodeStats) -> CodeStats {
        CodeStats {
            total: self.total + rhs.total,
            remaining: self.remaining + rhs.remaining,
        }
    }
}

/// Read-only counters. Reads take no locks and may trail concurrent binds.
#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn InviteStorage>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn InviteStorage>) -> Self {
        Self { store }
    }

    pub async fn stats(&self, code_type: CodeType) -> InviteResult<CodeStats> {
        Ok(CodeStats {
            total: self.store.count_by_type(code_type).await?,
            remaining: self.store.count_unbound_by_type(code_type).await?,
        })
    }

    /// Sum over every code type.
    pub async fn totals(&self) -> InviteResult<CodeStats> {
        let mut sum = CodeStats::default();
        for code_type in CodeType::ALL {
            sum = sum + self.stats(code_type).await?;
        }
        Ok(sum)
    }
}
