use crate::domain::ids::UserId;
use crate::domain::ports::VoterEligibility;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Voting standing by reputation score.
///
/// Users without a recorded score count as zero, so the default threshold of
/// zero lets everyone vote.
#[derive(Default, Clone)]
pub struct ReputationBook {
    scores: Arc<RwLock<HashMap<UserId, i64>>>,
    min_reputation: i64,
}

impl ReputationBook {
    pub fn new(min_reputation: i64) -> Self {
        Self {
            scores: Arc::default(),
            min_reputation,
        }
    }

    pub async fn set_score(&self, user: UserId, score: i64) {
        let mut scores = self.scores.write().await;
        scores.insert(user, score);
    }

    pub async fn score(&self, user: &UserId) -> i64 {
        let scores = self.scores.read().await;
        scores.get(user).copied().unwrap_or(0)
    }
}

#[async_trait]
impl VoterEligibility for ReputationBook {
    async fn is_eligible(&self, voter: &UserId) -> Result<bool> {
        Ok(self.score(voter).await >= self.min_reputation)
    }
}
