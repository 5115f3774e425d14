use super::ids::{DisputeId, EscrowId, InvoiceId, UserId, VoteId};
use crate::error::EscrowError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeState {
    Open,
    VotingClosed,
    Resolved,
    /// Pulled back by the opener before voting ended.
    Withdrawn,
}

impl DisputeState {
    /// Active disputes block a second dispute on the same escrow entry.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::VotingClosed)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisputeCategory {
    Quality,
    Scope,
    Deadline,
    Payment,
    Communication,
    #[default]
    Other,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The community sided with the freelancer; funds are released.
    For,
    /// The community sided with the client; funds are refunded.
    Against,
    Tied,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    #[serde(alias = "FOR")]
    For,
    #[serde(alias = "AGAINST")]
    Against,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: VoteId,
    pub dispute_id: DisputeId,
    pub voter_id: UserId,
    pub choice: VoteChoice,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(
        dispute_id: DisputeId,
        voter_id: UserId,
        choice: VoteChoice,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VoteId::new(),
            dispute_id,
            voter_id,
            choice,
            created_at: now,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub votes_for: u32,
    pub votes_against: u32,
}

impl Tally {
    pub fn from_votes(votes: &[Vote]) -> Self {
        votes.iter().fold(Self::default(), |mut tally, vote| {
            match vote.choice {
                VoteChoice::For => tally.votes_for += 1,
                VoteChoice::Against => tally.votes_against += 1,
            }
            tally
        })
    }

    pub fn total(&self) -> u32 {
        self.votes_for + self.votes_against
    }

    /// Strict majority wins; equal counts, zero votes included, tie. A tally
    /// below the quorum, when one is configured, also counts as a tie.
    pub fn outcome(&self, quorum: Option<u32>) -> Outcome {
        if quorum.is_some_and(|q| self.total() < q) {
            return Outcome::Tied;
        }
        match self.votes_for.cmp(&self.votes_against) {
            std::cmp::Ordering::Greater => Outcome::For,
            std::cmp::Ordering::Less => Outcome::Against,
            std::cmp::Ordering::Equal => Outcome::Tied,
        }
    }
}

/// What a party submits when filing a dispute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDispute {
    pub invoice_id: InvoiceId,
    pub opener_id: UserId,
    #[serde(default)]
    pub category: DisputeCategory,
    pub reason: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub id: DisputeId,
    pub escrow_entry_id: EscrowId,
    pub invoice_id: InvoiceId,
    pub opener_id: UserId,
    pub category: DisputeCategory,
    pub reason: String,
    pub description: String,
    pub expected_outcome: String,
    pub evidence_refs: Vec<String>,
    pub state: DisputeState,
    /// Set only when the dispute is resolved.
    pub outcome: Option<Outcome>,
    pub tally: Option<Tally>,
    pub created_at: DateTime<Utc>,
    pub voting_closes_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Dispute {
    pub fn open(
        request: OpenDispute,
        escrow_entry_id: EscrowId,
        now: DateTime<Utc>,
        voting_window: Duration,
    ) -> Result<Self, EscrowError> {
        if request.reason.trim().is_empty() {
            return Err(EscrowError::ValidationError(
                "dispute reason must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: DisputeId::new(),
            escrow_entry_id,
            invoice_id: request.invoice_id,
            opener_id: request.opener_id,
            category: request.category,
            reason: request.reason,
            description: request.description,
            expected_outcome: request.expected_outcome,
            evidence_refs: request.evidence,
            state: DisputeState::Open,
            outcome: None,
            tally: None,
            created_at: now,
            voting_closes_at: now + voting_window,
            resolved_at: None,
            version: 0,
        })
    }

    pub fn accepts_votes_at(&self, now: DateTime<Utc>) -> bool {
        self.state == DisputeState::Open && now < self.voting_closes_at
    }

    /// `OPEN -> VOTING_CLOSED`, only once the window has elapsed.
    pub fn close_voting(&mut self, now: DateTime<Utc>) -> Result<(), EscrowError> {
        if self.state != DisputeState::Open {
            return Err(EscrowError::VotingClosed(self.id.to_string()));
        }
        if now < self.voting_closes_at {
            return Err(EscrowError::VotingStillOpen(self.id.to_string()));
        }
        self.state = DisputeState::VotingClosed;
        self.version += 1;
        Ok(())
    }

    /// `VOTING_CLOSED -> RESOLVED`. The dispute is immutable afterwards.
    pub fn resolve(
        &mut self,
        tally: Tally,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        if self.state != DisputeState::VotingClosed {
            return Err(EscrowError::ValidationError(format!(
                "dispute {} cannot be resolved from {:?}",
                self.id, self.state
            )));
        }
        self.state = DisputeState::Resolved;
        self.outcome = Some(outcome);
        self.tally = Some(tally);
        self.resolved_at = Some(now);
        self.version += 1;
        Ok(())
    }

    pub fn withdraw(&mut self, now: DateTime<Utc>) -> Result<(), EscrowError> {
        if self.state != DisputeState::Open {
            return Err(EscrowError::VotingClosed(self.id.to_string()));
        }
        self.state = DisputeState::Withdrawn;
        self.resolved_at = Some(now);
        self.version += 1;
        Ok(())
    }
}
