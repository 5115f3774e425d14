use super::ledger::{EscrowLedger, ResumeAt};
use super::locks::KeyedLocks;
use crate::config::TiePolicy;
use crate::domain::clock::ClockArc;
use crate::domain::dispute::{
    Dispute, DisputeState, OpenDispute, Outcome, Tally, Vote, VoteChoice,
};
use crate::domain::escrow::{Actor, EscrowEntry};
use crate::domain::ids::{DisputeId, InvoiceId, UserId};
use crate::domain::invoice::Invoice;
use crate::domain::ports::{DisputeStoreArc, Stores, VoteStoreArc, VoterEligibilityArc};
use crate::error::{EscrowError, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    Client,
    Freelancer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opener {
    pub id: UserId,
    pub role: PartyRole,
}

/// A dispute with the records the dispute pages render alongside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeDetails {
    #[serde(flatten)]
    pub dispute: Dispute,
    pub invoice: Invoice,
    pub opener: Opener,
    pub votes: Vec<Vote>,
    pub escrow_entry: EscrowEntry,
}

/// Community-vote dispute resolution on top of the escrow ledger.
///
/// Per dispute, `cast_vote`, `close_voting` and `withdraw` run under one lock,
/// so no vote can land after the tally. When a dispute needs the escrow entry
/// too, the dispute lock is taken first.
pub struct DisputeEngine {
    ledger: Arc<EscrowLedger>,
    disputes: DisputeStoreArc,
    votes: VoteStoreArc,
    eligibility: VoterEligibilityArc,
    clock: ClockArc,
    locks: KeyedLocks<DisputeId>,
}

impl DisputeEngine {
    pub fn new(
        ledger: Arc<EscrowLedger>,
        stores: &Stores,
        eligibility: VoterEligibilityArc,
        clock: ClockArc,
    ) -> Self {
        Self {
            ledger,
            disputes: stores.disputes.clone(),
            votes: stores.votes.clone(),
            eligibility,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<EscrowLedger> {
        &self.ledger
    }

    /// Files a dispute against the invoice's held payment and suspends its
    /// auto-release.
    pub async fn open(&self, request: OpenDispute) -> Result<Dispute> {
        let invoice = self.ledger.invoice(&request.invoice_id).await?;
        if !invoice.is_party(&request.opener_id) {
            warn!(
                invoice_id = %invoice.id,
                opener = %request.opener_id,
                "dispute opened by non-party"
            );
            return Err(EscrowError::NotEligible(format!(
                "{} is not a party to invoice {}",
                request.opener_id, invoice.id
            )));
        }

        let entry_id = self.ledger.entry_for_invoice(&invoice.id).await?.id;
        let guard = self.ledger.lock_entry(entry_id).await;
        let entry = self.ledger.get(entry_id).await?;
        if entry.is_suspended() {
            return Err(EscrowError::AlreadyDisputed(entry_id.to_string()));
        }

        let now = self.clock.now();
        if !entry.accepts_disputes_at(now) {
            warn!(entry_id = %entry_id, state = ?entry.state, "dispute window closed");
            return Err(EscrowError::WindowClosed(entry_id.to_string()));
        }

        let dispute = Dispute::open(request, entry_id, now, self.ledger.policy().voting_window)?;
        if !self.disputes.insert_if_no_active(dispute.clone()).await? {
            return Err(EscrowError::AlreadyDisputed(entry_id.to_string()));
        }
        self.ledger
            .suspend_auto_release_locked(&guard, dispute.id)
            .await?;

        info!(
            dispute_id = %dispute.id,
            entry_id = %entry_id,
            opener = %dispute.opener_id,
            voting_closes_at = %dispute.voting_closes_at,
            "dispute opened"
        );
        Ok(dispute)
    }

    /// Records one vote. Each voter gets exactly one, and parties to the
    /// invoice get none.
    pub async fn cast_vote(
        &self,
        dispute_id: DisputeId,
        voter_id: UserId,
        choice: VoteChoice,
    ) -> Result<Vote> {
        let _guard = self.locks.lock(&dispute_id).await;
        let dispute = self.get(dispute_id).await?;
        let now = self.clock.now();
        if !dispute.accepts_votes_at(now) {
            return Err(EscrowError::VotingClosed(dispute_id.to_string()));
        }

        let invoice = self.ledger.invoice(&dispute.invoice_id).await?;
        if invoice.is_party(&voter_id) {
            return Err(EscrowError::NotEligible(format!(
                "{voter_id} is a party to the disputed invoice"
            )));
        }
        if !self.eligibility.is_eligible(&voter_id).await? {
            return Err(EscrowError::NotEligible(format!(
                "{voter_id} lacks community voting standing"
            )));
        }

        let vote = Vote::new(dispute_id, voter_id, choice, now);
        if !self.votes.insert_if_absent(vote.clone()).await? {
            warn!(dispute_id = %dispute_id, voter = %vote.voter_id, "duplicate vote rejected");
            return Err(EscrowError::AlreadyVoted {
                dispute: dispute_id.to_string(),
                voter: vote.voter_id.to_string(),
            });
        }

        info!(dispute_id = %dispute_id, voter = %vote.voter_id, ?choice, "vote cast");
        Ok(vote)
    }

    /// Closes voting, tallies, and settles the escrow entry.
    ///
    /// Idempotent: a resolved dispute is returned as stored and no funds move
    /// a second time. A dispute left in `VOTING_CLOSED` is completed.
    pub async fn close_voting(&self, dispute_id: DisputeId) -> Result<Dispute> {
        let _guard = self.locks.lock(&dispute_id).await;
        let mut dispute = self.get(dispute_id).await?;

        match dispute.state {
            DisputeState::Resolved | DisputeState::Withdrawn => return Ok(dispute),
            DisputeState::Open => {
                let expected = dispute.version;
                dispute.close_voting(self.clock.now())?;
                self.persist(&dispute, expected).await?;
                info!(dispute_id = %dispute_id, "voting closed");
            }
            DisputeState::VotingClosed => {}
        }

        let votes = self.votes.for_dispute(dispute_id).await?;
        let tally = Tally::from_votes(&votes);
        let outcome = tally.outcome(self.ledger.policy().quorum);
        self.settle(&dispute, outcome).await?;

        let expected = dispute.version;
        dispute.resolve(tally, outcome, self.clock.now())?;
        self.persist(&dispute, expected).await?;

        info!(
            dispute_id = %dispute_id,
            votes_for = tally.votes_for,
            votes_against = tally.votes_against,
            ?outcome,
            "dispute resolved"
        );
        Ok(dispute)
    }

    async fn settle(&self, dispute: &Dispute, outcome: Outcome) -> Result<()> {
        let entry_id = dispute.escrow_entry_id;
        let actor = Actor::Resolution {
            dispute_id: dispute.id,
            outcome,
        };
        let result = match (outcome, self.ledger.policy().tie_policy) {
            (Outcome::For, _) | (Outcome::Tied, TiePolicy::Release) => {
                self.ledger.release(entry_id, actor).await
            }
            (Outcome::Against, _) | (Outcome::Tied, TiePolicy::Refund) => {
                let reason = format!("dispute {} resolved {outcome:?}", dispute.id);
                self.ledger
                    .refund(entry_id, dispute.id, outcome, &reason)
                    .await
            }
            (Outcome::Tied, TiePolicy::ResumeHold) => {
                self.ledger
                    .resume_auto_release(entry_id, ResumeAt::FreshHoldPeriod)
                    .await
            }
        };

        match result {
            Ok(_) => Ok(()),
            // Funds already moved by an earlier, interrupted close.
            Err(EscrowError::NotHeld(_)) => {
                warn!(dispute_id = %dispute.id, %entry_id, "escrow entry already settled");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Lets the opener pull an open dispute. Auto-release resumes at the
    /// deadline it had before the dispute, or immediately if that passed.
    pub async fn withdraw(&self, dispute_id: DisputeId, actor_id: &UserId) -> Result<Dispute> {
        let _guard = self.locks.lock(&dispute_id).await;
        let mut dispute = self.get(dispute_id).await?;
        if &dispute.opener_id != actor_id {
            return Err(EscrowError::Unauthorized(format!(
                "only the opener may withdraw dispute {dispute_id}"
            )));
        }

        let now = self.clock.now();
        if !dispute.accepts_votes_at(now) {
            return Err(EscrowError::VotingClosed(dispute_id.to_string()));
        }

        let expected = dispute.version;
        dispute.withdraw(now)?;
        self.persist(&dispute, expected).await?;
        self.ledger
            .resume_auto_release(dispute.escrow_entry_id, ResumeAt::PriorDeadline)
            .await?;

        info!(dispute_id = %dispute_id, "dispute withdrawn");
        Ok(dispute)
    }

    /// Closes every dispute whose voting window has ended.
    pub async fn close_due(&self) -> Result<Vec<Dispute>> {
        let due = self.disputes.voting_due(self.clock.now()).await?;
        let mut resolved = Vec::with_capacity(due.len());
        for dispute in due {
            match self.close_voting(dispute.id).await {
                Ok(d) => resolved.push(d),
                Err(e) => {
                    warn!(
                        dispute_id = %dispute.id,
                        error = %e,
                        "closing dispute failed, will retry next sweep"
                    );
                }
            }
        }
        Ok(resolved)
    }

    pub async fn get(&self, id: DisputeId) -> Result<Dispute> {
        self.disputes
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("dispute {id}")))
    }

    pub async fn votes(&self, id: DisputeId) -> Result<Vec<Vote>> {
        self.get(id).await?;
        self.votes.for_dispute(id).await
    }

    pub async fn details(&self, id: DisputeId) -> Result<DisputeDetails> {
        let dispute = self.get(id).await?;
        self.embed(dispute).await
    }

    pub async fn list(&self) -> Result<Vec<DisputeDetails>> {
        let disputes = self.disputes.get_all().await?;
        let mut details = Vec::with_capacity(disputes.len());
        for dispute in disputes {
            details.push(self.embed(dispute).await?);
        }
        Ok(details)
    }

    /// The latest dispute filed against the invoice's latest escrow entry.
    pub async fn latest_for_invoice(&self, invoice_id: &InvoiceId) -> Result<Dispute> {
        let entry = self.ledger.entry_for_invoice(invoice_id).await?;
        self.disputes
            .latest_for_entry(entry.id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("dispute for invoice {invoice_id}")))
    }

    async fn embed(&self, dispute: Dispute) -> Result<DisputeDetails> {
        let invoice = self.ledger.invoice(&dispute.invoice_id).await?;
        let votes = self.votes.for_dispute(dispute.id).await?;
        let escrow_entry = self.ledger.get(dispute.escrow_entry_id).await?;
        let role = if invoice.is_client(&dispute.opener_id) {
            PartyRole::Client
        } else {
            PartyRole::Freelancer
        };
        Ok(DisputeDetails {
            opener: Opener {
                id: dispute.opener_id.clone(),
                role,
            },
            dispute,
            invoice,
            votes,
            escrow_entry,
        })
    }

    async fn persist(&self, dispute: &Dispute, expected_version: u64) -> Result<()> {
        if self
            .disputes
            .compare_and_swap(dispute.clone(), expected_version)
            .await?
        {
            Ok(())
        } else {
            Err(EscrowError::Conflict(format!("dispute {}", dispute.id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EscrowPolicy;
    use crate::domain::clock::ManualClock;
    use crate::domain::dispute::DisputeCategory;
    use crate::domain::escrow::EscrowState;
    use crate::domain::money::{Amount, Currency};
    use crate::infrastructure::in_memory::in_memory_stores;
    use crate::infrastructure::reputation::ReputationBook;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    async fn setup(min_reputation: i64) -> (DisputeEngine, ManualClock, ReputationBook) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap());
        let stores = in_memory_stores();
        let ledger = Arc::new(EscrowLedger::new(
            &stores,
            Arc::new(clock.clone()),
            EscrowPolicy::default(),
        ));
        let invoice = Invoice::new(
            InvoiceId::new("inv-7").unwrap(),
            user("client"),
            user("freelancer"),
            Amount::new(dec!(80)).unwrap(),
            Currency::new("EUR").unwrap(),
        )
        .unwrap();
        ledger.register_invoice(invoice.clone()).await.unwrap();
        ledger
            .hold(&invoice.id, invoice.amount, invoice.currency)
            .await
            .unwrap();

        let book = ReputationBook::new(min_reputation);
        let engine = DisputeEngine::new(
            ledger,
            &stores,
            Arc::new(book.clone()),
            Arc::new(clock.clone()),
        );
        (engine, clock, book)
    }

    fn request(opener: &str) -> OpenDispute {
        OpenDispute {
            invoice_id: InvoiceId::new("inv-7").unwrap(),
            opener_id: user(opener),
            category: DisputeCategory::Scope,
            reason: "work outside agreed scope".to_string(),
            description: String::new(),
            expected_outcome: String::new(),
            evidence: vec![],
        }
    }

    #[tokio::test]
    async fn test_only_parties_open_and_only_outsiders_vote() {
        let (engine, _, _) = setup(0).await;
        let outsider = engine.open(request("mallory")).await;
        assert!(matches!(outsider, Err(EscrowError::NotEligible(_))));

        let dispute = engine.open(request("freelancer")).await.unwrap();
        let party_vote = engine
            .cast_vote(dispute.id, user("client"), VoteChoice::Against)
            .await;
        assert!(matches!(party_vote, Err(EscrowError::NotEligible(_))));

        engine
            .cast_vote(dispute.id, user("carol"), VoteChoice::For)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_dispute_rejected_while_active() {
        let (engine, _, _) = setup(0).await;
        engine.open(request("client")).await.unwrap();
        let second = engine.open(request("freelancer")).await;
        assert!(matches!(second, Err(EscrowError::AlreadyDisputed(_))));
    }

    #[tokio::test]
    async fn test_reputation_gate() {
        let (engine, _, book) = setup(10).await;
        let dispute = engine.open(request("client")).await.unwrap();

        let low = engine.cast_vote(dispute.id, user("newbie"), VoteChoice::For).await;
        assert!(matches!(low, Err(EscrowError::NotEligible(_))));

        book.set_score(user("veteran"), 42).await;
        engine
            .cast_vote(dispute.id, user("veteran"), VoteChoice::For)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_withdraw_restores_prior_deadline() {
        let (engine, clock, _) = setup(0).await;
        let held = engine
            .ledger()
            .entry_for_invoice(&InvoiceId::new("inv-7").unwrap())
            .await
            .unwrap();
        let deadline = held.auto_release_at.unwrap();

        clock.advance(Duration::days(2));
        let dispute = engine.open(request("client")).await.unwrap();

        let stranger = engine.withdraw(dispute.id, &user("freelancer")).await;
        assert!(matches!(stranger, Err(EscrowError::Unauthorized(_))));

        let withdrawn = engine.withdraw(dispute.id, &user("client")).await.unwrap();
        assert_eq!(withdrawn.state, DisputeState::Withdrawn);

        let entry = engine.ledger().get(held.id).await.unwrap();
        assert_eq!(entry.state, EscrowState::Held);
        assert_eq!(entry.auto_release_at, Some(deadline));

        let vote = engine.cast_vote(dispute.id, user("carol"), VoteChoice::For).await;
        assert!(matches!(vote, Err(EscrowError::VotingClosed(_))));
    }

    #[tokio::test]
    async fn test_close_before_window_ends_is_rejected() {
        let (engine, clock, _) = setup(0).await;
        let dispute = engine.open(request("client")).await.unwrap();
        clock.advance(Duration::days(6));
        let early = engine.close_voting(dispute.id).await;
        assert!(matches!(early, Err(EscrowError::VotingStillOpen(_))));
        assert_eq!(engine.get(dispute.id).await.unwrap().state, DisputeState::Open);
    }

    #[tokio::test]
    async fn test_details_embed_invoice_opener_and_votes() {
        let (engine, _, _) = setup(0).await;
        let dispute = engine.open(request("freelancer")).await.unwrap();
        engine
            .cast_vote(dispute.id, user("carol"), VoteChoice::For)
            .await
            .unwrap();

        let details = engine.details(dispute.id).await.unwrap();
        assert_eq!(details.opener.role, PartyRole::Freelancer);
        assert_eq!(details.votes.len(), 1);
        assert_eq!(details.invoice.client_id, user("client"));

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["state"], "OPEN");
        assert_eq!(json["invoice"]["freelancerId"], "freelancer");
        assert_eq!(json["votes"][0]["choice"], "for");
    }
}
