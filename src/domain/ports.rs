use super::dispute::{Dispute, Vote};
use super::escrow::{EscrowEntry, LedgerEvent};
use super::ids::{DisputeId, EscrowId, InvoiceId, UserId};
use super::invoice::Invoice;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn store(&self, invoice: Invoice) -> Result<()>;
    async fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>>;
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Inserts `entry` unless its invoice already has a non-terminal entry.
    /// Returns `false` when the insert was refused.
    async fn insert_if_no_active(&self, entry: EscrowEntry) -> Result<bool>;
    /// Replaces the stored entry only if its version still equals
    /// `expected_version`. Returns `false` when another writer got there first.
    async fn compare_and_swap(&self, entry: EscrowEntry, expected_version: u64) -> Result<bool>;
    async fn get(&self, id: EscrowId) -> Result<Option<EscrowEntry>>;
    /// Most recent entry for the invoice, terminal or not.
    async fn latest_for_invoice(&self, invoice_id: &InvoiceId) -> Result<Option<EscrowEntry>>;
    /// Held entries whose auto-release deadline is at or before `now`.
    async fn due_for_release(&self, now: DateTime<Utc>) -> Result<Vec<EscrowEntry>>;
    async fn get_all(&self) -> Result<Vec<EscrowEntry>>;
}

#[async_trait]
pub trait DisputeStore: Send + Sync {
    /// Inserts `dispute` unless its escrow entry already has an active one.
    async fn insert_if_no_active(&self, dispute: Dispute) -> Result<bool>;
    async fn compare_and_swap(&self, dispute: Dispute, expected_version: u64) -> Result<bool>;
    async fn get(&self, id: DisputeId) -> Result<Option<Dispute>>;
    /// Most recent dispute filed against the entry.
    async fn latest_for_entry(&self, entry_id: EscrowId) -> Result<Option<Dispute>>;
    /// Active disputes whose voting window ended at or before `now`.
    async fn voting_due(&self, now: DateTime<Utc>) -> Result<Vec<Dispute>>;
    async fn get_all(&self) -> Result<Vec<Dispute>>;
}

#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Atomically inserts the vote unless `(dispute_id, voter_id)` exists.
    async fn insert_if_absent(&self, vote: Vote) -> Result<bool>;
    async fn for_dispute(&self, dispute_id: DisputeId) -> Result<Vec<Vote>>;
}

/// Append-only audit log of escrow transitions.
#[async_trait]
pub trait LedgerEventStore: Send + Sync {
    async fn append(&self, event: LedgerEvent) -> Result<()>;
    async fn for_entry(&self, entry_id: EscrowId) -> Result<Vec<LedgerEvent>>;
}

/// Community-voting standing. Parties to the invoice are excluded by the
/// engine before this policy is consulted.
#[async_trait]
pub trait VoterEligibility: Send + Sync {
    async fn is_eligible(&self, voter: &UserId) -> Result<bool>;
}

pub type InvoiceStoreArc = Arc<dyn InvoiceStore>;
pub type EscrowStoreArc = Arc<dyn EscrowStore>;
pub type DisputeStoreArc = Arc<dyn DisputeStore>;
pub type VoteStoreArc = Arc<dyn VoteStore>;
pub type LedgerEventStoreArc = Arc<dyn LedgerEventStore>;
pub type VoterEligibilityArc = Arc<dyn VoterEligibility>;

/// One handle per port, so a backend can be picked once at startup.
#[derive(Clone)]
pub struct Stores {
    pub invoices: InvoiceStoreArc,
    pub escrow: EscrowStoreArc,
    pub disputes: DisputeStoreArc,
    pub votes: VoteStoreArc,
    pub events: LedgerEventStoreArc,
}
