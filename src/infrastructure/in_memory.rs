use crate::domain::dispute::{Dispute, Vote};
use crate::domain::escrow::{EscrowEntry, EscrowState, LedgerEvent};
use crate::domain::ids::{DisputeId, EscrowId, InvoiceId, UserId};
use crate::domain::invoice::Invoice;
use crate::domain::ports::{
    DisputeStore, EscrowStore, InvoiceStore, LedgerEventStore, Stores, VoteStore,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Builds a full set of in-memory stores.
pub fn in_memory_stores() -> Stores {
    Stores {
        invoices: Arc::new(InMemoryInvoiceStore::new()),
        escrow: Arc::new(InMemoryEscrowStore::new()),
        disputes: Arc::new(InMemoryDisputeStore::new()),
        votes: Arc::new(InMemoryVoteStore::new()),
        events: Arc::new(InMemoryLedgerEventStore::new()),
    }
}

/// A thread-safe in-memory store for invoices.
#[derive(Default, Clone)]
pub struct InMemoryInvoiceStore {
    invoices: Arc<RwLock<HashMap<InvoiceId, Invoice>>>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn store(&self, invoice: Invoice) -> Result<()> {
        let mut invoices = self.invoices.write().await;
        invoices.insert(invoice.id.clone(), invoice);
        Ok(())
    }

    async fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
        let invoices = self.invoices.read().await;
        Ok(invoices.get(id).cloned())
    }
}

#[derive(Default)]
struct EscrowTables {
    entries: HashMap<EscrowId, EscrowEntry>,
    /// Entry ids per invoice in creation order.
    by_invoice: HashMap<InvoiceId, Vec<EscrowId>>,
}

/// A thread-safe in-memory store for escrow entries.
///
/// Both indexes sit behind one `RwLock`, so the "one active entry per
/// invoice" check and the insert happen under the same write guard.
#[derive(Default, Clone)]
pub struct InMemoryEscrowStore {
    tables: Arc<RwLock<EscrowTables>>,
}

impl InMemoryEscrowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscrowStore for InMemoryEscrowStore {
    async fn insert_if_no_active(&self, entry: EscrowEntry) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let EscrowTables {
            entries,
            by_invoice,
        } = &mut *tables;

        let ids = by_invoice.entry(entry.invoice_id.clone()).or_default();
        let has_active = ids
            .iter()
            .filter_map(|id| entries.get(id))
            .any(|existing| !existing.is_terminal());
        if has_active {
            return Ok(false);
        }

        ids.push(entry.id);
        entries.insert(entry.id, entry);
        Ok(true)
    }

    async fn compare_and_swap(&self, entry: EscrowEntry, expected_version: u64) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.entries.get_mut(&entry.id) {
            Some(current) if current.version == expected_version => {
                *current = entry;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: EscrowId) -> Result<Option<EscrowEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.entries.get(&id).cloned())
    }

    async fn latest_for_invoice(&self, invoice_id: &InvoiceId) -> Result<Option<EscrowEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_invoice
            .get(invoice_id)
            .and_then(|ids| ids.last())
            .and_then(|id| tables.entries.get(id))
            .cloned())
    }

    async fn due_for_release(&self, now: DateTime<Utc>) -> Result<Vec<EscrowEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .values()
            .filter(|entry| entry.state == EscrowState::Held && entry.is_due(now))
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<EscrowEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.entries.values().cloned().collect())
    }
}

#[derive(Default)]
struct DisputeTables {
    disputes: HashMap<DisputeId, Dispute>,
    by_entry: HashMap<EscrowId, Vec<DisputeId>>,
}

/// A thread-safe in-memory store for disputes.
#[derive(Default, Clone)]
pub struct InMemoryDisputeStore {
    tables: Arc<RwLock<DisputeTables>>,
}

impl InMemoryDisputeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DisputeStore for InMemoryDisputeStore {
    async fn insert_if_no_active(&self, dispute: Dispute) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let DisputeTables { disputes, by_entry } = &mut *tables;

        let ids = by_entry.entry(dispute.escrow_entry_id).or_default();
        let has_active = ids
            .iter()
            .filter_map(|id| disputes.get(id))
            .any(|existing| existing.state.is_active());
        if has_active {
            return Ok(false);
        }

        ids.push(dispute.id);
        disputes.insert(dispute.id, dispute);
        Ok(true)
    }

    async fn compare_and_swap(&self, dispute: Dispute, expected_version: u64) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.disputes.get_mut(&dispute.id) {
            Some(current) if current.version == expected_version => {
                *current = dispute;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: DisputeId) -> Result<Option<Dispute>> {
        let tables = self.tables.read().await;
        Ok(tables.disputes.get(&id).cloned())
    }

    async fn latest_for_entry(&self, entry_id: EscrowId) -> Result<Option<Dispute>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_entry
            .get(&entry_id)
            .and_then(|ids| ids.last())
            .and_then(|id| tables.disputes.get(id))
            .cloned())
    }

    async fn voting_due(&self, now: DateTime<Utc>) -> Result<Vec<Dispute>> {
        let tables = self.tables.read().await;
        Ok(tables
            .disputes
            .values()
            .filter(|d| d.state.is_active() && d.voting_closes_at <= now)
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Dispute>> {
        let tables = self.tables.read().await;
        let mut all: Vec<Dispute> = tables.disputes.values().cloned().collect();
        all.sort_by_key(|d| d.created_at);
        Ok(all)
    }
}

/// A thread-safe in-memory store for votes, keyed by `(dispute, voter)`.
#[derive(Default, Clone)]
pub struct InMemoryVoteStore {
    votes: Arc<RwLock<HashMap<DisputeId, HashMap<UserId, Vote>>>>,
}

impl InMemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoteStore for InMemoryVoteStore {
    async fn insert_if_absent(&self, vote: Vote) -> Result<bool> {
        let mut votes = self.votes.write().await;
        let ballots = votes.entry(vote.dispute_id).or_default();
        if ballots.contains_key(&vote.voter_id) {
            return Ok(false);
        }
        ballots.insert(vote.voter_id.clone(), vote);
        Ok(true)
    }

    async fn for_dispute(&self, dispute_id: DisputeId) -> Result<Vec<Vote>> {
        let votes = self.votes.read().await;
        let mut ballots: Vec<Vote> = votes
            .get(&dispute_id)
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default();
        ballots.sort_by_key(|v| v.created_at);
        Ok(ballots)
    }
}

/// Append-only in-memory audit log.
#[derive(Default, Clone)]
pub struct InMemoryLedgerEventStore {
    events: Arc<RwLock<Vec<LedgerEvent>>>,
}

impl InMemoryLedgerEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerEventStore for InMemoryLedgerEventStore {
    async fn append(&self, event: LedgerEvent) -> Result<()> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn for_entry(&self, entry_id: EscrowId) -> Result<Vec<LedgerEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.entry_id == entry_id)
            .cloned()
            .collect())
    }
}
