use crate::domain::dispute::{Dispute, Vote};
use crate::domain::escrow::{EscrowEntry, LedgerEvent};
use crate::domain::ids::{DisputeId, EscrowId, InvoiceId};
use crate::domain::invoice::Invoice;
use crate::domain::ports::{
    DisputeStore, EscrowStore, InvoiceStore, LedgerEventStore, Stores, VoteStore,
};
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for registered invoices.
pub const CF_INVOICES: &str = "invoices";
/// Column Family for escrow entries, keyed by entry id.
pub const CF_ESCROW: &str = "escrow";
/// Index: invoice id, per-invoice sequence -> entry id.
pub const CF_ESCROW_BY_INVOICE: &str = "escrow_by_invoice";
/// Column Family for disputes, keyed by dispute id.
pub const CF_DISPUTES: &str = "disputes";
/// Index: entry id, per-entry sequence -> dispute id.
pub const CF_DISPUTES_BY_ENTRY: &str = "disputes_by_entry";
/// Column Family for votes, keyed by dispute id then voter id.
pub const CF_VOTES: &str = "votes";
/// Column Family for the audit log, keyed by entry id and per-entry sequence.
pub const CF_EVENTS: &str = "events";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_INVOICES,
    CF_ESCROW,
    CF_ESCROW_BY_INVOICE,
    CF_DISPUTES,
    CF_DISPUTES_BY_ENTRY,
    CF_VOTES,
    CF_EVENTS,
];

/// A persistent store implementation using RocksDB.
///
/// One instance serves every storage port, each in its own Column Family,
/// with values encoded as JSON. Check-then-write operations (one active
/// entry per invoice, version checks, vote uniqueness) run under a single
/// writer lock and commit through a `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// The same database behind every port.
    pub fn stores(&self) -> Stores {
        Stores {
            invoices: Arc::new(self.clone()),
            escrow: Arc::new(self.clone()),
            disputes: Arc::new(self.clone()),
            votes: Arc::new(self.clone()),
            events: Arc::new(self.clone()),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EscrowError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.put_cf(cf, key, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Raw values of every key starting with `prefix`, in key order.
    fn scan(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(value);
        }
        Ok(values)
    }

    fn scan_json<T: DeserializeOwned>(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<T>> {
        self.scan(cf_name, prefix)?
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(EscrowError::from))
            .collect()
    }

    fn escrow_for_invoice(&self, invoice_id: &InvoiceId) -> Result<Vec<EscrowEntry>> {
        let mut entries = Vec::new();
        for id in self.scan(CF_ESCROW_BY_INVOICE, &invoice_prefix(invoice_id))? {
            if let Some(entry) = self.get_json(CF_ESCROW, &id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn disputes_for_entry(&self, entry_id: EscrowId) -> Result<Vec<Dispute>> {
        let mut disputes = Vec::new();
        for id in self.scan(CF_DISPUTES_BY_ENTRY, entry_id.0.as_bytes())? {
            if let Some(dispute) = self.get_json(CF_DISPUTES, &id)? {
                disputes.push(dispute);
            }
        }
        Ok(disputes)
    }
}

fn invoice_prefix(invoice_id: &InvoiceId) -> Vec<u8> {
    let mut key = invoice_id.as_str().as_bytes().to_vec();
    key.push(0);
    key
}

/// `prefix` followed by a big-endian sequence number, so keys under one
/// prefix sort in insertion order.
fn sequenced_key(prefix: &[u8], seq: usize) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&(seq as u64).to_be_bytes());
    key
}

#[async_trait]
impl InvoiceStore for RocksDBStore {
    async fn store(&self, invoice: Invoice) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_INVOICES, invoice.id.as_str().as_bytes(), &invoice)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: &InvoiceId) -> Result<Option<Invoice>> {
        self.get_json(CF_INVOICES, id.as_str().as_bytes())
    }
}

#[async_trait]
impl EscrowStore for RocksDBStore {
    async fn insert_if_no_active(&self, entry: EscrowEntry) -> Result<bool> {
        let _writer = self.write_lock.lock().await;
        let existing = self.escrow_for_invoice(&entry.invoice_id)?;
        if existing.iter().any(|e| !e.is_terminal()) {
            return Ok(false);
        }

        let index_key = sequenced_key(&invoice_prefix(&entry.invoice_id), existing.len());

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ESCROW, entry.id.0.as_bytes(), &entry)?;
        batch.put_cf(self.cf(CF_ESCROW_BY_INVOICE)?, index_key, entry.id.0.as_bytes());
        self.db.write(batch)?;
        Ok(true)
    }

    async fn compare_and_swap(&self, entry: EscrowEntry, expected_version: u64) -> Result<bool> {
        let _writer = self.write_lock.lock().await;
        let current: Option<EscrowEntry> = self.get_json(CF_ESCROW, entry.id.0.as_bytes())?;
        match current {
            Some(current) if current.version == expected_version => {
                let mut batch = WriteBatch::default();
                self.put_json(&mut batch, CF_ESCROW, entry.id.0.as_bytes(), &entry)?;
                self.db.write(batch)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: EscrowId) -> Result<Option<EscrowEntry>> {
        self.get_json(CF_ESCROW, id.0.as_bytes())
    }

    async fn latest_for_invoice(&self, invoice_id: &InvoiceId) -> Result<Option<EscrowEntry>> {
        Ok(self.escrow_for_invoice(invoice_id)?.pop())
    }

    async fn due_for_release(&self, now: DateTime<Utc>) -> Result<Vec<EscrowEntry>> {
        let entries: Vec<EscrowEntry> = self.scan_json(CF_ESCROW, &[])?;
        Ok(entries.into_iter().filter(|e| e.is_due(now)).collect())
    }

    async fn get_all(&self) -> Result<Vec<EscrowEntry>> {
        self.scan_json(CF_ESCROW, &[])
    }
}

#[async_trait]
impl DisputeStore for RocksDBStore {
    async fn insert_if_no_active(&self, dispute: Dispute) -> Result<bool> {
        let _writer = self.write_lock.lock().await;
        let existing = self.disputes_for_entry(dispute.escrow_entry_id)?;
        if existing.iter().any(|d| d.state.is_active()) {
            return Ok(false);
        }

        let index_key = sequenced_key(dispute.escrow_entry_id.0.as_bytes(), existing.len());

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_DISPUTES, dispute.id.0.as_bytes(), &dispute)?;
        batch.put_cf(self.cf(CF_DISPUTES_BY_ENTRY)?, index_key, dispute.id.0.as_bytes());
        self.db.write(batch)?;
        Ok(true)
    }

    async fn compare_and_swap(&self, dispute: Dispute, expected_version: u64) -> Result<bool> {
        let _writer = self.write_lock.lock().await;
        let current: Option<Dispute> = self.get_json(CF_DISPUTES, dispute.id.0.as_bytes())?;
        match current {
            Some(current) if current.version == expected_version => {
                let mut batch = WriteBatch::default();
                self.put_json(&mut batch, CF_DISPUTES, dispute.id.0.as_bytes(), &dispute)?;
                self.db.write(batch)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: DisputeId) -> Result<Option<Dispute>> {
        self.get_json(CF_DISPUTES, id.0.as_bytes())
    }

    async fn latest_for_entry(&self, entry_id: EscrowId) -> Result<Option<Dispute>> {
        Ok(self.disputes_for_entry(entry_id)?.pop())
    }

    async fn voting_due(&self, now: DateTime<Utc>) -> Result<Vec<Dispute>> {
        let disputes: Vec<Dispute> = self.scan_json(CF_DISPUTES, &[])?;
        Ok(disputes
            .into_iter()
            .filter(|d| d.state.is_active() && d.voting_closes_at <= now)
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Dispute>> {
        let mut disputes: Vec<Dispute> = self.scan_json(CF_DISPUTES, &[])?;
        disputes.sort_by_key(|d| d.created_at);
        Ok(disputes)
    }
}

#[async_trait]
impl VoteStore for RocksDBStore {
    async fn insert_if_absent(&self, vote: Vote) -> Result<bool> {
        let _writer = self.write_lock.lock().await;
        let mut key = vote.dispute_id.0.as_bytes().to_vec();
        key.extend_from_slice(vote.voter_id.as_str().as_bytes());

        let cf = self.cf(CF_VOTES)?;
        if self.db.get_pinned_cf(cf, &key)?.is_some() {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_VOTES, &key, &vote)?;
        self.db.write(batch)?;
        Ok(true)
    }

    async fn for_dispute(&self, dispute_id: DisputeId) -> Result<Vec<Vote>> {
        let mut votes: Vec<Vote> = self.scan_json(CF_VOTES, dispute_id.0.as_bytes())?;
        votes.sort_by_key(|v| v.created_at);
        Ok(votes)
    }
}

#[async_trait]
impl LedgerEventStore for RocksDBStore {
    async fn append(&self, event: LedgerEvent) -> Result<()> {
        let _writer = self.write_lock.lock().await;
        let prefix = event.entry_id.0.as_bytes();
        let key = sequenced_key(prefix, self.scan(CF_EVENTS, prefix)?.len());

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_EVENTS, &key, &event)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn for_entry(&self, entry_id: EscrowId) -> Result<Vec<LedgerEvent>> {
        self.scan_json(CF_EVENTS, entry_id.0.as_bytes())
    }
}
