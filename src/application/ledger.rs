use super::locks::KeyedLocks;
use crate::config::{EscrowPolicy, TiePolicy};
use crate::domain::clock::ClockArc;
use crate::domain::dispute::{DisputeState, Outcome};
use crate::domain::escrow::{Actor, EscrowEntry, EscrowState, LedgerEvent, LedgerEventKind};
use crate::domain::ids::{DisputeId, EscrowId, InvoiceId};
use crate::domain::invoice::Invoice;
use crate::domain::money::{Amount, Currency};
use crate::domain::ports::{
    DisputeStoreArc, EscrowStoreArc, InvoiceStoreArc, LedgerEventStoreArc, Stores,
};
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Where a resumed auto-release deadline lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAt {
    /// `now + hold_period`.
    FreshHoldPeriod,
    /// The deadline suspended by the dispute, or now if it already passed.
    PriorDeadline,
}

/// Outcome of one auto-release pass.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: usize,
    pub released: Vec<EscrowId>,
    /// Entries that stopped being due between the scan and the release.
    pub skipped: usize,
    pub failed: usize,
}

/// Proof that the caller holds the single-writer lock of one escrow entry.
pub struct EntryGuard {
    entry_id: EscrowId,
    _guard: OwnedMutexGuard<()>,
}

/// Holds invoice payments until they are released or refunded.
///
/// Every transition runs under the entry's lock, is written with a version
/// check, and appends one event to the audit log.
pub struct EscrowLedger {
    invoices: InvoiceStoreArc,
    escrow: EscrowStoreArc,
    events: LedgerEventStoreArc,
    disputes: DisputeStoreArc,
    clock: ClockArc,
    policy: EscrowPolicy,
    locks: KeyedLocks<EscrowId>,
}

impl EscrowLedger {
    pub fn new(stores: &Stores, clock: ClockArc, policy: EscrowPolicy) -> Self {
        Self {
            invoices: stores.invoices.clone(),
            escrow: stores.escrow.clone(),
            events: stores.events.clone(),
            disputes: stores.disputes.clone(),
            clock,
            policy,
            locks: KeyedLocks::new(),
        }
    }

    pub fn policy(&self) -> EscrowPolicy {
        self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Registers the parties of an invoice. Re-registering the same invoice
    /// is a no-op; changing its parties or amount is rejected.
    pub async fn register_invoice(&self, invoice: Invoice) -> Result<Invoice> {
        if let Some(existing) = self.invoices.get(&invoice.id).await? {
            if existing == invoice {
                return Ok(existing);
            }
            return Err(EscrowError::ValidationError(format!(
                "invoice {} is already registered with different terms",
                invoice.id
            )));
        }
        self.invoices.store(invoice.clone()).await?;
        info!(
            invoice_id = %invoice.id,
            client = %invoice.client_id,
            freelancer = %invoice.freelancer_id,
            "invoice registered"
        );
        Ok(invoice)
    }

    pub async fn invoice(&self, id: &InvoiceId) -> Result<Invoice> {
        self.invoices
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("invoice {id}")))
    }

    /// Holds a completed payment. The auto-release deadline starts now.
    pub async fn hold(
        &self,
        invoice_id: &InvoiceId,
        amount: Amount,
        currency: Currency,
    ) -> Result<EscrowEntry> {
        let invoice = self.invoice(invoice_id).await?;
        if invoice.amount != amount || invoice.currency != currency {
            return Err(EscrowError::ValidationError(format!(
                "payment of {amount} {currency} does not match invoice {invoice_id} ({} {})",
                invoice.amount, invoice.currency
            )));
        }

        let now = self.clock.now();
        let entry = EscrowEntry::hold(
            invoice_id.clone(),
            amount,
            currency,
            now,
            self.policy.hold_period,
        );
        if !self.escrow.insert_if_no_active(entry.clone()).await? {
            warn!(invoice_id = %invoice_id, "hold rejected, invoice already in escrow");
            return Err(EscrowError::AlreadyHeld(invoice_id.to_string()));
        }

        let auto_release_at = now + self.policy.hold_period;
        self.events
            .append(LedgerEvent::new(
                entry.id,
                now,
                LedgerEventKind::Held {
                    amount: entry.amount,
                    currency: entry.currency.clone(),
                    auto_release_at,
                },
            ))
            .await?;
        info!(
            entry_id = %entry.id,
            invoice_id = %invoice_id,
            %amount,
            %auto_release_at,
            "funds held"
        );
        Ok(entry)
    }

    pub async fn get(&self, id: EscrowId) -> Result<EscrowEntry> {
        self.escrow
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("escrow entry {id}")))
    }

    /// The invoice's most recent entry.
    pub async fn entry_for_invoice(&self, invoice_id: &InvoiceId) -> Result<EscrowEntry> {
        self.escrow
            .latest_for_invoice(invoice_id)
            .await?
            .ok_or_else(|| {
                EscrowError::NotFound(format!("escrow entry for invoice {invoice_id}"))
            })
    }

    pub async fn entries(&self) -> Result<Vec<EscrowEntry>> {
        let mut entries = self.escrow.get_all().await?;
        entries.sort_by(|a, b| a.held_at.cmp(&b.held_at).then(a.invoice_id.cmp(&b.invoice_id)));
        Ok(entries)
    }

    pub async fn events(&self, id: EscrowId) -> Result<Vec<LedgerEvent>> {
        self.get(id).await?;
        self.events.for_entry(id).await
    }

    pub async fn lock_entry(&self, entry_id: EscrowId) -> EntryGuard {
        EntryGuard {
            entry_id,
            _guard: self.locks.lock(&entry_id).await,
        }
    }

    /// Pays the freelancer.
    ///
    /// Allowed for the invoice's client (unless a dispute has auto-release
    /// suspended), for the sweep once the deadline passed, and for a dispute
    /// resolved in the freelancer's favour.
    pub async fn release(&self, id: EscrowId, actor: Actor) -> Result<EscrowEntry> {
        let _guard = self.lock_entry(id).await;
        let entry = self.get(id).await?;
        if entry.is_terminal() {
            return Err(EscrowError::NotHeld(id.to_string()));
        }
        self.authorize_release(&entry, &actor).await?;

        let entry = self
            .apply(entry, |entry, now| {
                entry.release(now)?;
                Ok(LedgerEventKind::Released {
                    actor: actor.clone(),
                })
            })
            .await?;
        info!(entry_id = %id, invoice_id = %entry.invoice_id, ?actor, "funds released");
        Ok(entry)
    }

    async fn authorize_release(&self, entry: &EscrowEntry, actor: &Actor) -> Result<()> {
        match actor {
            Actor::Client { user_id } => {
                let invoice = self.invoice(&entry.invoice_id).await?;
                if !invoice.is_client(user_id) {
                    warn!(entry_id = %entry.id, user = %user_id, "release attempted by non-client");
                    return Err(EscrowError::Unauthorized(format!(
                        "only the paying client may release escrow entry {}",
                        entry.id
                    )));
                }
                if entry.is_suspended() {
                    return Err(EscrowError::Unauthorized(format!(
                        "escrow entry {} is under dispute",
                        entry.id
                    )));
                }
                Ok(())
            }
            Actor::AutoRelease => {
                if entry.is_due(self.clock.now()) {
                    Ok(())
                } else {
                    Err(EscrowError::Unauthorized(format!(
                        "auto-release is not due for escrow entry {}",
                        entry.id
                    )))
                }
            }
            Actor::Resolution {
                dispute_id,
                outcome,
            } => {
                let allowed = *outcome == Outcome::For
                    || (*outcome == Outcome::Tied && self.policy.tie_policy == TiePolicy::Release);
                if !allowed {
                    return Err(EscrowError::Unauthorized(format!(
                        "dispute outcome {outcome:?} does not release funds"
                    )));
                }
                self.authorize_resolution(entry, *dispute_id).await
            }
        }
    }

    /// Funds move on a dispute's behalf only while that dispute holds the
    /// entry suspended and its voting has closed.
    async fn authorize_resolution(
        &self,
        entry: &EscrowEntry,
        dispute_id: DisputeId,
    ) -> Result<()> {
        if !entry.is_suspended() {
            warn!(entry_id = %entry.id, %dispute_id, "resolution for an entry not under dispute");
            return Err(EscrowError::Unauthorized(format!(
                "escrow entry {} is not under dispute",
                entry.id
            )));
        }
        let standing = self.disputes.get(dispute_id).await?.is_some_and(|dispute| {
            dispute.escrow_entry_id == entry.id
                && matches!(
                    dispute.state,
                    DisputeState::VotingClosed | DisputeState::Resolved
                )
        });
        if standing {
            Ok(())
        } else {
            warn!(entry_id = %entry.id, %dispute_id, "resolution without a closed dispute");
            Err(EscrowError::Unauthorized(format!(
                "dispute {dispute_id} has not closed voting on escrow entry {}",
                entry.id
            )))
        }
    }

    /// Returns the funds to the client. Only a resolved dispute can do this.
    pub async fn refund(
        &self,
        id: EscrowId,
        dispute_id: DisputeId,
        outcome: Outcome,
        reason: &str,
    ) -> Result<EscrowEntry> {
        let allowed = outcome == Outcome::Against
            || (outcome == Outcome::Tied && self.policy.tie_policy == TiePolicy::Refund);
        if !allowed {
            return Err(EscrowError::Unauthorized(format!(
                "dispute {dispute_id} outcome {outcome:?} does not refund funds"
            )));
        }

        let _guard = self.lock_entry(id).await;
        let entry = self.get(id).await?;
        if entry.is_terminal() {
            return Err(EscrowError::NotHeld(id.to_string()));
        }
        self.authorize_resolution(&entry, dispute_id).await?;

        let reason = reason.to_string();
        let entry = self
            .apply(entry, |entry, now| {
                entry.refund(now)?;
                Ok(LedgerEventKind::Refunded { reason })
            })
            .await?;
        info!(
            entry_id = %id,
            invoice_id = %entry.invoice_id,
            dispute_id = %dispute_id,
            "funds refunded"
        );
        Ok(entry)
    }

    pub async fn suspend_auto_release(
        &self,
        id: EscrowId,
        dispute_id: DisputeId,
    ) -> Result<EscrowEntry> {
        let guard = self.lock_entry(id).await;
        self.suspend_auto_release_locked(&guard, dispute_id).await
    }

    /// As [`Self::suspend_auto_release`], for callers already holding the lock.
    pub async fn suspend_auto_release_locked(
        &self,
        guard: &EntryGuard,
        dispute_id: DisputeId,
    ) -> Result<EscrowEntry> {
        let entry = self.get(guard.entry_id).await?;
        let entry = self
            .apply(entry, |entry, _| {
                entry.suspend_auto_release()?;
                Ok(LedgerEventKind::AutoReleaseSuspended { dispute_id })
            })
            .await?;
        info!(entry_id = %entry.id, dispute_id = %dispute_id, "auto-release suspended");
        Ok(entry)
    }

    /// Gives a suspended entry its deadline back. An entry that already has a
    /// deadline is returned unchanged.
    pub async fn resume_auto_release(&self, id: EscrowId, at: ResumeAt) -> Result<EscrowEntry> {
        let _guard = self.lock_entry(id).await;
        let entry = self.get(id).await?;
        if entry.state == EscrowState::Held && !entry.is_suspended() {
            debug!(entry_id = %id, "auto-release already running");
            return Ok(entry);
        }
        let hold_period = self.policy.hold_period;
        let entry = self
            .apply(entry, |entry, now| {
                let deadline = match at {
                    ResumeAt::FreshHoldPeriod => now + hold_period,
                    ResumeAt::PriorDeadline => {
                        entry.suspended_deadline.map_or(now, |d| d.max(now))
                    }
                };
                entry.resume_auto_release(deadline)?;
                Ok(LedgerEventKind::AutoReleaseResumed {
                    auto_release_at: deadline,
                })
            })
            .await?;
        info!(entry_id = %id, auto_release_at = ?entry.auto_release_at, "auto-release resumed");
        Ok(entry)
    }

    /// Releases every held entry whose deadline has passed. Safe to run
    /// repeatedly and concurrently; entries that are no longer due are
    /// skipped.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let due = self.escrow.due_for_release(now).await?;
        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };

        for entry in due {
            match self.release(entry.id, Actor::AutoRelease).await {
                Ok(_) => report.released.push(entry.id),
                Err(EscrowError::NotHeld(_) | EscrowError::Unauthorized(_)) => {
                    debug!(entry_id = %entry.id, "entry no longer due, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        entry_id = %entry.id,
                        error = %e,
                        "auto-release failed, will retry next sweep"
                    );
                    report.failed += 1;
                }
            }
        }

        if !report.released.is_empty() {
            info!(released = report.released.len(), "auto-release sweep finished");
        }
        Ok(report)
    }

    /// Runs one transition against a freshly loaded entry. Callers hold the
    /// entry lock.
    async fn apply<F>(&self, mut entry: EscrowEntry, transition: F) -> Result<EscrowEntry>
    where
        F: FnOnce(&mut EscrowEntry, DateTime<Utc>) -> Result<LedgerEventKind> + Send,
    {
        let expected = entry.version;
        let now = self.clock.now();
        let kind = transition(&mut entry, now)?;

        if !self.escrow.compare_and_swap(entry.clone(), expected).await? {
            return Err(EscrowError::Conflict(format!("escrow entry {}", entry.id)));
        }
        self.events
            .append(LedgerEvent::new(entry.id, now, kind))
            .await?;
        Ok(entry)
    }
}
