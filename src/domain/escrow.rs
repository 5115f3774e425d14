use super::dispute::Outcome;
use super::ids::{DisputeId, EscrowId, EventId, InvoiceId, UserId};
use super::money::{Amount, Currency};
use crate::error::EscrowError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowState {
    Held,
    Released,
    Refunded,
}

impl EscrowState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Held)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Held => "HELD",
            Self::Released => "RELEASED",
            Self::Refunded => "REFUNDED",
        }
    }
}

/// Who is asking the ledger to move funds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Actor {
    /// A user acting through the API. Only the invoice's client may release.
    #[serde(rename_all = "camelCase")]
    Client { user_id: UserId },
    /// The periodic auto-release sweep.
    AutoRelease,
    /// A dispute that reached an outcome.
    #[serde(rename_all = "camelCase")]
    Resolution {
        dispute_id: DisputeId,
        outcome: Outcome,
    },
}

/// Payment held on behalf of an invoice until release or refund.
///
/// Identity and amount fields are write-once. Only `state`, the release
/// bookkeeping and the auto-release deadline change after creation, and each
/// change bumps `version`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EscrowEntry {
    pub id: EscrowId,
    pub invoice_id: InvoiceId,
    pub amount: Amount,
    pub currency: Currency,
    pub state: EscrowState,
    pub held_at: DateTime<Utc>,
    /// `None` while a dispute has auto-release suspended, and once terminal.
    pub auto_release_at: Option<DateTime<Utc>>,
    /// Stamped on release and on refund.
    pub released_at: Option<DateTime<Utc>>,
    /// Deadline that was in force when auto-release was suspended.
    pub suspended_deadline: Option<DateTime<Utc>>,
    pub version: u64,
}

impl EscrowEntry {
    pub fn hold(
        invoice_id: InvoiceId,
        amount: Amount,
        currency: Currency,
        now: DateTime<Utc>,
        hold_period: Duration,
    ) -> Self {
        Self {
            id: EscrowId::new(),
            invoice_id,
            amount,
            currency,
            state: EscrowState::Held,
            held_at: now,
            auto_release_at: Some(now + hold_period),
            released_at: None,
            suspended_deadline: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_suspended(&self) -> bool {
        self.state == EscrowState::Held && self.auto_release_at.is_none()
    }

    /// Held, not suspended, and past its deadline.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == EscrowState::Held && self.auto_release_at.is_some_and(|at| at <= now)
    }

    /// Disputes can only be opened strictly before the deadline, whether or
    /// not the sweep has run yet.
    pub fn accepts_disputes_at(&self, now: DateTime<Utc>) -> bool {
        self.state == EscrowState::Held && self.auto_release_at.is_some_and(|at| now < at)
    }

    fn ensure_held(&self) -> Result<(), EscrowError> {
        if self.state == EscrowState::Held {
            Ok(())
        } else {
            Err(EscrowError::NotHeld(self.id.to_string()))
        }
    }

    /// Moves the funds to the freelancer.
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<(), EscrowError> {
        self.ensure_held()?;
        self.state = EscrowState::Released;
        self.finish(now);
        Ok(())
    }

    /// Returns the funds to the client.
    pub fn refund(&mut self, now: DateTime<Utc>) -> Result<(), EscrowError> {
        self.ensure_held()?;
        self.state = EscrowState::Refunded;
        self.finish(now);
        Ok(())
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.released_at = Some(now);
        self.auto_release_at = None;
        self.suspended_deadline = None;
        self.version += 1;
    }

    pub fn suspend_auto_release(&mut self) -> Result<(), EscrowError> {
        self.ensure_held()?;
        if let Some(deadline) = self.auto_release_at.take() {
            self.suspended_deadline = Some(deadline);
        }
        self.version += 1;
        Ok(())
    }

    pub fn resume_auto_release(&mut self, deadline: DateTime<Utc>) -> Result<(), EscrowError> {
        self.ensure_held()?;
        self.auto_release_at = Some(deadline);
        self.suspended_deadline = None;
        self.version += 1;
        Ok(())
    }
}

/// One immutable line of the escrow audit trail.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub id: EventId,
    pub entry_id: EscrowId,
    pub at: DateTime<Utc>,
    pub kind: LedgerEventKind,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LedgerEventKind {
    #[serde(rename_all = "camelCase")]
    Held {
        amount: Amount,
        currency: Currency,
        auto_release_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    AutoReleaseSuspended { dispute_id: DisputeId },
    #[serde(rename_all = "camelCase")]
    AutoReleaseResumed { auto_release_at: DateTime<Utc> },
    Released { actor: Actor },
    Refunded { reason: String },
}

impl LedgerEvent {
    pub fn new(entry_id: EscrowId, at: DateTime<Utc>, kind: LedgerEventKind) -> Self {
        Self {
            id: EventId::new(),
            entry_id,
            at,
            kind,
        }
    }
}
