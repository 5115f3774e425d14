use crate::domain::dispute::VoteChoice;
use crate::domain::ids::{InvoiceId, UserId};
use crate::domain::invoice::Invoice;
use crate::domain::money::{Amount, Currency};
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Pay,
    Release,
    Dispute,
    Vote,
    Withdraw,
    Close,
    Sweep,
}

/// One raw CSV row. Which columns are required depends on `type`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ScenarioRow {
    pub r#type: CommandType,
    pub at: DateTime<Utc>,
    pub invoice: Option<InvoiceId>,
    pub user: Option<UserId>,
    pub counterparty: Option<UserId>,
    pub amount: Option<Amount>,
    pub currency: Option<Currency>,
    pub choice: Option<VoteChoice>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    /// Register the invoice and hold its payment.
    Pay(Invoice),
    Release { invoice: InvoiceId, user: UserId },
    Dispute {
        invoice: InvoiceId,
        user: UserId,
        reason: String,
    },
    Vote {
        invoice: InvoiceId,
        user: UserId,
        choice: VoteChoice,
    },
    Withdraw { invoice: InvoiceId, user: UserId },
    Close { invoice: InvoiceId },
    Sweep,
}

/// A command and the instant the clock is set to before it runs.
#[derive(Debug, PartialEq, Clone)]
pub struct ScenarioStep {
    pub at: DateTime<Utc>,
    pub command: Command,
}

fn required<T>(value: Option<T>, column: &str, kind: CommandType) -> Result<T> {
    value.ok_or_else(|| {
        EscrowError::ValidationError(format!("{kind:?} row is missing `{column}`"))
    })
}

impl TryFrom<ScenarioRow> for ScenarioStep {
    type Error = EscrowError;

    fn try_from(row: ScenarioRow) -> Result<Self> {
        let kind = row.r#type;
        let command = match kind {
            CommandType::Sweep => Command::Sweep,
            CommandType::Close => Command::Close {
                invoice: required(row.invoice, "invoice", kind)?,
            },
            CommandType::Pay => Command::Pay(Invoice::new(
                required(row.invoice, "invoice", kind)?,
                required(row.user, "user", kind)?,
                required(row.counterparty, "counterparty", kind)?,
                required(row.amount, "amount", kind)?,
                required(row.currency, "currency", kind)?,
            )?),
            CommandType::Release => Command::Release {
                invoice: required(row.invoice, "invoice", kind)?,
                user: required(row.user, "user", kind)?,
            },
            CommandType::Dispute => Command::Dispute {
                invoice: required(row.invoice, "invoice", kind)?,
                user: required(row.user, "user", kind)?,
                reason: row
                    .reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "disputed".to_string()),
            },
            CommandType::Vote => Command::Vote {
                invoice: required(row.invoice, "invoice", kind)?,
                user: required(row.user, "user", kind)?,
                choice: required(row.choice, "choice", kind)?,
            },
            CommandType::Withdraw => Command::Withdraw {
                invoice: required(row.invoice, "invoice", kind)?,
                user: required(row.user, "user", kind)?,
            },
        };
        Ok(Self { at: row.at, command })
    }
}

/// Reads a replay scenario from a CSV source.
///
/// Like any `csv::Reader` here, whitespace is trimmed and rows may omit
/// trailing columns they do not use.
pub struct ScenarioReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads, deserializes and validates steps. A bad row yields an
    /// `Err` and does not stop the iterator.
    pub fn steps(self) -> impl Iterator<Item = Result<ScenarioStep>> {
        self.reader.into_deserialize::<ScenarioRow>().map(|result| {
            result
                .map_err(EscrowError::from)
                .and_then(ScenarioStep::try_from)
        })
    }
}
