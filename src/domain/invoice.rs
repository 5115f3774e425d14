use super::ids::{InvoiceId, UserId};
use super::money::{Amount, Currency};
use crate::error::EscrowError;
use serde::{Deserialize, Serialize};

/// A paid (or about to be paid) invoice between a client and a freelancer.
///
/// The ledger only needs the two parties and the agreed amount; everything
/// else about invoices lives in the invoicing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: InvoiceId,
    /// The paying party.
    pub client_id: UserId,
    /// The party the funds are released to.
    pub freelancer_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
}

impl Invoice {
    pub fn new(
        id: InvoiceId,
        client_id: UserId,
        freelancer_id: UserId,
        amount: Amount,
        currency: Currency,
    ) -> Result<Self, EscrowError> {
        if client_id == freelancer_id {
            return Err(EscrowError::ValidationError(
                "client and freelancer must be different users".to_string(),
            ));
        }
        Ok(Self {
            id,
            client_id,
            freelancer_id,
            amount,
            currency,
        })
    }

    /// Parties have standing to open disputes; they never vote on them.
    pub fn is_party(&self, user: &UserId) -> bool {
        &self.client_id == user || &self.freelancer_id == user
    }

    pub fn is_client(&self, user: &UserId) -> bool {
        &self.client_id == user
    }
}
