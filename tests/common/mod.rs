#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use escrowd::application::disputes::DisputeEngine;
use escrowd::application::ledger::EscrowLedger;
use escrowd::application::scheduler::Scheduler;
use escrowd::config::EscrowPolicy;
use escrowd::domain::clock::ManualClock;
use escrowd::domain::dispute::{DisputeCategory, OpenDispute};
use escrowd::domain::escrow::EscrowEntry;
use escrowd::domain::ids::{InvoiceId, UserId};
use escrowd::domain::invoice::Invoice;
use escrowd::domain::money::{Amount, Currency};
use escrowd::domain::ports::Stores;
use escrowd::infrastructure::in_memory::in_memory_stores;
use escrowd::infrastructure::reputation::ReputationBook;
use rand::Rng;
use rust_decimal_macros::dec;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const CLIENT: &str = "alice";
pub const FREELANCER: &str = "bob";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

pub fn invoice_id(id: &str) -> InvoiceId {
    InvoiceId::new(id).unwrap()
}

pub fn dispute_request(invoice: &str, opener: &str) -> OpenDispute {
    OpenDispute {
        invoice_id: invoice_id(invoice),
        opener_id: user(opener),
        category: DisputeCategory::Quality,
        reason: "deliverable does not match the brief".to_string(),
        description: String::new(),
        expected_outcome: "full refund".to_string(),
        evidence: vec!["https://files.example/brief.pdf".to_string()],
    }
}

/// Ledger, engine and scheduler over in-memory stores on a manual clock
/// starting at [`t0`].
pub struct Harness {
    pub clock: ManualClock,
    pub reputation: ReputationBook,
    pub ledger: Arc<EscrowLedger>,
    pub engine: Arc<DisputeEngine>,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(EscrowPolicy::default())
    }

    pub fn with_policy(policy: EscrowPolicy) -> Self {
        Self::with_stores(in_memory_stores(), policy, ReputationBook::default())
    }

    pub fn with_stores(stores: Stores, policy: EscrowPolicy, reputation: ReputationBook) -> Self {
        let clock = ManualClock::new(t0());
        let ledger = Arc::new(EscrowLedger::new(&stores, Arc::new(clock.clone()), policy));
        let engine = Arc::new(DisputeEngine::new(
            ledger.clone(),
            &stores,
            Arc::new(reputation.clone()),
            Arc::new(clock.clone()),
        ));
        let scheduler = Scheduler::new(engine.clone(), std::time::Duration::from_secs(60));
        Self {
            clock,
            reputation,
            ledger,
            engine,
            scheduler,
        }
    }

    /// Registers an invoice from [`CLIENT`] to [`FREELANCER`] and holds its
    /// 1200 USD payment at the current clock time.
    pub async fn pay(&self, invoice: &str) -> EscrowEntry {
        let invoice = Invoice::new(
            invoice_id(invoice),
            user(CLIENT),
            user(FREELANCER),
            Amount::new(dec!(1200)).unwrap(),
            Currency::new("USD").unwrap(),
        )
        .unwrap();
        self.ledger.register_invoice(invoice.clone()).await.unwrap();
        self.ledger
            .hold(&invoice.id, invoice.amount, invoice.currency)
            .await
            .unwrap()
    }
}

pub const SCENARIO_HEADER: [&str; 8] = [
    "type",
    "at",
    "invoice",
    "user",
    "counterparty",
    "amount",
    "currency",
    "choice",
];

/// One `pay` row per invoice, all at [`t0`], with random amounts.
pub fn generate_scenario(path: &Path, invoices: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    let mut rng = rand::thread_rng();
    let at = t0().to_rfc3339();

    wtr.write_record(SCENARIO_HEADER)?;
    for i in 1..=invoices {
        let cents: u32 = rng.gen_range(1..=1_000_000);
        wtr.write_record([
            "pay",
            at.as_str(),
            &format!("inv-{i:06}"),
            &format!("client-{}", rng.gen_range(1..=50)),
            "freelancer",
            &format!("{}.{:02}", cents / 100, cents % 100),
            "USD",
            "",
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// A scenario that pays every invoice and then sweeps after the hold period.
pub fn generate_settled_scenario(path: &Path, invoices: usize) -> Result<(), Error> {
    generate_scenario(path, invoices)?;
    let file = std::fs::OpenOptions::new().append(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    let at = (t0() + chrono::Duration::days(15)).to_rfc3339();
    wtr.write_record(["sweep", at.as_str(), "", "", "", "", "", ""])?;
    wtr.flush()?;
    Ok(())
}
