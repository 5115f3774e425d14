use super::scenario_reader::{Command, ScenarioReader, ScenarioStep};
use crate::application::scheduler::Scheduler;
use crate::domain::clock::ManualClock;
use crate::domain::dispute::OpenDispute;
use crate::domain::escrow::Actor;
use crate::error::Result;
use std::io::Read;
use tracing::{debug, error, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
}

/// Drives the engine from a scenario file on a manual clock, so a whole
/// escrow lifecycle can be replayed in milliseconds.
pub struct Replay {
    scheduler: Scheduler,
    clock: ManualClock,
}

impl Replay {
    pub fn new(scheduler: Scheduler, clock: ManualClock) -> Self {
        Self { scheduler, clock }
    }

    /// Applies every step in order. Unreadable rows and rejected commands are
    /// logged and skipped.
    pub async fn run<R: Read>(&self, reader: ScenarioReader<R>) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        // Header is line 1.
        for (line, step) in (2u64..).zip(reader.steps()) {
            let outcome = match step {
                Ok(step) => self.apply(step).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => summary.applied += 1,
                Err(e) if e.is_rejection() => {
                    warn!(line, error = %e, "scenario row skipped");
                    summary.rejected += 1;
                }
                Err(e) => {
                    error!(line, error = %e, "scenario row skipped");
                    summary.rejected += 1;
                }
            }
        }
        summary
    }

    pub async fn apply(&self, step: ScenarioStep) -> Result<()> {
        self.clock.set(step.at);
        let engine = self.scheduler.engine();
        let ledger = engine.ledger();

        match step.command {
            Command::Pay(invoice) => {
                let invoice = ledger.register_invoice(invoice).await?;
                ledger
                    .hold(&invoice.id, invoice.amount, invoice.currency)
                    .await?;
            }
            Command::Release { invoice, user } => {
                let entry = ledger.entry_for_invoice(&invoice).await?;
                ledger
                    .release(entry.id, Actor::Client { user_id: user })
                    .await?;
            }
            Command::Dispute {
                invoice,
                user,
                reason,
            } => {
                engine
                    .open(OpenDispute {
                        invoice_id: invoice,
                        opener_id: user,
                        category: Default::default(),
                        reason,
                        description: String::new(),
                        expected_outcome: String::new(),
                        evidence: Vec::new(),
                    })
                    .await?;
            }
            Command::Vote {
                invoice,
                user,
                choice,
            } => {
                let dispute = engine.latest_for_invoice(&invoice).await?;
                engine.cast_vote(dispute.id, user, choice).await?;
            }
            Command::Withdraw { invoice, user } => {
                let dispute = engine.latest_for_invoice(&invoice).await?;
                engine.withdraw(dispute.id, &user).await?;
            }
            Command::Close { invoice } => {
                let dispute = engine.latest_for_invoice(&invoice).await?;
                engine.close_voting(dispute.id).await?;
            }
            Command::Sweep => {
                let report = self.scheduler.tick().await?;
                debug!(?report, "replayed sweep");
            }
        }
        Ok(())
    }
}
