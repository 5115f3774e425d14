use crate::domain::escrow::EscrowEntry;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct EntryRecord<'a> {
    invoice: &'a str,
    amount: String,
    currency: &'a str,
    state: &'static str,
    auto_release_at: String,
    released_at: String,
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Writes the final escrow state as CSV, one row per entry, sorted by invoice.
pub struct EntryWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> EntryWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_entries(&mut self, mut entries: Vec<EscrowEntry>) -> Result<()> {
        entries.sort_by(|a, b| {
            a.invoice_id
                .cmp(&b.invoice_id)
                .then(a.held_at.cmp(&b.held_at))
        });
        if entries.is_empty() {
            self.writer.write_record([
                "invoice",
                "amount",
                "currency",
                "state",
                "auto_release_at",
                "released_at",
            ])?;
        }
        for entry in &entries {
            self.writer.serialize(EntryRecord {
                invoice: entry.invoice_id.as_str(),
                amount: entry.amount.to_string(),
                currency: entry.currency.as_str(),
                state: entry.state.as_str(),
                auto_release_at: timestamp(entry.auto_release_at),
                released_at: timestamp(entry.released_at),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::InvoiceId;
    use crate::domain::money::{Amount, Currency};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn entry(invoice: &str, now: DateTime<Utc>) -> EscrowEntry {
        EscrowEntry::hold(
            InvoiceId::new(invoice).unwrap(),
            Amount::new(dec!(1200.50)).unwrap(),
            Currency::new("USD").unwrap(),
            now,
            Duration::days(14),
        )
    }

    fn render(entries: Vec<EscrowEntry>) -> String {
        let mut out = Vec::new();
        EntryWriter::new(&mut out).write_entries(entries).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_writer_sorts_and_formats() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut released = entry("inv-a", t0);
        released.release(t0 + Duration::days(1)).unwrap();

        let output = render(vec![entry("inv-b", t0), released]);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "invoice,amount,currency,state,auto_release_at,released_at",
                "inv-a,1200.5,USD,RELEASED,,2026-03-02T12:00:00Z",
                "inv-b,1200.5,USD,HELD,2026-03-15T12:00:00Z,",
            ]
        );
    }

    #[test]
    fn test_writer_empty_still_has_header() {
        assert_eq!(
            render(Vec::new()),
            "invoice,amount,currency,state,auto_release_at,released_at\n"
        );
    }
}
