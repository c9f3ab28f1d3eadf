use std::io::Read;

use thiserror::Error;

use crate::normalize::{RawRow, TimestampField};

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("No data rows")]
    NoDataRows,
}

/// Column headers of the ledger spreadsheet export, matched
/// case-insensitively.
const COLUMNS: &[&str] = &[
    "timestamp",
    "amount",
    "currency",
    "counterparty",
    "card",
    "direction",
    "txntype",
    "rawtext",
];

/// Read a ledger CSV export into raw ingestion rows so a local file can
/// stand in for a backend fetch. Lines that cannot be read are skipped;
/// rows with unusable amounts survive here and are dropped by the
/// normalizer like any other malformed row.
pub fn parse_ledger_csv<R: Read>(data: R) -> Result<Vec<RawRow>, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    let index_of = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().to_lowercase().replace([' ', '_'], "") == name)
    };
    let cols: Vec<Option<usize>> = COLUMNS.iter().map(|c| index_of(c)).collect();
    let field = |record: &csv::StringRecord, col: usize| -> Option<String> {
        cols[col]
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable CSV line");
                continue;
            }
        };
        if record.is_empty() {
            continue;
        }

        rows.push(RawRow {
            txn_timestamp: field(&record, 0).map(TimestampField::Text),
            amount: field(&record, 1).and_then(|a| a.replace(',', "").parse().ok()),
            currency: field(&record, 2),
            counterparty: field(&record, 3),
            card: field(&record, 4),
            direction: field(&record, 5),
            txn_type: field(&record, 6),
            raw_text: field(&record, 7),
            ..RawRow::default()
        });
    }

    if rows.is_empty() {
        return Err(CsvError::NoDataRows);
    }

    Ok(rows)
}
