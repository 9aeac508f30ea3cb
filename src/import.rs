// 📥 CSV import of manual transactions
//
// Columns: date,amount,type,custodian_id,description
// Every row becomes a PENDING transaction; duplicates are skipped by the
// controller using the idempotency hash.

use crate::entities::{NewTransaction, TransactionType};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    amount: String,
    #[serde(rename = "type")]
    transaction_type: String,
    custodian_id: String,
    #[serde(default)]
    description: String,
}

impl CsvRow {
    fn into_new_transaction(self) -> Result<NewTransaction> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid date {:?}", self.date))?;
        let amount: Decimal = self
            .amount
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .with_context(|| format!("invalid amount {:?}", self.amount))?;
        let transaction_type: TransactionType = self.transaction_type.parse()?;

        let custodian_id = self.custodian_id.trim().to_string();
        if custodian_id.is_empty() {
            return Err(anyhow!("custodian_id is empty"));
        }

        Ok(NewTransaction {
            date,
            amount,
            transaction_type,
            custodian_id,
            description: self.description.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

pub fn read_transactions<R: io::Read>(reader: R) -> Result<Vec<NewTransaction>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut transactions = Vec::new();

    for (index, result) in rdr.deserialize::<CsvRow>().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row = result.with_context(|| format!("Failed to read CSV line {}", line))?;
        let transaction = row
            .into_new_transaction()
            .with_context(|| format!("CSV line {}", line))?;
        transactions.push(transaction);
    }

    Ok(transactions)
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<NewTransaction>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;
    let transactions = read_transactions(file)?;

    tracing::info!(
        path = %csv_path.display(),
        rows = transactions.len(),
        "loaded transactions from CSV"
    );
    Ok(transactions)
}
