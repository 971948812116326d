//! Streaming CSV readers for the input files
//!
//! Provides `CsvRowReader`, an iterator over deserialized rows of one CSV
//! file, and the `load_*` functions that turn whole files into domain values.
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, unreadable header) are returned as `Err`
//! - Individual malformed rows are logged with their line number and skipped

use crate::core::uri::ResourceUris;
use crate::io::csv_format::{
    convert_account_row, convert_leg_row, convert_subscription_row, group_transfers, AccountRow,
    LegRow, LoadedTransfer, ParsedLeg, RejectedLeg, SubscriptionRow,
};
use crate::types::{Account, Subscription};
use csv::{DeserializeRecordsIntoIter, ReaderBuilder, Trim};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Iterator over the rows of a CSV file with a header line
///
/// Yields `(line, Result<T, String>)`; `line` is the 1-based line number in
/// the file, counting the header as line 1.
pub struct CsvRowReader<R: Read, T: DeserializeOwned> {
    rows: DeserializeRecordsIntoIter<R, T>,
    line_num: usize,
}

impl<T: DeserializeOwned> CsvRowReader<File, T> {
    /// Open `path` for streaming
    ///
    /// The reader trims whitespace and accepts rows with a missing trailing
    /// optional column.
    pub fn open(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read, T: DeserializeOwned> CsvRowReader<R, T> {
    pub fn from_reader(reader: R) -> Self {
        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(reader);

        CsvRowReader {
            rows: reader.into_deserialize(),
            line_num: 1,
        }
    }
}

impl<R: Read, T: DeserializeOwned> Iterator for CsvRowReader<R, T> {
    type Item = (usize, Result<T, String>);

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        self.line_num += 1;
        let line = self.line_num;
        Some((
            line,
            row.map_err(|e| format!("CSV parse error at line {}: {}", line, e)),
        ))
    }
}

/// Read every valid row of `reader`, converting each with `convert`
///
/// Rows that fail to parse or convert are logged and skipped.
fn load_rows<R, T, U, F>(
    rows: CsvRowReader<R, T>,
    kind: &'static str,
    mut convert: F,
) -> Vec<U>
where
    R: Read,
    T: DeserializeOwned,
    F: FnMut(T) -> Result<U, String>,
{
    let mut loaded = Vec::new();
    for (line, row) in rows {
        match row.and_then(&mut convert) {
            Ok(value) => loaded.push(value),
            Err(error) => {
                tracing::warn!(kind, line, %error, "skipping malformed row");
            }
        }
    }
    loaded
}

/// Load the accounts file (`name,balance`)
pub fn load_accounts(path: &Path) -> Result<Vec<Account>, String> {
    let rows = CsvRowReader::<File, AccountRow>::open(path)?;
    Ok(load_rows(rows, "account", convert_account_row))
}

/// Load the transfers file (`transfer,side,account,amount[,state]`)
///
/// Rows sharing a transfer key form one transfer, in first-seen order. A leg
/// row that fails conversion marks its transfer invalid instead of being
/// dropped; only rows without a readable transfer key are skipped.
pub fn load_transfers(path: &Path) -> Result<Vec<LoadedTransfer>, String> {
    let rows = CsvRowReader::<File, LegRow>::open(path)?;
    Ok(group_transfers(read_legs(rows)))
}

fn read_legs<R: Read>(rows: CsvRowReader<R, LegRow>) -> Vec<Result<ParsedLeg, RejectedLeg>> {
    let mut legs = Vec::new();
    for (line, row) in rows {
        let row = match row {
            Ok(row) => row,
            Err(error) => {
                tracing::warn!(kind = "transfer leg", line, %error, "skipping malformed row");
                continue;
            }
        };

        let transfer = row.transfer.trim().to_string();
        match convert_leg_row(row) {
            Ok(parsed) => legs.push(Ok(parsed)),
            Err(reason) if transfer.is_empty() => {
                tracing::warn!(
                    kind = "transfer leg",
                    line,
                    error = %reason,
                    "skipping malformed row"
                );
            }
            Err(reason) => {
                tracing::warn!(
                    kind = "transfer leg",
                    line,
                    transfer = %transfer,
                    error = %reason,
                    "malformed leg, rejecting its transfer"
                );
                legs.push(Err(RejectedLeg { transfer, reason }));
            }
        }
    }
    legs
}

/// Load the subscriptions file (`id,owner,target,subject,event`)
pub fn load_subscriptions(path: &Path, uris: &ResourceUris) -> Result<Vec<Subscription>, String> {
    let rows = CsvRowReader::<File, SubscriptionRow>::open(path)?;
    Ok(load_rows(rows, "subscription", |row| {
        convert_subscription_row(row, uris)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransferState;
    use rust_decimal::Decimal;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_row_reader_reports_line_numbers() {
        let input = "name,balance\nalice,10\nbob,oops,extra\ncarol,3\n";
        let rows: Vec<(usize, Result<AccountRow, String>)> =
            CsvRowReader::from_reader(input.as_bytes()).collect();

        let lines: Vec<usize> = rows.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert!(rows[0].1.is_ok());
        assert!(rows[2].1.is_ok());
    }

    #[test]
    fn test_load_accounts_skips_malformed_rows() {
        let file = temp_csv("name,balance\nalice,100\nbob,not_a_number\n hold , 0 \n");

        let accounts = load_accounts(file.path()).unwrap();

        assert_eq!(
            accounts,
            vec![
                Account::new("alice", Decimal::new(100, 0)),
                Account::new("hold", Decimal::ZERO),
            ]
        );
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = load_accounts(Path::new("does/not/exist.csv"));
        assert!(result.unwrap_err().contains("Failed to open file"));
    }

    #[test]
    fn test_load_transfers_with_optional_state_column() {
        let file = temp_csv(
            "transfer,side,account,amount,state\n\
             t1,debit,alice,50\n\
             t1,credit,bob,50\n\
             t2,debit,bob,5,rejected\n\
             t2,credit,alice,5,\n",
        );

        let transfers = load_transfers(file.path()).unwrap();

        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].transfer.state, TransferState::Executed);
        assert_eq!(transfers[0].transfer.debits.len(), 1);
        assert_eq!(transfers[1].transfer.state, TransferState::Rejected);
    }

    #[test]
    fn test_load_transfers_rejects_transfer_with_bad_leg() {
        let file = temp_csv(
            "transfer,side,account,amount,state\n\
             t1,debit,alice,10\n\
             t1,debit,carol,5O\n\
             t1,credit,bob,10\n\
             t1,credit,dave,5O\n\
             t2,debit\n\
             ,debit,alice,1\n\
             t3,debit,alice,1\n\
             t3,credit,bob,1\n",
        );

        let transfers = load_transfers(file.path()).unwrap();

        let labels: Vec<&str> = transfers.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["t1", "t2", "t3"]);
        assert!(transfers[0]
            .invalid
            .as_deref()
            .unwrap()
            .contains("Invalid amount '5O'"));
        assert!(transfers[1].invalid.is_some());
        assert_eq!(transfers[2].invalid, None);
    }

    #[test]
    fn test_load_subscriptions() {
        let uris = ResourceUris::new("http://ledger.example");
        let file = temp_csv(
            "id,owner,target,subject,event\n\
             s1,bob,http://bob.example/hook,bob,transfer.update\n\
             s2,bob,http://bob.example/hook,bob,account.update\n",
        );

        let subscriptions = load_subscriptions(file.path(), &uris).unwrap();

        assert_eq!(subscriptions.len(), 1);
        assert_eq!(
            subscriptions[0].subject,
            "http://ledger.example/accounts/bob"
        );
    }
}
