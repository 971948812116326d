//! I/O module
//!
//! Handles CSV parsing and output.
//!
//! # Components
//!
//! - `csv_format` - Row formats, conversion to domain types, balance output
//! - `reader` - Streaming row reader and whole-file loaders

pub mod csv_format;
pub mod reader;

pub use csv_format::{write_balances_csv, LoadedTransfer};
pub use reader::{load_accounts, load_subscriptions, load_transfers, CsvRowReader};
