use crate::notify::DispatcherConfig;
use crate::replay::{ReplayConfig, DEFAULT_DRAIN_TIMEOUT};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Settle transfers against a ledger snapshot and notify subscribers
#[derive(Parser, Debug)]
#[command(name = "ledger-settlement")]
#[command(
    about = "Settle transfers through a hold account and notify subscribers",
    long_about = None
)]
pub struct CliArgs {
    /// Accounts CSV (`name,balance`)
    #[arg(value_name = "ACCOUNTS", help = "Path to the accounts CSV file")]
    pub accounts_file: PathBuf,

    /// Transfers CSV (`transfer,side,account,amount[,state]`)
    #[arg(value_name = "TRANSFERS", help = "Path to the transfer legs CSV file")]
    pub transfers_file: PathBuf,

    /// Subscriptions CSV (`id,owner,target,subject,event`)
    #[arg(
        long = "subscriptions",
        value_name = "FILE",
        help = "Subscriptions CSV; notifications are only sent when given"
    )]
    pub subscriptions_file: Option<PathBuf>,

    #[arg(
        long = "base-uri",
        value_name = "URI",
        default_value = "http://localhost",
        help = "Base URI for account, transfer and subscription resources"
    )]
    pub base_uri: String,

    #[arg(
        long = "allow-unbalanced",
        help = "Post transfers whose debit and credit totals differ"
    )]
    pub allow_unbalanced: bool,

    #[arg(
        long = "poll-interval-ms",
        value_name = "MS",
        help = "Delay between notification sweeps (default: 1000)"
    )]
    pub poll_interval_ms: Option<u64>,

    #[arg(
        long = "initial-retry-ms",
        value_name = "MS",
        help = "Delay before a new notification is swept (default: 2000)"
    )]
    pub initial_retry_ms: Option<u64>,

    #[arg(
        long = "max-retry-secs",
        value_name = "SECS",
        help = "Cap on the delivery backoff (default: 120)"
    )]
    pub max_retry_secs: Option<u64>,

    #[arg(
        long = "request-timeout-secs",
        value_name = "SECS",
        help = "Timeout of one delivery attempt (default: 10)"
    )]
    pub request_timeout_secs: Option<u64>,

    #[arg(
        long = "drain-timeout-secs",
        value_name = "SECS",
        help = "How long to wait for pending notifications (default: 30)"
    )]
    pub drain_timeout_secs: Option<u64>,

    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        default_value = "text",
        help = "Log output format on stderr: 'text' or 'json'"
    )]
    pub log_format: LogFormat,
}

/// Log output formats
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl CliArgs {
    /// Create a DispatcherConfig from CLI arguments
    ///
    /// Missing values take the defaults; zero values fall back to the
    /// defaults with a warning.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        let default = DispatcherConfig::default();
        DispatcherConfig::new(
            self.poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(default.poll_interval),
            self.initial_retry_ms
                .map(Duration::from_millis)
                .unwrap_or(default.initial_retry_delay),
            self.max_retry_secs
                .map(Duration::from_secs)
                .unwrap_or(default.max_retry_delay),
            self.request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default.request_timeout),
        )
    }

    /// Create a ReplayConfig from CLI arguments
    pub fn to_replay_config(&self) -> ReplayConfig {
        ReplayConfig {
            accounts: self.accounts_file.clone(),
            transfers: self.transfers_file.clone(),
            subscriptions: self.subscriptions_file.clone(),
            base_uri: self.base_uri.clone(),
            require_balanced: !self.allow_unbalanced,
            dispatcher: self.to_dispatcher_config(),
            drain_timeout: self
                .drain_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DRAIN_TIMEOUT),
        }
    }
}
