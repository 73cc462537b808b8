//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `assets_deposits_total` - Successful deposits
//! - `assets_withdrawals_total` - Successful withdrawals
//! - `assets_rejected_total{reason}` - Rejected ledger operations by error kind
//! - `assets_registrations_total{kind}` - Chain and asset registrations
//! - `assets_genesis_entries` - Records written by the last bulk load

use crate::error::Error;
use crate::types::Action;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Successful deposits
    pub deposits_total: IntCounter,

    /// Successful withdrawals
    pub withdrawals_total: IntCounter,

    /// Rejected operations by reason
    pub rejected_total: IntCounterVec,

    /// Registrations by kind
    pub registrations_total: IntCounterVec,

    /// Records written by the last bulk load
    pub genesis_entries: IntGauge,

    registry: Arc<Registry>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("deposits_total", &self.deposits_total.get())
            .field("withdrawals_total", &self.withdrawals_total.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector on its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let deposits_total = IntCounter::new("assets_deposits_total", "Successful deposits")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let withdrawals_total =
            IntCounter::new("assets_withdrawals_total", "Successful withdrawals")?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("assets_rejected_total", "Rejected ledger operations"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let registrations_total = IntCounterVec::new(
            Opts::new("assets_registrations_total", "Chain and asset registrations"),
            &["kind"],
        )?;
        registry.register(Box::new(registrations_total.clone()))?;

        let genesis_entries = IntGauge::new(
            "assets_genesis_entries",
            "Records written by the last bulk load",
        )?;
        registry.register(Box::new(genesis_entries.clone()))?;

        Ok(Self {
            deposits_total,
            withdrawals_total,
            rejected_total,
            registrations_total,
            genesis_entries,
            registry,
        })
    }

    /// Record a successful deposit or withdrawal
    pub fn record_transfer(&self, action: Action) {
        match action {
            Action::Deposit => self.deposits_total.inc(),
            Action::Withdraw => self.withdrawals_total.inc(),
        }
    }

    /// Record a rejected operation
    pub fn record_rejected(&self, err: &Error) {
        self.rejected_total
            .with_label_values(&[reason_label(err)])
            .inc();
    }

    /// Record a registration (`"chain"` or `"asset"`)
    pub fn record_registration(&self, kind: &str) {
        self.registrations_total.with_label_values(&[kind]).inc();
    }

    /// Record bulk load size
    pub fn record_genesis(&self, entries: usize) {
        self.genesis_entries.set(entries as i64);
    }

    /// Prometheus text exposition of every metric
    pub fn encode_text(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn reason_label(err: &Error) -> &'static str {
    match err {
        Error::NotFound(_) => "not_found",
        Error::InvalidInput(_) => "invalid_input",
        Error::Unauthorized(_) => "unauthorized",
        Error::InsufficientBalance(_) => "insufficient_balance",
        Error::DuplicateRegistration(_) => "duplicate_registration",
        Error::MalformedKey(_) => "malformed_key",
        Error::InvariantViolation(_) => "invariant_violation",
        Error::UnknownAction(_) => "unknown_action",
        Error::AssetNotRegistered(_) => "asset_not_registered",
        _ => "internal",
    }
}
