//! Bridged-asset ledger core
//!
//! Tracks assets bridged in from external chains at three levels: a global
//! per-asset staked total, a per-staker balance and a per-operator allocation.
//!
//! # Architecture
//!
//! - **Identifiers**: chain-scoped ids (`0x<addr>_0x<chain>`) and `/`-joined keys
//! - **Registry**: client chains and assets, gated by a price oracle
//! - **Signed deltas**: every balance change is computed on a copy and written
//!   in one batch
//! - **Genesis**: phased validation of a full state before bulk load
//!
//! # Invariants
//!
//! - Every balance field stays non-negative
//! - Staker deposits of an asset sum to its staked total
//! - A staked total never exceeds the asset's supply cap
//! - A rejected operation leaves storage untouched

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod bridge;
pub mod config;
pub mod delta;
pub mod error;
pub mod genesis;
pub mod identifier;
pub mod ledger;
pub mod metrics;
pub mod registry;
pub mod storage;
pub mod types;

// Re-exports
pub use bridge::{BridgeCall, BridgeResponse, TransferPayload};
pub use config::Config;
pub use delta::{ApplyDelta, OperatorAllocationDelta, StakerBalanceDelta};
pub use error::{Error, Result};
pub use genesis::{GenesisMode, GenesisState};
pub use identifier::{derive_id, Address, AssetId, ChainScopedId, OperatorId, StakerId};
pub use ledger::Ledger;
pub use registry::{PriceOracle, StaticPriceOracle};
pub use types::{
    Action, AssetInfo, ClientChainInfo, DepositWithdrawParams, OperatorAllocation, Params,
    StakerBalance, StakingAssetInfo,
};
