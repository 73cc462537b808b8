//! Core types for the asset ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for amounts and shares)

use crate::error::Error;
use crate::identifier::{derive_id, Address, AssetId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// External blockchain assets are bridged in from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientChainInfo {
    /// Human-readable name
    pub name: String,

    /// Free-form metadata
    #[serde(default)]
    pub meta_info: String,

    /// Chain id (unique)
    pub chain_id: u64,

    /// Blocks until a source-chain event is final
    #[serde(default)]
    pub finalization_blocks: u64,

    /// Byte length of native addresses on this chain
    pub address_length: u32,

    /// Signature scheme used by the chain
    #[serde(default)]
    pub signature_type: String,
}

/// Bridged token descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Token name
    pub name: String,

    /// Free-form metadata
    #[serde(default)]
    pub meta_info: String,

    /// Originating chain
    pub chain_id: u64,

    /// Token contract address on the originating chain
    pub address: Address,

    /// Token decimals
    pub decimals: u32,

    /// Supply cap
    pub total_supply: Decimal,
}

impl AssetInfo {
    /// Canonical asset id
    pub fn asset_id(&self) -> AssetId {
        derive_id(self.chain_id, self.address.as_bytes())
    }
}

/// Registered asset with its running staked total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingAssetInfo {
    /// Descriptor
    pub asset_basic_info: AssetInfo,

    /// Sum of all staker deposits, `0 <= x <= total_supply`
    pub staking_total_amount: Decimal,
}

/// Per-staker, per-asset balance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerBalance {
    /// Everything ever deposited minus withdrawals
    pub total_deposited: Decimal,

    /// Not allocated to any operator
    pub withdrawable: Decimal,

    /// Waiting to come back from operators
    pub pending_undelegation: Decimal,
}

/// Per-operator, per-asset allocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAllocation {
    /// Total delegated to the operator
    pub total_amount: Decimal,

    /// Operator's own stake, `<= total_amount`
    pub operator_amount: Decimal,

    /// Pending undelegation from all stakers
    pub pending_undelegation: Decimal,

    /// Operator's own pending unbonding, `<= pending_undelegation`
    pub operator_unbonding: Decimal,

    /// Total shares issued
    pub total_share: Decimal,

    /// Operator's own shares, `<= total_share`
    pub operator_share: Decimal,
}

/// Module parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// The only caller allowed to mutate state from the bridge side
    #[serde(default)]
    pub gateway_address: Option<Address>,
}

/// Deposit or withdraw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    /// Credit the staker
    Deposit = 1,
    /// Debit the staker
    Withdraw = 2,
}

impl Action {
    /// Signed change for `amount`
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            Action::Deposit => amount,
            Action::Withdraw => -amount,
        }
    }
}

impl TryFrom<u8> for Action {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Action::Deposit),
            2 => Ok(Action::Withdraw),
            other => Err(Error::UnknownAction(other)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Deposit => write!(f, "deposit"),
            Action::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// One deposit/withdraw request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositWithdrawParams {
    /// Originating chain
    pub chain_id: u64,

    /// Token address on that chain
    pub asset_address: Address,

    /// Staker address on that chain
    pub staker_address: Address,

    /// Unsigned amount
    pub amount: Decimal,

    /// Direction
    pub action: Action,
}
