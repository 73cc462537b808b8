//! Bulk load (genesis) validation, population and export
//!
//! A candidate state is checked in four ordered phases before anything is
//! written:
//!
//! 1. client chains
//! 2. assets
//! 3. staker deposits
//! 4. operator allocations
//!
//! Each phase consumes what the previous one proved valid. [`GenesisMode`]
//! selects the mode-dependent predicates; the phases themselves are shared.
//! Population is a single write batch, so a failed load writes nothing.

use crate::{
    delta::exact_add,
    error::{Error, Result},
    identifier::{AssetId, OperatorId, StakerId},
    ledger::{validate_params, Ledger},
    storage::WriteSet,
    types::{ClientChainInfo, OperatorAllocation, Params, StakerBalance, StakingAssetInfo},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How a bulk load relates to existing balances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenesisMode {
    /// Fresh chain: deposits are all withdrawable, asset totals are incremented
    /// by the loaded deposits, no operator allocations yet
    #[default]
    ColdBootstrap,
    /// Restart from an export: asset totals are already final
    WarmRestart,
}

impl FromStr for GenesisMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cold_bootstrap" | "cold" => Ok(GenesisMode::ColdBootstrap),
            "warm_restart" | "warm" => Ok(GenesisMode::WarmRestart),
            other => Err(Error::Config(format!("unknown genesis mode {}", other))),
        }
    }
}

impl fmt::Display for GenesisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenesisMode::ColdBootstrap => write!(f, "cold_bootstrap"),
            GenesisMode::WarmRestart => write!(f, "warm_restart"),
        }
    }
}

/// Staker balance entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerDeposit {
    /// Canonical staker id
    pub staker_id: String,
    /// Canonical asset id
    pub asset_id: String,
    /// Balance
    pub info: StakerBalance,
}

/// Operator allocation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAllocationEntry {
    /// Operator address
    pub operator: String,
    /// Canonical asset id
    pub asset_id: String,
    /// Allocation
    pub info: OperatorAllocation,
}

/// Full ledger state for bulk load and export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisState {
    /// Module parameters
    pub params: Params,
    /// Client chains
    pub client_chains: Vec<ClientChainInfo>,
    /// Assets with their staked totals
    pub assets: Vec<StakingAssetInfo>,
    /// Staker balances
    pub staker_deposits: Vec<StakerDeposit>,
    /// Operator allocations
    pub operator_allocations: Vec<OperatorAllocationEntry>,
}

/// State that passed every phase, ready to write
#[derive(Debug, Clone)]
pub struct ValidatedGenesis {
    mode: GenesisMode,
    params: Params,
    client_chains: BTreeMap<u64, ClientChainInfo>,
    assets: BTreeMap<AssetId, StakingAssetInfo>,
    staker_balances: Vec<(StakerId, AssetId, StakerBalance)>,
    operator_allocations: Vec<(OperatorId, AssetId, OperatorAllocation)>,
}

impl ValidatedGenesis {
    /// Mode the state was validated under
    pub fn mode(&self) -> GenesisMode {
        self.mode
    }

    /// Asset records as they will be written (cold mode includes increments)
    pub fn assets(&self) -> impl Iterator<Item = &StakingAssetInfo> {
        self.assets.values()
    }

    /// Records to write, params excluded
    pub fn entry_count(&self) -> usize {
        self.client_chains.len()
            + self.assets.len()
            + self.staker_balances.len()
            + self.operator_allocations.len()
    }

    /// Stage every record in phase order
    pub fn stage(&self, set: &mut WriteSet<'_>) -> Result<()> {
        set.put_params(&self.params)?;
        for chain in self.client_chains.values() {
            set.put_client_chain(chain)?;
        }
        for asset in self.assets.values() {
            set.put_staking_asset(asset)?;
        }
        for (staker_id, asset_id, balance) in &self.staker_balances {
            set.put_staker_balance(staker_id, asset_id, balance)?;
        }
        for (operator, asset_id, allocation) in &self.operator_allocations {
            set.put_operator_allocation(operator, asset_id, allocation)?;
        }
        Ok(())
    }
}

fn violation(msg: String) -> Error {
    Error::InvariantViolation(msg)
}

fn checked_sum(what: &str, a: Decimal, b: Decimal) -> Result<Decimal> {
    exact_add(a, b).ok_or_else(|| violation(format!("{}: {} + {} is not exactly representable", what, a, b)))
}

fn require_non_negative(what: &str, fields: &[(&str, Decimal)]) -> Result<()> {
    for (name, value) in fields {
        if *value < Decimal::ZERO {
            return Err(violation(format!("{}: {} is negative ({})", what, name, value)));
        }
    }
    Ok(())
}

impl GenesisState {
    /// Read from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write as pretty JSON
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Run every phase under `mode`
    pub fn validate(&self, mode: GenesisMode) -> Result<ValidatedGenesis> {
        validate_params(&self.params).map_err(|e| violation(format!("params: {}", e)))?;

        let client_chains = self.validate_client_chains()?;
        let mut assets = self.validate_assets(&client_chains)?;
        let staker_balances = self.validate_staker_deposits(mode, &client_chains, &mut assets)?;
        let operator_allocations = self.validate_operator_allocations(mode, &assets)?;

        Ok(ValidatedGenesis {
            mode,
            params: self.params.clone(),
            client_chains,
            assets,
            staker_balances,
            operator_allocations,
        })
    }

    fn validate_client_chains(&self) -> Result<BTreeMap<u64, ClientChainInfo>> {
        let mut chains = BTreeMap::new();
        for info in &self.client_chains {
            if info.name.is_empty() {
                return Err(violation(format!("client chain {} has no name", info.chain_id)));
            }
            if info.chain_id == 0 {
                return Err(violation(format!("client chain {} has chain id 0", info.name)));
            }
            if info.address_length == 0 {
                return Err(violation(format!(
                    "client chain {} has zero address length",
                    info.chain_id
                )));
            }
            if chains.insert(info.chain_id, info.clone()).is_some() {
                return Err(violation(format!("duplicate client chain {}", info.chain_id)));
            }
        }
        Ok(chains)
    }

    fn validate_assets(
        &self,
        chains: &BTreeMap<u64, ClientChainInfo>,
    ) -> Result<BTreeMap<AssetId, StakingAssetInfo>> {
        let mut assets = BTreeMap::new();
        for asset in &self.assets {
            let info = &asset.asset_basic_info;
            let chain = chains.get(&info.chain_id).ok_or_else(|| {
                violation(format!(
                    "asset {} on unknown chain {}",
                    info.address, info.chain_id
                ))
            })?;
            if info.address.len() != chain.address_length as usize {
                return Err(violation(format!(
                    "asset address {} is {} bytes, chain {} expects {}",
                    info.address,
                    info.address.len(),
                    chain.chain_id,
                    chain.address_length
                )));
            }

            let asset_id = info.asset_id();
            if info.total_supply <= Decimal::ZERO {
                return Err(violation(format!(
                    "asset {} total supply must be positive, got {}",
                    asset_id, info.total_supply
                )));
            }
            require_non_negative(
                &format!("asset {}", asset_id),
                &[("staking_total_amount", asset.staking_total_amount)],
            )?;
            if asset.staking_total_amount > info.total_supply {
                return Err(violation(format!(
                    "asset {} staking total {} exceeds supply {}",
                    asset_id, asset.staking_total_amount, info.total_supply
                )));
            }

            if assets.insert(asset_id.clone(), asset.clone()).is_some() {
                return Err(violation(format!("duplicate asset {}", asset_id)));
            }
        }
        Ok(assets)
    }

    fn validate_staker_deposits(
        &self,
        mode: GenesisMode,
        chains: &BTreeMap<u64, ClientChainInfo>,
        assets: &mut BTreeMap<AssetId, StakingAssetInfo>,
    ) -> Result<Vec<(StakerId, AssetId, StakerBalance)>> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(self.staker_deposits.len());

        for entry in &self.staker_deposits {
            let staker_id: StakerId = entry
                .staker_id
                .parse()
                .map_err(|e| violation(format!("staker id {}: {}", entry.staker_id, e)))?;
            let chain = chains.get(&staker_id.chain_id()).ok_or_else(|| {
                violation(format!("staker {} on unknown chain", staker_id))
            })?;
            if staker_id.address().len() != chain.address_length as usize {
                return Err(violation(format!(
                    "staker {} address length does not match chain {}",
                    staker_id, chain.chain_id
                )));
            }

            let asset_id: AssetId = entry
                .asset_id
                .parse()
                .map_err(|e| violation(format!("asset id {}: {}", entry.asset_id, e)))?;
            let asset = assets.get_mut(&asset_id).ok_or_else(|| {
                violation(format!("staker {} deposits unknown asset {}", staker_id, asset_id))
            })?;
            if asset_id.chain_id() != staker_id.chain_id() {
                return Err(violation(format!(
                    "staker {} and asset {} are on different chains",
                    staker_id, asset_id
                )));
            }

            let info = &entry.info;
            let what = format!("staker {} asset {}", staker_id, asset_id);
            require_non_negative(
                &what,
                &[
                    ("total_deposited", info.total_deposited),
                    ("withdrawable", info.withdrawable),
                    ("pending_undelegation", info.pending_undelegation),
                ],
            )?;

            if !seen.insert((staker_id.clone(), asset_id.clone())) {
                return Err(violation(format!("duplicate deposit for {}", what)));
            }

            match mode {
                GenesisMode::ColdBootstrap => {
                    if !info.pending_undelegation.is_zero() {
                        return Err(violation(format!(
                            "{}: pending undelegation {} must be zero at bootstrap",
                            what, info.pending_undelegation
                        )));
                    }
                    if info.withdrawable != info.total_deposited {
                        return Err(violation(format!(
                            "{}: withdrawable {} must equal total deposited {} at bootstrap",
                            what, info.withdrawable, info.total_deposited
                        )));
                    }
                    let total = checked_sum(
                        &format!("asset {} staking total", asset_id),
                        asset.staking_total_amount,
                        info.total_deposited,
                    )?;
                    if total > asset.asset_basic_info.total_supply {
                        return Err(violation(format!(
                            "asset {} staking total {} would exceed supply {}",
                            asset_id, total, asset.asset_basic_info.total_supply
                        )));
                    }
                    asset.staking_total_amount = total;
                }
                GenesisMode::WarmRestart => {
                    if info.total_deposited > asset.staking_total_amount {
                        return Err(violation(format!(
                            "{}: total deposited {} exceeds asset staking total {}",
                            what, info.total_deposited, asset.staking_total_amount
                        )));
                    }
                    let committed =
                        checked_sum(&what, info.pending_undelegation, info.withdrawable)?;
                    if committed > info.total_deposited {
                        return Err(violation(format!(
                            "{}: pending {} plus withdrawable {} exceeds total deposited {}",
                            what,
                            info.pending_undelegation,
                            info.withdrawable,
                            info.total_deposited
                        )));
                    }
                }
            }

            out.push((staker_id, asset_id, info.clone()));
        }
        Ok(out)
    }

    fn validate_operator_allocations(
        &self,
        mode: GenesisMode,
        assets: &BTreeMap<AssetId, StakingAssetInfo>,
    ) -> Result<Vec<(OperatorId, AssetId, OperatorAllocation)>> {
        if mode == GenesisMode::ColdBootstrap && !self.operator_allocations.is_empty() {
            return Err(violation(format!(
                "{} operator allocations present at bootstrap",
                self.operator_allocations.len()
            )));
        }

        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(self.operator_allocations.len());

        for entry in &self.operator_allocations {
            let operator: OperatorId = entry
                .operator
                .parse()
                .map_err(|e| violation(format!("operator {}: {}", entry.operator, e)))?;
            let asset_id: AssetId = entry
                .asset_id
                .parse()
                .map_err(|e| violation(format!("asset id {}: {}", entry.asset_id, e)))?;
            let asset = assets.get(&asset_id).ok_or_else(|| {
                violation(format!("operator {} holds unknown asset {}", operator, asset_id))
            })?;

            let what = format!("operator {} asset {}", operator, asset_id);
            if !seen.insert((operator.clone(), asset_id.clone())) {
                return Err(violation(format!("duplicate allocation for {}", what)));
            }

            let info = &entry.info;
            require_non_negative(
                &what,
                &[
                    ("total_amount", info.total_amount),
                    ("operator_amount", info.operator_amount),
                    ("pending_undelegation", info.pending_undelegation),
                    ("operator_unbonding", info.operator_unbonding),
                    ("total_share", info.total_share),
                    ("operator_share", info.operator_share),
                ],
            )?;

            let claimed = checked_sum(&what, info.total_amount, info.pending_undelegation)?;
            if claimed > asset.staking_total_amount {
                return Err(violation(format!(
                    "{}: total {} plus pending {} exceeds asset staking total {}",
                    what, info.total_amount, info.pending_undelegation, asset.staking_total_amount
                )));
            }
            info.check_bounds()
                .map_err(|e| violation(format!("{}: {}", what, e)))?;

            out.push((operator, asset_id, info.clone()));
        }
        Ok(out)
    }
}

impl Ledger {
    /// Validate and load a full state
    ///
    /// Nothing is written unless every phase passes. Callers at startup
    /// should treat an error as fatal.
    pub fn init_genesis(&self, state: &GenesisState, mode: GenesisMode) -> Result<()> {
        let validated = state.validate(mode).map_err(|e| {
            tracing::error!(mode = %mode, error = %e, "Genesis validation failed");
            e
        })?;

        let mut set = self.storage().write_set();
        validated.stage(&mut set)?;
        set.commit().map_err(|e| {
            tracing::error!(mode = %mode, error = %e, "Genesis population failed");
            e
        })?;

        let entries = validated.entry_count();
        self.metrics().record_genesis(entries);
        tracing::info!(
            mode = %mode,
            client_chains = state.client_chains.len(),
            assets = state.assets.len(),
            staker_deposits = state.staker_deposits.len(),
            operator_allocations = state.operator_allocations.len(),
            "Genesis loaded"
        );
        Ok(())
    }

    /// Current state in key order; re-importing it in warm-restart mode
    /// reproduces this ledger
    pub fn export_genesis(&self) -> Result<GenesisState> {
        let storage = self.storage();

        let staker_deposits = storage
            .staker_balances(None)?
            .into_iter()
            .map(|(staker_id, asset_id, info)| StakerDeposit {
                staker_id: staker_id.to_string(),
                asset_id: asset_id.to_string(),
                info,
            })
            .collect();

        let operator_allocations = storage
            .operator_allocations(None)?
            .into_iter()
            .map(|(operator, asset_id, info)| OperatorAllocationEntry {
                operator: operator.to_string(),
                asset_id: asset_id.to_string(),
                info,
            })
            .collect();

        Ok(GenesisState {
            params: storage.get_params()?,
            client_chains: storage.client_chains()?,
            assets: storage.staking_assets()?,
            staker_deposits,
            operator_allocations,
        })
    }
}
