//! Main ledger orchestration layer
//!
//! Ties together storage, registry, delta application and metrics into the
//! deposit/withdraw API driven by the bridge.
//!
//! # Example
//!
//! ```no_run
//! use assets_core::{Action, Address, Config, DepositWithdrawParams, Ledger};
//! use rust_decimal::Decimal;
//!
//! fn main() -> assets_core::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let withdrawable = ledger.perform_deposit_or_withdraw(&DepositWithdrawParams {
//!         chain_id: 101,
//!         asset_address: Address::from_hex("0xdac17f958d2ee523a2206206994597c13d831ec7")?,
//!         staker_address: Address::from_hex("0x00000000000000000000000000000000000000bb")?,
//!         amount: Decimal::from(100),
//!         action: Action::Deposit,
//!     })?;
//!     println!("withdrawable: {}", withdrawable);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    delta::{exact_add, ApplyDelta, OperatorAllocationDelta, StakerBalanceDelta},
    identifier::{derive_id, AssetId, OperatorId, StakerId, OPERATOR_ADDRESS_LENGTH},
    metrics::Metrics,
    registry::{PriceOracle, Registry, StaticPriceOracle},
    storage::Storage,
    types::{
        AssetInfo, ClientChainInfo, DepositWithdrawParams, OperatorAllocation, Params,
        StakerBalance,
    },
    Config, Error, Result,
};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

/// Main ledger interface
pub struct Ledger {
    /// Storage backend
    storage: Arc<Storage>,

    /// Chain and asset registry
    registry: Registry,

    /// Prometheus metrics
    metrics: Metrics,

    /// Native-asset sentinel, if configured
    native_asset_id: Option<AssetId>,

    /// Configuration
    config: Config,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("storage", &self.storage)
            .field("native_asset_id", &self.native_asset_id)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);

        let oracle = StaticPriceOracle::from_ids(&config.priced_assets)?;
        let registry = Registry::new(storage.clone(), Arc::new(oracle));

        let native_asset_id = if config.native_asset_id.is_empty() {
            None
        } else {
            Some(config.native_asset_id.parse()?)
        };

        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;

        Ok(Self {
            storage,
            registry,
            metrics,
            native_asset_id,
            config,
        })
    }

    /// Replace the price oracle
    pub fn with_price_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.registry.set_price_oracle(oracle);
        self
    }

    /// Registry (read access)
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Storage (read access)
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current params
    pub fn params(&self) -> Result<Params> {
        self.storage.get_params()
    }

    /// Replace params
    pub fn set_params(&self, params: &Params) -> Result<()> {
        validate_params(params)?;
        self.storage.put_params(params)?;
        tracing::info!(gateway = ?params.gateway_address.as_ref().map(|a| a.to_hex()), "Params updated");
        Ok(())
    }

    /// Register or update a client chain
    pub fn register_client_chain(&self, info: ClientChainInfo) -> Result<()> {
        self.observe(self.registry.register_client_chain(info))?;
        self.metrics.record_registration("chain");
        Ok(())
    }

    /// Register a new asset
    pub fn register_asset(&self, asset: AssetInfo) -> Result<AssetId> {
        let asset_id = self.observe(self.registry.register_asset(asset))?;
        self.metrics.record_registration("asset");
        Ok(asset_id)
    }

    /// True if `asset_id` is the native-asset sentinel
    pub fn is_native_asset(&self, asset_id: &AssetId) -> bool {
        self.native_asset_id.as_ref() == Some(asset_id)
    }

    /// Execute one deposit or withdrawal, returning the staker's new withdrawable amount
    ///
    /// Staker balance and asset total are computed in memory and written in a
    /// single batch; any failure leaves storage untouched.
    pub fn perform_deposit_or_withdraw(&self, params: &DepositWithdrawParams) -> Result<Decimal> {
        let withdrawable = self.observe(self.apply_transfer(params))?;
        self.metrics.record_transfer(params.action);
        Ok(withdrawable)
    }

    fn apply_transfer(&self, params: &DepositWithdrawParams) -> Result<Decimal> {
        if params.amount < Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "amount must not be negative, got {}",
                params.amount
            )));
        }
        if params.amount.is_zero() {
            return Err(Error::InvalidInput("amount must be positive".to_string()));
        }

        let staker_id = derive_id(params.chain_id, params.staker_address.as_bytes());
        let asset_id = derive_id(params.chain_id, params.asset_address.as_bytes());

        let asset = self
            .storage
            .get_staking_asset(&asset_id)?
            .ok_or_else(|| Error::AssetNotRegistered(asset_id.to_string()))?;

        let change = params.action.signed(params.amount);

        if self.is_native_asset(&asset_id) {
            tracing::debug!(
                staker_id = %staker_id,
                asset_id = %asset_id,
                action = %params.action,
                "Native asset transfer, balances handled elsewhere"
            );
            return Ok(self
                .storage
                .staker_balance_or_default(&staker_id, &asset_id)?
                .withdrawable);
        }

        let balance = self
            .storage
            .staker_balance_or_default(&staker_id, &asset_id)?
            .apply_delta(&StakerBalanceDelta {
                total_deposited: change,
                withdrawable: change,
                ..Default::default()
            })?;
        let asset = asset.apply_delta(&change)?;

        let mut set = self.storage.write_set();
        set.put_staker_balance(&staker_id, &asset_id, &balance)?;
        set.put_staking_asset(&asset)?;
        set.commit()?;

        tracing::debug!(
            staker_id = %staker_id,
            asset_id = %asset_id,
            action = %params.action,
            amount = %params.amount,
            withdrawable = %balance.withdrawable,
            staking_total = %asset.staking_total_amount,
            "Transfer applied"
        );

        Ok(balance.withdrawable)
    }

    /// Apply a signed delta to a staker balance
    pub fn update_staker_asset_state(
        &self,
        staker_id: &StakerId,
        asset_id: &AssetId,
        delta: &StakerBalanceDelta,
    ) -> Result<StakerBalance> {
        self.observe(self.require_asset(asset_id))?;
        let balance = self.observe(
            self.storage
                .staker_balance_or_default(staker_id, asset_id)?
                .apply_delta(delta),
        )?;

        let mut set = self.storage.write_set();
        set.put_staker_balance(staker_id, asset_id, &balance)?;
        set.commit()?;

        tracing::debug!(staker_id = %staker_id, asset_id = %asset_id, "Staker balance updated");
        Ok(balance)
    }

    /// Apply a signed delta to an operator allocation
    pub fn update_operator_asset_state(
        &self,
        operator: &OperatorId,
        asset_id: &AssetId,
        delta: &OperatorAllocationDelta,
    ) -> Result<OperatorAllocation> {
        self.observe(self.require_asset(asset_id))?;
        let allocation = self.observe(
            self.storage
                .operator_allocation_or_default(operator, asset_id)?
                .apply_delta(delta),
        )?;

        let mut set = self.storage.write_set();
        set.put_operator_allocation(operator, asset_id, &allocation)?;
        set.commit()?;

        tracing::debug!(operator = %operator, asset_id = %asset_id, "Operator allocation updated");
        Ok(allocation)
    }

    /// One staker's balance in one asset
    pub fn get_staker_asset(&self, staker_id: &StakerId, asset_id: &AssetId) -> Result<StakerBalance> {
        self.storage
            .get_staker_balance(staker_id, asset_id)?
            .ok_or_else(|| Error::NotFound(format!("staker {} asset {}", staker_id, asset_id)))
    }

    /// All balances of one staker
    pub fn staker_assets(&self, staker_id: &StakerId) -> Result<Vec<(AssetId, StakerBalance)>> {
        Ok(self
            .storage
            .staker_balances(Some(staker_id))?
            .into_iter()
            .map(|(_, asset_id, balance)| (asset_id, balance))
            .collect())
    }

    /// One operator's allocation in one asset
    pub fn get_operator_asset(
        &self,
        operator: &OperatorId,
        asset_id: &AssetId,
    ) -> Result<OperatorAllocation> {
        self.storage
            .get_operator_allocation(operator, asset_id)?
            .ok_or_else(|| Error::NotFound(format!("operator {} asset {}", operator, asset_id)))
    }

    /// All allocations of one operator
    pub fn operator_assets(&self, operator: &OperatorId) -> Result<Vec<(AssetId, OperatorAllocation)>> {
        Ok(self
            .storage
            .operator_allocations(Some(operator))?
            .into_iter()
            .map(|(_, asset_id, allocation)| (asset_id, allocation))
            .collect())
    }

    /// Every staker balance, in key order
    pub fn all_staker_assets(&self) -> Result<Vec<(StakerId, AssetId, StakerBalance)>> {
        self.storage.staker_balances(None)
    }

    /// Every operator allocation, in key order
    pub fn all_operator_assets(&self) -> Result<Vec<(OperatorId, AssetId, OperatorAllocation)>> {
        self.storage.operator_allocations(None)
    }

    /// Check that staker deposits of an asset sum to its staked total
    pub fn check_conservation(&self, asset_id: &AssetId) -> Result<bool> {
        let asset = self.registry.get_asset(asset_id)?;
        let deposited = self
            .storage
            .staker_balances(None)?
            .into_iter()
            .filter(|(_, id, _)| id == asset_id)
            .try_fold(Decimal::ZERO, |sum, (staker_id, _, balance)| {
                exact_add(sum, balance.total_deposited).ok_or_else(|| {
                    Error::InvariantViolation(format!(
                        "deposits of {} overflow at staker {}",
                        asset_id, staker_id
                    ))
                })
            })?;
        Ok(deposited == asset.staking_total_amount)
    }

    /// Digest of the full persisted state
    pub fn state_digest(&self) -> Result<[u8; 32]> {
        self.storage.state_digest()
    }

    fn require_asset(&self, asset_id: &AssetId) -> Result<()> {
        if self.registry.is_registered_asset(asset_id)? {
            Ok(())
        } else {
            Err(Error::AssetNotRegistered(asset_id.to_string()))
        }
    }

    /// Count a failed operation
    pub(crate) fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref err) = result {
            self.metrics.record_rejected(err);
            tracing::debug!(error = %err, "Ledger operation rejected");
        }
        result
    }
}

/// Gateway, if set, must be a ledger-chain account
pub(crate) fn validate_params(params: &Params) -> Result<()> {
    match &params.gateway_address {
        Some(gateway) if gateway.len() != OPERATOR_ADDRESS_LENGTH => Err(Error::InvalidInput(
            format!(
                "gateway address {} must be {} bytes",
                gateway, OPERATOR_ADDRESS_LENGTH
            ),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Address;
    use crate::types::Action;

    const CHAIN: u64 = 101;

    fn asset_address() -> Address {
        Address::new(vec![0xaa; 20])
    }

    fn staker_address() -> Address {
        Address::new(vec![0xbb; 20])
    }

    fn create_test_ledger() -> (Ledger, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.priced_assets = vec![derive_id(CHAIN, asset_address().as_bytes()).to_string()];

        let ledger = Ledger::open(config).unwrap();
        ledger
            .register_client_chain(ClientChainInfo {
                name: "ethereum".to_string(),
                meta_info: String::new(),
                chain_id: CHAIN,
                finalization_blocks: 64,
                address_length: 20,
                signature_type: "secp256k1".to_string(),
            })
            .unwrap();
        ledger
            .register_asset(AssetInfo {
                name: "Tether USD".to_string(),
                meta_info: String::new(),
                chain_id: CHAIN,
                address: asset_address(),
                decimals: 6,
                total_supply: Decimal::from(1_000_000),
            })
            .unwrap();
        (ledger, temp_dir)
    }

    fn transfer(amount: i64, action: Action) -> DepositWithdrawParams {
        DepositWithdrawParams {
            chain_id: CHAIN,
            asset_address: asset_address(),
            staker_address: staker_address(),
            amount: Decimal::from(amount),
            action,
        }
    }

    fn ids() -> (StakerId, AssetId) {
        (
            derive_id(CHAIN, staker_address().as_bytes()),
            derive_id(CHAIN, asset_address().as_bytes()),
        )
    }

    #[test]
    fn test_deposit_updates_both_levels() {
        let (ledger, _temp) = create_test_ledger();
        let withdrawable = ledger
            .perform_deposit_or_withdraw(&transfer(100, Action::Deposit))
            .unwrap();
        assert_eq!(withdrawable, Decimal::from(100));

        let (staker, asset) = ids();
        let balance = ledger.get_staker_asset(&staker, &asset).unwrap();
        assert_eq!(balance.total_deposited, Decimal::from(100));
        assert_eq!(balance.withdrawable, Decimal::from(100));
        assert_eq!(
            ledger.registry().get_asset(&asset).unwrap().staking_total_amount,
            Decimal::from(100)
        );
        assert!(ledger.check_conservation(&asset).unwrap());
        assert_eq!(ledger.metrics().deposits_total.get(), 1);
    }

    #[test]
    fn test_negative_and_zero_amounts_rejected() {
        let (ledger, _temp) = create_test_ledger();
        assert!(matches!(
            ledger.perform_deposit_or_withdraw(&transfer(-1, Action::Deposit)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ledger.perform_deposit_or_withdraw(&transfer(0, Action::Deposit)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unregistered_asset() {
        let (ledger, _temp) = create_test_ledger();
        let mut params = transfer(10, Action::Deposit);
        params.asset_address = Address::new(vec![0xcc; 20]);
        assert!(matches!(
            ledger.perform_deposit_or_withdraw(&params),
            Err(Error::AssetNotRegistered(_))
        ));
    }

    #[test]
    fn test_overdraw_leaves_state_untouched() {
        let (ledger, _temp) = create_test_ledger();
        ledger
            .perform_deposit_or_withdraw(&transfer(100, Action::Deposit))
            .unwrap();
        let before = ledger.state_digest().unwrap();

        let result = ledger.perform_deposit_or_withdraw(&transfer(200, Action::Withdraw));
        assert!(matches!(result, Err(Error::InsufficientBalance(_))));
        assert_eq!(before, ledger.state_digest().unwrap());
        assert_eq!(
            ledger
                .metrics()
                .rejected_total
                .with_label_values(&["insufficient_balance"])
                .get(),
            1
        );
    }

    #[test]
    fn test_fractional_deposit_that_would_round_is_rejected() {
        let (ledger, _temp) = create_test_ledger();
        let big_asset = Address::new(vec![0xcc; 20]);
        let big_id = derive_id(CHAIN, big_asset.as_bytes());
        let ledger = ledger.with_price_oracle(Arc::new(
            StaticPriceOracle::new().with_quote(big_id.clone()),
        ));
        ledger
            .register_asset(AssetInfo {
                name: "Wide".to_string(),
                meta_info: String::new(),
                chain_id: CHAIN,
                address: big_asset.clone(),
                decimals: 0,
                total_supply: Decimal::MAX,
            })
            .unwrap();

        let mut params = transfer(1, Action::Deposit);
        params.asset_address = big_asset;
        params.amount = Decimal::from_i128_with_scale(10i128.pow(28), 0);
        ledger.perform_deposit_or_withdraw(&params).unwrap();
        let before = ledger.state_digest().unwrap();

        params.staker_address = Address::new(vec![0xdd; 20]);
        params.amount = Decimal::new(5, 1);
        assert!(matches!(
            ledger.perform_deposit_or_withdraw(&params),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(before, ledger.state_digest().unwrap());
        assert!(ledger.check_conservation(&big_id).unwrap());
    }

    #[test]
    fn test_native_asset_skips_balances() {
        let temp_dir = tempfile::tempdir().unwrap();
        let native = Address::new(vec![0xee; 20]);
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.native_asset_id = derive_id(CHAIN, native.as_bytes()).to_string();
        config.priced_assets = vec![config.native_asset_id.clone()];

        let ledger = Ledger::open(config).unwrap();
        ledger
            .register_client_chain(ClientChainInfo {
                name: "ethereum".to_string(),
                meta_info: String::new(),
                chain_id: CHAIN,
                finalization_blocks: 0,
                address_length: 20,
                signature_type: String::new(),
            })
            .unwrap();
        let asset_id = ledger
            .register_asset(AssetInfo {
                name: "ETH".to_string(),
                meta_info: String::new(),
                chain_id: CHAIN,
                address: native.clone(),
                decimals: 18,
                total_supply: Decimal::from(1_000),
            })
            .unwrap();

        let mut params = transfer(10, Action::Deposit);
        params.asset_address = native;
        assert_eq!(
            ledger.perform_deposit_or_withdraw(&params).unwrap(),
            Decimal::ZERO
        );
        assert_eq!(
            ledger.registry().get_asset(&asset_id).unwrap().staking_total_amount,
            Decimal::ZERO
        );
        assert!(ledger.storage().staker_balances(None).unwrap().is_empty());
    }

    #[test]
    fn test_operator_delta_roundtrip() {
        let (ledger, _temp) = create_test_ledger();
        let (_, asset) = ids();
        let operator: OperatorId = format!("0x{}", "01".repeat(20)).parse().unwrap();

        assert!(matches!(
            ledger.get_operator_asset(&operator, &asset),
            Err(Error::NotFound(_))
        ));

        let delta = OperatorAllocationDelta {
            total_amount: Decimal::from(50),
            operator_amount: Decimal::from(10),
            total_share: Decimal::new(500, 1),
            operator_share: Decimal::new(100, 1),
            ..Default::default()
        };
        ledger
            .update_operator_asset_state(&operator, &asset, &delta)
            .unwrap();

        let listed = ledger.operator_assets(&operator).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.total_amount, Decimal::from(50));

        let overdraw = OperatorAllocationDelta {
            total_amount: Decimal::from(-60),
            ..Default::default()
        };
        assert!(matches!(
            ledger.update_operator_asset_state(&operator, &asset, &overdraw),
            Err(Error::InsufficientBalance(_))
        ));
    }

    #[test]
    fn test_staker_delta_requires_registered_asset() {
        let (ledger, _temp) = create_test_ledger();
        let (staker, _) = ids();
        let unknown = derive_id(CHAIN, &[0x99; 20]);
        assert!(matches!(
            ledger.update_staker_asset_state(&staker, &unknown, &StakerBalanceDelta::default()),
            Err(Error::AssetNotRegistered(_))
        ));
    }

    #[test]
    fn test_params_validation() {
        let (ledger, _temp) = create_test_ledger();
        let bad = Params {
            gateway_address: Some(Address::new(vec![1; 19])),
        };
        assert!(matches!(ledger.set_params(&bad), Err(Error::InvalidInput(_))));

        let good = Params {
            gateway_address: Some(Address::new(vec![1; 20])),
        };
        ledger.set_params(&good).unwrap();
        assert_eq!(ledger.params().unwrap(), good);
    }
}
