//! Bridge call surface
//!
//! The relay delivers decoded calls together with the calling account.
//! Mutating calls are only accepted from the gateway configured in
//! [`Params`]; read-only calls are open to anyone.

use crate::{
    error::{Error, Result},
    identifier::{Address, AssetId},
    ledger::Ledger,
    types::{Action, AssetInfo, ClientChainInfo, DepositWithdrawParams, Params},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Deposit or withdraw payload as delivered by the relay
///
/// Addresses may be padded to a fixed word size; only the chain's address
/// length is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPayload {
    /// Originating chain
    pub chain_id: u64,
    /// Token address, possibly padded
    pub asset_address: Address,
    /// Depositor address, possibly padded
    pub staker_address: Address,
    /// Unsigned amount
    pub amount: Decimal,
}

/// Decoded bridge call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BridgeCall {
    Deposit(TransferPayload),
    Withdraw(TransferPayload),
    RegisterClientChain {
        chain_id: u64,
        address_length: u32,
        name: String,
        meta_info: String,
        signature_type: String,
    },
    RegisterAsset {
        chain_id: u64,
        token_address: Address,
        decimals: u32,
        supply_cap: Decimal,
        name: String,
        meta_info: String,
    },
    GetClientChains,
    IsRegisteredClientChain {
        chain_id: u64,
    },
}

impl BridgeCall {
    /// Decode a transfer that carries its direction as a raw action code
    pub fn transfer(action_code: u8, payload: TransferPayload) -> Result<Self> {
        Ok(match Action::try_from(action_code)? {
            Action::Deposit => BridgeCall::Deposit(payload),
            Action::Withdraw => BridgeCall::Withdraw(payload),
        })
    }

    /// Call name for logs
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCall::Deposit(_) => "deposit",
            BridgeCall::Withdraw(_) => "withdraw",
            BridgeCall::RegisterClientChain { .. } => "register_client_chain",
            BridgeCall::RegisterAsset { .. } => "register_asset",
            BridgeCall::GetClientChains => "get_client_chains",
            BridgeCall::IsRegisteredClientChain { .. } => "is_registered_client_chain",
        }
    }

    /// True if the call changes state
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            BridgeCall::GetClientChains | BridgeCall::IsRegisteredClientChain { .. }
        )
    }
}

/// Successful bridge call result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeResponse {
    /// Staker's withdrawable amount after a deposit or withdrawal
    Withdrawable(Decimal),
    /// Chain stored
    ClientChainRegistered,
    /// Asset stored under this id
    AssetRegistered(AssetId),
    /// Registered chain ids, ascending
    ClientChains(Vec<u64>),
    /// Chain registration status
    IsRegistered(bool),
}

/// Only the configured gateway may mutate
pub fn ensure_gateway(params: &Params, caller: &Address) -> Result<()> {
    match &params.gateway_address {
        Some(gateway) if gateway == caller => Ok(()),
        Some(_) => Err(Error::Unauthorized(format!(
            "caller {} is not the gateway",
            caller
        ))),
        None => Err(Error::Unauthorized("no gateway configured".to_string())),
    }
}

impl Ledger {
    /// Dispatch one bridge call on behalf of `caller`
    pub fn handle_bridge_call(&self, caller: &Address, call: BridgeCall) -> Result<BridgeResponse> {
        let name = call.name();
        let result = self.dispatch_bridge_call(caller, call);
        match &result {
            Ok(_) => tracing::debug!(call = name, caller = %caller, "Bridge call handled"),
            Err(e) => tracing::warn!(call = name, caller = %caller, error = %e, "Bridge call rejected"),
        }
        result
    }

    fn dispatch_bridge_call(&self, caller: &Address, call: BridgeCall) -> Result<BridgeResponse> {
        if call.is_mutating() {
            let params = self.params()?;
            self.observe(ensure_gateway(&params, caller))?;
        }

        match call {
            BridgeCall::Deposit(payload) => self.bridge_transfer(payload, Action::Deposit),
            BridgeCall::Withdraw(payload) => self.bridge_transfer(payload, Action::Withdraw),
            BridgeCall::RegisterClientChain {
                chain_id,
                address_length,
                name,
                meta_info,
                signature_type,
            } => {
                self.register_client_chain(ClientChainInfo {
                    name,
                    meta_info,
                    chain_id,
                    finalization_blocks: 0,
                    address_length,
                    signature_type,
                })?;
                Ok(BridgeResponse::ClientChainRegistered)
            }
            BridgeCall::RegisterAsset {
                chain_id,
                token_address,
                decimals,
                supply_cap,
                name,
                meta_info,
            } => {
                let address = self.observe(self.chain_address(chain_id, &token_address))?;
                let asset_id = self.register_asset(AssetInfo {
                    name,
                    meta_info,
                    chain_id,
                    address,
                    decimals,
                    total_supply: supply_cap,
                })?;
                Ok(BridgeResponse::AssetRegistered(asset_id))
            }
            BridgeCall::GetClientChains => Ok(BridgeResponse::ClientChains(
                self.registry().list_client_chains()?,
            )),
            BridgeCall::IsRegisteredClientChain { chain_id } => Ok(BridgeResponse::IsRegistered(
                self.registry().is_registered_client_chain(chain_id)?,
            )),
        }
    }

    fn bridge_transfer(&self, payload: TransferPayload, action: Action) -> Result<BridgeResponse> {
        let asset_address = self.observe(self.chain_address(payload.chain_id, &payload.asset_address))?;
        let staker_address =
            self.observe(self.chain_address(payload.chain_id, &payload.staker_address))?;

        let withdrawable = self.perform_deposit_or_withdraw(&DepositWithdrawParams {
            chain_id: payload.chain_id,
            asset_address,
            staker_address,
            amount: payload.amount,
            action,
        })?;
        Ok(BridgeResponse::Withdrawable(withdrawable))
    }

    /// Strip payload padding down to the chain's address length
    fn chain_address(&self, chain_id: u64, raw: &Address) -> Result<Address> {
        let chain = self.registry().get_client_chain(chain_id)?;
        raw.truncated(chain.address_length as usize)
    }
}
