//! Client chain and asset registry

use crate::{
    error::{Error, Result},
    identifier::AssetId,
    storage::Storage,
    types::{AssetInfo, ClientChainInfo, StakingAssetInfo},
};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Price feed collaborator; assets without a quote cannot be registered
pub trait PriceOracle: Send + Sync {
    /// True if a price is available for the asset
    fn has_price(&self, asset_id: &AssetId) -> bool;
}

/// Oracle backed by a fixed set of quoted asset ids
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    quoted: BTreeSet<AssetId>,
}

impl StaticPriceOracle {
    /// Oracle with no quotes
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a quote
    pub fn with_quote(mut self, asset_id: AssetId) -> Self {
        self.quoted.insert(asset_id);
        self
    }

    /// Build from canonical asset id strings
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self> {
        let quoted = ids
            .iter()
            .map(|id| id.as_ref().parse())
            .collect::<Result<BTreeSet<AssetId>>>()?;
        Ok(Self { quoted })
    }
}

impl PriceOracle for StaticPriceOracle {
    fn has_price(&self, asset_id: &AssetId) -> bool {
        self.quoted.contains(asset_id)
    }
}

/// Registration and lookup of chains and assets
pub struct Registry {
    storage: Arc<Storage>,
    oracle: Arc<dyn PriceOracle>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Registry over `storage`, quoting through `oracle`
    pub fn new(storage: Arc<Storage>, oracle: Arc<dyn PriceOracle>) -> Self {
        Self { storage, oracle }
    }

    /// Swap the price oracle
    pub fn set_price_oracle(&mut self, oracle: Arc<dyn PriceOracle>) {
        self.oracle = oracle;
    }

    /// Upsert a client chain (last write wins)
    pub fn register_client_chain(&self, info: ClientChainInfo) -> Result<()> {
        if info.name.is_empty() {
            return Err(Error::InvalidInput("client chain name is empty".to_string()));
        }
        if info.address_length == 0 {
            return Err(Error::InvalidInput(format!(
                "client chain {} has zero address length",
                info.chain_id
            )));
        }

        self.storage.put_client_chain(&info)?;

        tracing::info!(
            chain_id = info.chain_id,
            name = %info.name,
            address_length = info.address_length,
            "Client chain registered"
        );
        Ok(())
    }

    /// Register a new asset with a zero staked total
    ///
    /// The asset's chain must be registered, its address must have the chain's
    /// address length, and the price oracle must already quote it. An asset id
    /// can be registered only once.
    pub fn register_asset(&self, asset: AssetInfo) -> Result<AssetId> {
        let chain = self.get_client_chain(asset.chain_id)?;
        if asset.address.len() != chain.address_length as usize {
            return Err(Error::InvalidInput(format!(
                "asset address {} is {} bytes, chain {} expects {}",
                asset.address,
                asset.address.len(),
                chain.chain_id,
                chain.address_length
            )));
        }
        if asset.total_supply <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "asset total supply must be positive, got {}",
                asset.total_supply
            )));
        }

        let asset_id = asset.asset_id();
        if self.is_registered_asset(&asset_id)? {
            return Err(Error::DuplicateRegistration(asset_id.to_string()));
        }
        if !self.oracle.has_price(&asset_id) {
            return Err(Error::NotFound(format!("no price quote for asset {}", asset_id)));
        }

        self.storage.put_staking_asset(&StakingAssetInfo {
            asset_basic_info: asset,
            staking_total_amount: Decimal::ZERO,
        })?;

        tracing::info!(asset_id = %asset_id, "Asset registered");
        Ok(asset_id)
    }

    /// True if the asset is in the registry
    pub fn is_registered_asset(&self, asset_id: &AssetId) -> Result<bool> {
        Ok(self.storage.get_staking_asset(asset_id)?.is_some())
    }

    /// True if the chain is in the registry
    pub fn is_registered_client_chain(&self, chain_id: u64) -> Result<bool> {
        Ok(self.storage.get_client_chain(chain_id)?.is_some())
    }

    /// Chain descriptor
    pub fn get_client_chain(&self, chain_id: u64) -> Result<ClientChainInfo> {
        self.storage
            .get_client_chain(chain_id)?
            .ok_or_else(|| Error::NotFound(format!("client chain {}", chain_id)))
    }

    /// Registered chain ids, ascending
    pub fn list_client_chains(&self) -> Result<Vec<u64>> {
        Ok(self
            .storage
            .client_chains()?
            .into_iter()
            .map(|c| c.chain_id)
            .collect())
    }

    /// All chain descriptors, ascending by id
    pub fn client_chains(&self) -> Result<Vec<ClientChainInfo>> {
        self.storage.client_chains()
    }

    /// Asset record
    pub fn get_asset(&self, asset_id: &AssetId) -> Result<StakingAssetInfo> {
        self.storage
            .get_staking_asset(asset_id)?
            .ok_or_else(|| Error::NotFound(format!("asset {}", asset_id)))
    }

    /// All asset records
    pub fn all_assets(&self) -> Result<Vec<StakingAssetInfo>> {
        self.storage.staking_assets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{derive_id, Address};
    use crate::Config;
    use tempfile::TempDir;

    fn test_registry(oracle: StaticPriceOracle) -> (Registry, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        (Registry::new(storage, Arc::new(oracle)), temp_dir)
    }

    fn chain(chain_id: u64, name: &str) -> ClientChainInfo {
        ClientChainInfo {
            name: name.to_string(),
            meta_info: String::new(),
            chain_id,
            finalization_blocks: 12,
            address_length: 20,
            signature_type: "secp256k1".to_string(),
        }
    }

    fn asset(chain_id: u64, byte: u8, len: usize) -> AssetInfo {
        AssetInfo {
            name: "Token".to_string(),
            meta_info: String::new(),
            chain_id,
            address: Address::new(vec![byte; len]),
            decimals: 18,
            total_supply: Decimal::from(1_000_000),
        }
    }

    #[test]
    fn test_register_chain_validation() {
        let (registry, _temp) = test_registry(StaticPriceOracle::new());

        assert!(matches!(
            registry.register_client_chain(chain(1, "")),
            Err(Error::InvalidInput(_))
        ));

        let mut zero_len = chain(1, "eth");
        zero_len.address_length = 0;
        assert!(matches!(
            registry.register_client_chain(zero_len),
            Err(Error::InvalidInput(_))
        ));
        assert!(!registry.is_registered_client_chain(1).unwrap());
    }

    #[test]
    fn test_reregister_chain_overwrites_only_that_chain() {
        let (registry, _temp) = test_registry(StaticPriceOracle::new());
        registry.register_client_chain(chain(1, "eth")).unwrap();
        registry.register_client_chain(chain(2, "arb")).unwrap();

        let mut updated = chain(1, "ethereum");
        updated.finalization_blocks = 64;
        registry.register_client_chain(updated.clone()).unwrap();

        assert_eq!(registry.get_client_chain(1).unwrap(), updated);
        assert_eq!(registry.get_client_chain(2).unwrap(), chain(2, "arb"));
        assert_eq!(registry.list_client_chains().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_unknown_chain_not_found() {
        let (registry, _temp) = test_registry(StaticPriceOracle::new());
        assert!(matches!(registry.get_client_chain(7), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_register_asset_requires_price() {
        let (registry, _temp) = test_registry(StaticPriceOracle::new());
        registry.register_client_chain(chain(101, "eth")).unwrap();

        let result = registry.register_asset(asset(101, 0xaa, 20));
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!registry
            .is_registered_asset(&derive_id(101, &[0xaa; 20]))
            .unwrap());
    }

    #[test]
    fn test_register_asset() {
        let id = derive_id(101, &[0xaa; 20]);
        let (registry, _temp) = test_registry(StaticPriceOracle::new().with_quote(id.clone()));
        registry.register_client_chain(chain(101, "eth")).unwrap();

        let registered = registry.register_asset(asset(101, 0xaa, 20)).unwrap();
        assert_eq!(registered, id);
        assert!(registry.is_registered_asset(&id).unwrap());
        assert_eq!(
            registry.get_asset(&id).unwrap().staking_total_amount,
            Decimal::ZERO
        );
    }

    #[test]
    fn test_register_asset_twice_rejected() {
        let id = derive_id(101, &[0xaa; 20]);
        let (registry, _temp) = test_registry(StaticPriceOracle::new().with_quote(id.clone()));
        registry.register_client_chain(chain(101, "eth")).unwrap();
        registry.register_asset(asset(101, 0xaa, 20)).unwrap();
        let stored = registry.get_asset(&id).unwrap();

        let mut renamed = asset(101, 0xaa, 20);
        renamed.name = "Renamed".to_string();
        renamed.decimals = 6;
        assert!(matches!(
            registry.register_asset(renamed),
            Err(Error::DuplicateRegistration(_))
        ));
        assert_eq!(registry.get_asset(&id).unwrap(), stored);
    }

    #[test]
    fn test_register_asset_checks_chain_and_length() {
        let id = derive_id(101, &[0xaa; 32]);
        let (registry, _temp) = test_registry(StaticPriceOracle::new().with_quote(id));

        assert!(matches!(
            registry.register_asset(asset(101, 0xaa, 32)),
            Err(Error::NotFound(_))
        ));

        registry.register_client_chain(chain(101, "eth")).unwrap();
        assert!(matches!(
            registry.register_asset(asset(101, 0xaa, 32)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_oracle_from_ids() {
        let oracle = StaticPriceOracle::from_ids(&["0xaa_0x65"]).unwrap();
        assert!(oracle.has_price(&derive_id(101, &[0xaa])));
        assert!(StaticPriceOracle::from_ids(&["garbage"]).is_err());
    }
}
