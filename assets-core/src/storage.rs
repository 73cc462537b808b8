//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `params` - Module parameters (single key)
//! - `client_chains` - Client chain descriptors (key: chain_id, big-endian)
//! - `assets` - Staking asset records (key: asset_id)
//! - `staker_assets` - Staker balances (key: staker_id/asset_id)
//! - `operator_assets` - Operator allocations (key: operator_id/asset_id)
//!
//! Values are bincode. Multi-record updates go through [`WriteSet`], which
//! commits as one RocksDB write batch.

use crate::{
    error::{Error, Result},
    identifier::{join_key, parse_join_key, AssetId, OperatorId, StakerId, KEY_SEPARATOR},
    types::{ClientChainInfo, OperatorAllocation, Params, StakerBalance, StakingAssetInfo},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, Options,
    SingleThreaded, WriteBatch,
};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Column family names
const CF_PARAMS: &str = "params";
const CF_CLIENT_CHAINS: &str = "client_chains";
const CF_ASSETS: &str = "assets";
const CF_STAKER_ASSETS: &str = "staker_assets";
const CF_OPERATOR_ASSETS: &str = "operator_assets";

/// Digest order
const ALL_CFS: [&str; 5] = [
    CF_PARAMS,
    CF_CLIENT_CHAINS,
    CF_ASSETS,
    CF_STAKER_ASSETS,
    CF_OPERATOR_ASSETS,
];

const PARAMS_KEY: &[u8] = b"params";

type Db = DBWithThreadMode<SingleThreaded>;

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Db,
    path: PathBuf,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage").field("path", &self.path).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options()))
            .collect::<Vec<_>>();

        let db = Db::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, column_families = ALL_CFS.len(), "Opened RocksDB");

        Ok(Self {
            db,
            path: path.clone(),
        })
    }

    fn cf_options() -> Options {
        let mut opts = Options::default();
        // Balances are read on every mutation
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_value<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All entries whose key starts with `prefix`, in key order
    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>> {
        let cf = self.cf_handle(cf)?;
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix, Direction::Forward)
        };

        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), bincode::deserialize(&value)?));
        }
        Ok(out)
    }

    /// Start a set of writes that commit together
    pub fn write_set(&self) -> WriteSet<'_> {
        WriteSet {
            storage: self,
            batch: WriteBatch::default(),
        }
    }

    // Params

    /// Stored params, default if never set
    pub fn get_params(&self) -> Result<Params> {
        Ok(self.get_value(CF_PARAMS, PARAMS_KEY)?.unwrap_or_default())
    }

    /// Replace params
    pub fn put_params(&self, params: &Params) -> Result<()> {
        let mut set = self.write_set();
        set.put_params(params)?;
        set.commit()
    }

    // Client chains

    /// Chain descriptor by id
    pub fn get_client_chain(&self, chain_id: u64) -> Result<Option<ClientChainInfo>> {
        self.get_value(CF_CLIENT_CHAINS, &chain_id.to_be_bytes())
    }

    /// Upsert chain descriptor
    pub fn put_client_chain(&self, info: &ClientChainInfo) -> Result<()> {
        let mut set = self.write_set();
        set.put_client_chain(info)?;
        set.commit()
    }

    /// All chains, ascending by id
    pub fn client_chains(&self) -> Result<Vec<ClientChainInfo>> {
        Ok(self
            .scan(CF_CLIENT_CHAINS, &[])?
            .into_iter()
            .map(|(_, info)| info)
            .collect())
    }

    // Assets

    /// Asset record by id
    pub fn get_staking_asset(&self, asset_id: &AssetId) -> Result<Option<StakingAssetInfo>> {
        self.get_value(CF_ASSETS, asset_id.to_string().as_bytes())
    }

    /// Upsert asset record
    pub fn put_staking_asset(&self, asset: &StakingAssetInfo) -> Result<()> {
        let mut set = self.write_set();
        set.put_staking_asset(asset)?;
        set.commit()
    }

    /// All asset records, in asset id order
    pub fn staking_assets(&self) -> Result<Vec<StakingAssetInfo>> {
        Ok(self
            .scan(CF_ASSETS, &[])?
            .into_iter()
            .map(|(_, asset)| asset)
            .collect())
    }

    // Staker balances

    /// Stored balance, if any
    pub fn get_staker_balance(
        &self,
        staker_id: &StakerId,
        asset_id: &AssetId,
    ) -> Result<Option<StakerBalance>> {
        self.get_value(CF_STAKER_ASSETS, &staker_key(staker_id, asset_id)?)
    }

    /// Stored balance, zero if absent
    pub fn staker_balance_or_default(
        &self,
        staker_id: &StakerId,
        asset_id: &AssetId,
    ) -> Result<StakerBalance> {
        Ok(self.get_staker_balance(staker_id, asset_id)?.unwrap_or_default())
    }

    /// Balances of one staker, or of everyone
    pub fn staker_balances(
        &self,
        staker_id: Option<&StakerId>,
    ) -> Result<Vec<(StakerId, AssetId, StakerBalance)>> {
        let prefix = owner_prefix(staker_id);
        self.scan(CF_STAKER_ASSETS, &prefix)?
            .into_iter()
            .map(|(key, balance)| -> Result<(StakerId, AssetId, StakerBalance)> {
                let (staker, asset) = split_balance_key(&key)?;
                Ok((staker.parse()?, asset.parse()?, balance))
            })
            .collect()
    }

    // Operator allocations

    /// Stored allocation, if any
    pub fn get_operator_allocation(
        &self,
        operator: &OperatorId,
        asset_id: &AssetId,
    ) -> Result<Option<OperatorAllocation>> {
        self.get_value(CF_OPERATOR_ASSETS, &operator_key(operator, asset_id)?)
    }

    /// Stored allocation, zero if absent
    pub fn operator_allocation_or_default(
        &self,
        operator: &OperatorId,
        asset_id: &AssetId,
    ) -> Result<OperatorAllocation> {
        Ok(self
            .get_operator_allocation(operator, asset_id)?
            .unwrap_or_default())
    }

    /// Allocations of one operator, or of everyone
    pub fn operator_allocations(
        &self,
        operator: Option<&OperatorId>,
    ) -> Result<Vec<(OperatorId, AssetId, OperatorAllocation)>> {
        let prefix = owner_prefix(operator);
        self.scan(CF_OPERATOR_ASSETS, &prefix)?
            .into_iter()
            .map(|(key, allocation)| -> Result<(OperatorId, AssetId, OperatorAllocation)> {
                let (operator, asset) = split_balance_key(&key)?;
                Ok((operator.parse()?, asset.parse()?, allocation))
            })
            .collect()
    }

    /// SHA-256 over every key and value, column family by column family
    pub fn state_digest(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        for name in ALL_CFS {
            let cf = self.cf_handle(name)?;
            hasher.update(name.as_bytes());
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                let (key, value) = item?;
                hasher.update((key.len() as u64).to_be_bytes());
                hasher.update(&key);
                hasher.update((value.len() as u64).to_be_bytes());
                hasher.update(&value);
            }
        }
        Ok(hasher.finalize().into())
    }
}

/// Pending writes, committed atomically
pub struct WriteSet<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
}

impl fmt::Debug for WriteSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSet")
            .field("len", &self.batch.len())
            .finish()
    }
}

impl WriteSet<'_> {
    fn put<T: Serialize>(&mut self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.storage.cf_handle(cf)?;
        self.batch.put_cf(cf, key, bincode::serialize(value)?);
        Ok(())
    }

    /// Stage params
    pub fn put_params(&mut self, params: &Params) -> Result<()> {
        self.put(CF_PARAMS, PARAMS_KEY, params)
    }

    /// Stage a chain descriptor
    pub fn put_client_chain(&mut self, info: &ClientChainInfo) -> Result<()> {
        self.put(CF_CLIENT_CHAINS, &info.chain_id.to_be_bytes(), info)
    }

    /// Stage an asset record
    pub fn put_staking_asset(&mut self, asset: &StakingAssetInfo) -> Result<()> {
        let key = asset.asset_basic_info.asset_id().to_string();
        self.put(CF_ASSETS, key.as_bytes(), asset)
    }

    /// Stage a staker balance
    pub fn put_staker_balance(
        &mut self,
        staker_id: &StakerId,
        asset_id: &AssetId,
        balance: &StakerBalance,
    ) -> Result<()> {
        self.put(CF_STAKER_ASSETS, &staker_key(staker_id, asset_id)?, balance)
    }

    /// Stage an operator allocation
    pub fn put_operator_allocation(
        &mut self,
        operator: &OperatorId,
        asset_id: &AssetId,
        allocation: &OperatorAllocation,
    ) -> Result<()> {
        self.put(
            CF_OPERATOR_ASSETS,
            &operator_key(operator, asset_id)?,
            allocation,
        )
    }

    /// Number of staged writes
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// True if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Write everything or nothing
    pub fn commit(self) -> Result<()> {
        self.storage.db.write(self.batch)?;
        Ok(())
    }
}

fn staker_key(staker_id: &StakerId, asset_id: &AssetId) -> Result<Vec<u8>> {
    join_key(&[&staker_id.to_string(), &asset_id.to_string()])
}

fn operator_key(operator: &OperatorId, asset_id: &AssetId) -> Result<Vec<u8>> {
    join_key(&[&operator.to_string(), &asset_id.to_string()])
}

fn owner_prefix<T: fmt::Display>(owner: Option<&T>) -> Vec<u8> {
    owner
        .map(|o| format!("{}{}", o, KEY_SEPARATOR).into_bytes())
        .unwrap_or_default()
}

fn split_balance_key(key: &[u8]) -> Result<(String, String)> {
    let mut parts = parse_join_key(key, 2)?.into_iter();
    match (parts.next(), parts.next()) {
        (Some(owner), Some(asset)) => Ok((owner, asset)),
        _ => Err(Error::MalformedKey(String::from_utf8_lossy(key).into_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{derive_id, Address};
    use crate::types::AssetInfo;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn chain(chain_id: u64) -> ClientChainInfo {
        ClientChainInfo {
            name: format!("chain-{}", chain_id),
            meta_info: String::new(),
            chain_id,
            finalization_blocks: 10,
            address_length: 20,
            signature_type: "secp256k1".to_string(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        for name in ALL_CFS {
            assert!(storage.db.cf_handle(name).is_some());
        }
    }

    #[test]
    fn test_params_default_then_put() {
        let (storage, _temp) = test_storage();
        assert_eq!(storage.get_params().unwrap(), Params::default());

        let params = Params {
            gateway_address: Some(Address::new(vec![9; 20])),
        };
        storage.put_params(&params).unwrap();
        assert_eq!(storage.get_params().unwrap(), params);
    }

    #[test]
    fn test_client_chains_ordered() {
        let (storage, _temp) = test_storage();
        storage.put_client_chain(&chain(300)).unwrap();
        storage.put_client_chain(&chain(2)).unwrap();
        storage.put_client_chain(&chain(101)).unwrap();

        let ids: Vec<u64> = storage
            .client_chains()
            .unwrap()
            .iter()
            .map(|c| c.chain_id)
            .collect();
        assert_eq!(ids, vec![2, 101, 300]);
        assert!(storage.get_client_chain(5).unwrap().is_none());
    }

    #[test]
    fn test_staking_asset_roundtrip() {
        let (storage, _temp) = test_storage();
        let asset = StakingAssetInfo {
            asset_basic_info: AssetInfo {
                name: "USDC".to_string(),
                meta_info: String::new(),
                chain_id: 101,
                address: Address::new(vec![0xaa; 20]),
                decimals: 6,
                total_supply: Decimal::from(1_000),
            },
            staking_total_amount: Decimal::ZERO,
        };
        storage.put_staking_asset(&asset).unwrap();

        let id = asset.asset_basic_info.asset_id();
        assert_eq!(storage.get_staking_asset(&id).unwrap(), Some(asset));
    }

    #[test]
    fn test_balance_get_or_default() {
        let (storage, _temp) = test_storage();
        let staker = derive_id(101, &[0xbb; 20]);
        let asset = derive_id(101, &[0xaa; 20]);

        assert!(storage.get_staker_balance(&staker, &asset).unwrap().is_none());
        assert_eq!(
            storage.staker_balance_or_default(&staker, &asset).unwrap(),
            StakerBalance::default()
        );
    }

    #[test]
    fn test_prefix_scan_per_staker() {
        let (storage, _temp) = test_storage();
        let staker_a = derive_id(1, &[0x0a; 20]);
        let staker_b = derive_id(1, &[0x0b; 20]);
        let asset_1 = derive_id(1, &[0x01; 20]);
        let asset_2 = derive_id(1, &[0x02; 20]);
        let balance = StakerBalance {
            total_deposited: Decimal::from(5),
            withdrawable: Decimal::from(5),
            pending_undelegation: Decimal::ZERO,
        };

        let mut set = storage.write_set();
        set.put_staker_balance(&staker_a, &asset_1, &balance).unwrap();
        set.put_staker_balance(&staker_a, &asset_2, &balance).unwrap();
        set.put_staker_balance(&staker_b, &asset_1, &balance).unwrap();
        assert_eq!(set.len(), 3);
        set.commit().unwrap();

        let a = storage.staker_balances(Some(&staker_a)).unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|(s, _, _)| *s == staker_a));

        assert_eq!(storage.staker_balances(None).unwrap().len(), 3);
    }

    #[test]
    fn test_operator_allocation_scan() {
        let (storage, _temp) = test_storage();
        let operator: OperatorId = format!("0x{}", "11".repeat(20)).parse().unwrap();
        let asset = derive_id(1, &[0x01; 20]);
        let allocation = OperatorAllocation {
            total_amount: Decimal::from(3),
            ..Default::default()
        };

        let mut set = storage.write_set();
        set.put_operator_allocation(&operator, &asset, &allocation).unwrap();
        set.commit().unwrap();

        let all = storage.operator_allocations(Some(&operator)).unwrap();
        assert_eq!(all, vec![(operator.clone(), asset.clone(), allocation)]);
    }

    #[test]
    fn test_digest_tracks_content() {
        let (storage, _temp) = test_storage();
        let empty = storage.state_digest().unwrap();
        assert_eq!(empty, storage.state_digest().unwrap());

        storage.put_client_chain(&chain(1)).unwrap();
        assert_ne!(empty, storage.state_digest().unwrap());
    }
}
