// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use anyhow::anyhow;
use parity_db::{CompressionType, Db, Options};
use parking_lot::Mutex;
use strum::{Display, EnumIter, FromRepr, IntoEnumIterator};
use tracing::debug;

use super::{SectorStore, StoreError};
use crate::sealing::SectorInfo;
use crate::shim::sector::SectorNumber;

const NEXT_SECTOR_NUMBER_KEY: &[u8] = b"next_sector_number";

#[derive(Copy, Clone, Debug, Display, PartialEq, FromRepr, EnumIter)]
#[repr(u8)]
enum DbColumn {
    /// CBOR-encoded sector records keyed by big-endian sector number.
    Sectors,
    /// Counters and other miner-local settings.
    Settings,
}

impl DbColumn {
    fn create_column_options(compression: CompressionType) -> Vec<parity_db::ColumnOptions> {
        DbColumn::iter()
            .map(|_| parity_db::ColumnOptions {
                // records are overwritten in place
                preimage: false,
                // needed for iteration
                btree_index: true,
                compression,
                ..Default::default()
            })
            .collect()
    }
}

pub struct ParityDbSectorStore {
    db: Db,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl ParityDbSectorStore {
    fn to_options(path: PathBuf) -> Options {
        Options {
            path,
            sync_wal: true,
            sync_data: true,
            stats: false,
            salt: None,
            columns: DbColumn::create_column_options(CompressionType::Lz4),
            compression_threshold: [(0, 128)].into_iter().collect(),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let opts = Self::to_options(path.into());
        debug!(path = %opts.path.display(), "opening sector store");
        Ok(Self {
            db: Db::open_or_create(&opts)?,
            write_lock: Mutex::new(()),
        })
    }

    fn read(&self, column: DbColumn, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db
            .get(column as u8, key)
            .map_err(|e| StoreError::backend(anyhow!("error from column {column}: {e}")))
    }

    fn write(&self, column: DbColumn, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        let tx = [(column as u8, key, Some(value))];
        self.db
            .commit(tx)
            .map_err(|e| StoreError::backend(anyhow!("error writing to column {column}: {e}")))
    }

    fn decode(bytes: &[u8]) -> Result<SectorInfo, StoreError> {
        fvm_ipld_encoding::from_slice(bytes).map_err(StoreError::backend)
    }

    fn encode(info: &SectorInfo) -> Result<Vec<u8>, StoreError> {
        fvm_ipld_encoding::to_vec(info).map_err(StoreError::backend)
    }
}

impl SectorStore for ParityDbSectorStore {
    fn get(&self, number: SectorNumber) -> Result<Option<SectorInfo>, StoreError> {
        self.read(DbColumn::Sectors, &number.to_be_bytes())?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    fn put(&self, info: &SectorInfo) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let key = info.sector_number.to_be_bytes();
        if self.read(DbColumn::Sectors, &key)?.is_some() {
            return Err(StoreError::AlreadyExists(info.sector_number));
        }
        self.write(DbColumn::Sectors, &key, Self::encode(info)?)
    }

    fn update(
        &self,
        number: SectorNumber,
        f: &mut dyn FnMut(&mut SectorInfo) -> anyhow::Result<()>,
    ) -> Result<SectorInfo, StoreError> {
        let _guard = self.write_lock.lock();
        let key = number.to_be_bytes();
        let mut info = self
            .get(number)?
            .ok_or(StoreError::NotFound(number))?;
        f(&mut info).map_err(StoreError::Rejected)?;
        self.write(DbColumn::Sectors, &key, Self::encode(&info)?)?;
        Ok(info)
    }

    fn for_each(
        &self,
        f: &mut dyn FnMut(&SectorInfo) -> anyhow::Result<()>,
    ) -> Result<(), StoreError> {
        let mut iter = self
            .db
            .iter(DbColumn::Sectors as u8)
            .map_err(StoreError::backend)?;
        while let Some((_, value)) = iter.next().map_err(StoreError::backend)? {
            f(&Self::decode(&value)?).map_err(StoreError::Rejected)?;
        }
        Ok(())
    }

    fn next_sector_number(&self) -> Result<SectorNumber, StoreError> {
        let _guard = self.write_lock.lock();
        let next = match self.read(DbColumn::Settings, NEXT_SECTOR_NUMBER_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::backend(anyhow!("corrupt sector number counter"))
                })?;
                SectorNumber::from_be_bytes(bytes)
            }
            None => 0,
        };
        self.write(
            DbColumn::Settings,
            NEXT_SECTOR_NUMBER_KEY,
            (next + 1).to_be_bytes().to_vec(),
        )?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sealing::SectorState;
    use crate::shim::sector::RegisteredSealProof;

    #[test]
    fn parity_db_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParityDbSectorStore::open(dir.path()).unwrap();
        super::super::tests::exercise(&store);
    }

    #[test]
    fn records_and_counter_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ParityDbSectorStore::open(dir.path()).unwrap();
            let number = store.next_sector_number().unwrap();
            let mut info =
                SectorInfo::new(number, RegisteredSealProof::StackedDRG2KiBV1P1, vec![]);
            info.state = SectorState::WaitSeed;
            store.put(&info).unwrap();
        }
        let store = ParityDbSectorStore::open(dir.path()).unwrap();
        assert_eq!(store.get(0).unwrap().unwrap().state, SectorState::WaitSeed);
        assert_eq!(store.next_sector_number().unwrap(), 1);
    }
}
