// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock};

use super::{SectorStore, StoreError};
use crate::sealing::SectorInfo;
use crate::shim::sector::SectorNumber;

#[derive(Debug, Default)]
pub struct MemorySectorStore {
    sectors: RwLock<BTreeMap<SectorNumber, SectorInfo>>,
    next_number: Mutex<SectorNumber>,
}

impl SectorStore for MemorySectorStore {
    fn get(&self, number: SectorNumber) -> Result<Option<SectorInfo>, StoreError> {
        Ok(self.sectors.read().get(&number).cloned())
    }

    fn put(&self, info: &SectorInfo) -> Result<(), StoreError> {
        let mut sectors = self.sectors.write();
        if sectors.contains_key(&info.sector_number) {
            return Err(StoreError::AlreadyExists(info.sector_number));
        }
        sectors.insert(info.sector_number, info.clone());
        Ok(())
    }

    fn update(
        &self,
        number: SectorNumber,
        f: &mut dyn FnMut(&mut SectorInfo) -> anyhow::Result<()>,
    ) -> Result<SectorInfo, StoreError> {
        let mut sectors = self.sectors.write();
        let current = sectors.get_mut(&number).ok_or(StoreError::NotFound(number))?;
        let mut next = current.clone();
        f(&mut next).map_err(StoreError::Rejected)?;
        *current = next.clone();
        Ok(next)
    }

    fn for_each(
        &self,
        f: &mut dyn FnMut(&SectorInfo) -> anyhow::Result<()>,
    ) -> Result<(), StoreError> {
        for info in self.sectors.read().values() {
            f(info).map_err(StoreError::Rejected)?;
        }
        Ok(())
    }

    fn next_sector_number(&self) -> Result<SectorNumber, StoreError> {
        let mut next = self.next_number.lock();
        let number = *next;
        *next += 1;
        Ok(number)
    }
}
