// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod memory;
mod parity_db;

pub use self::memory::MemorySectorStore;
pub use self::parity_db::ParityDbSectorStore;

use crate::sealing::SectorInfo;
use crate::shim::sector::SectorNumber;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sector {0} not found")]
    NotFound(SectorNumber),
    #[error("sector {0} already exists")]
    AlreadyExists(SectorNumber),
    /// The update closure refused the change; nothing was written.
    #[error("{0:#}")]
    Rejected(anyhow::Error),
    #[error("sector store backend failure: {0:#}")]
    Backend(anyhow::Error),
}

impl StoreError {
    fn backend(e: impl Into<anyhow::Error>) -> Self {
        StoreError::Backend(e.into())
    }
}

/// Durable home of [`SectorInfo`] records. Writes are serialized; a record is
/// never observed half-updated.
pub trait SectorStore: Send + Sync {
    fn get(&self, number: SectorNumber) -> Result<Option<SectorInfo>, StoreError>;

    /// Inserts a new record.
    fn put(&self, info: &SectorInfo) -> Result<(), StoreError>;

    /// Read-modify-write of one record. Returns the stored result.
    fn update(
        &self,
        number: SectorNumber,
        f: &mut dyn FnMut(&mut SectorInfo) -> anyhow::Result<()>,
    ) -> Result<SectorInfo, StoreError>;

    fn for_each(
        &self,
        f: &mut dyn FnMut(&SectorInfo) -> anyhow::Result<()>,
    ) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<SectorInfo>, StoreError> {
        let mut out = vec![];
        self.for_each(&mut |info| {
            out.push(info.clone());
            Ok(())
        })?;
        Ok(out)
    }

    /// Allocates a sector number. Numbers are never handed out twice.
    fn next_sector_number(&self) -> Result<SectorNumber, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sealing::SectorState;
    use crate::shim::sector::RegisteredSealProof;

    fn sector(number: SectorNumber) -> SectorInfo {
        SectorInfo::new(number, RegisteredSealProof::StackedDRG2KiBV1P1, vec![])
    }

    pub(super) fn exercise(store: &dyn SectorStore) {
        assert_eq!(store.next_sector_number().unwrap(), 0);
        assert_eq!(store.next_sector_number().unwrap(), 1);

        store.put(&sector(0)).unwrap();
        store.put(&sector(1)).unwrap();
        assert!(matches!(
            store.put(&sector(1)),
            Err(StoreError::AlreadyExists(1))
        ));
        assert_eq!(store.get(0).unwrap(), Some(sector(0)));
        assert_eq!(store.get(9).unwrap(), None);

        let updated = store
            .update(1, &mut |info| {
                info.state = SectorState::PreCommit1;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.state, SectorState::PreCommit1);
        assert_eq!(store.get(1).unwrap().unwrap().state, SectorState::PreCommit1);

        // a rejected update leaves the record alone
        let res = store.update(1, &mut |info| {
            info.state = SectorState::FatalError;
            anyhow::bail!("no")
        });
        assert!(matches!(res, Err(StoreError::Rejected(_))));
        assert_eq!(store.get(1).unwrap().unwrap().state, SectorState::PreCommit1);

        assert!(matches!(
            store.update(5, &mut |_| Ok(())),
            Err(StoreError::NotFound(5))
        ));

        let mut numbers: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|s| s.sector_number)
            .collect();
        numbers.sort();
        assert_eq!(numbers, vec![0, 1]);
    }

    #[test]
    fn memory_store() {
        exercise(&MemorySectorStore::default());
    }
}
