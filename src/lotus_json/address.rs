// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::*;

use crate::shim::address::Address;

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressLotusJson(#[serde(with = "stringify")] Address);

impl HasLotusJson for Address {
    type LotusJson = AddressLotusJson;

    #[cfg(test)]
    fn snapshots() -> Vec<(serde_json::Value, Self)> {
        vec![
            (json!("f00"), Address::default()),
            (json!("f01000"), Address::new_id(1000)),
        ]
    }

    fn into_lotus_json(self) -> Self::LotusJson {
        AddressLotusJson(self)
    }

    fn from_lotus_json(AddressLotusJson(address): Self::LotusJson) -> Self {
        address
    }
}

#[test]
fn snapshots() {
    assert_all_snapshots::<Address>();
}
