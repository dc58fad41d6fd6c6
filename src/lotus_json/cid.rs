// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::*;

#[derive(Serialize, Deserialize, derive_more::From, derive_more::Into)]
pub struct CidLotusJson {
    #[serde(rename = "/", with = "stringify")]
    slash: ::cid::Cid,
}

impl HasLotusJson for ::cid::Cid {
    type LotusJson = CidLotusJson;

    #[cfg(test)]
    fn snapshots() -> Vec<(serde_json::Value, Self)> {
        vec![(json!({"/": "baeaaaaa"}), ::cid::Cid::default())]
    }

    fn into_lotus_json(self) -> Self::LotusJson {
        CidLotusJson { slash: self }
    }

    fn from_lotus_json(CidLotusJson { slash }: Self::LotusJson) -> Self {
        slash
    }
}

#[test]
fn snapshots() {
    assert_all_snapshots::<::cid::Cid>();
}
