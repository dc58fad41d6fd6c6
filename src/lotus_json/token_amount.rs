// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::*;

use crate::shim::econ::TokenAmount;

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenAmountLotusJson {
    #[serde(with = "stringify")]
    attos: num_bigint::BigInt,
}

impl HasLotusJson for TokenAmount {
    type LotusJson = TokenAmountLotusJson;

    #[cfg(test)]
    fn snapshots() -> Vec<(serde_json::Value, Self)> {
        vec![
            (json!("0"), TokenAmount::default()),
            (json!("1"), TokenAmount::from_atto(1)),
        ]
    }

    fn into_lotus_json(self) -> Self::LotusJson {
        TokenAmountLotusJson {
            attos: self.atto().clone(),
        }
    }

    fn from_lotus_json(TokenAmountLotusJson { attos }: Self::LotusJson) -> Self {
        TokenAmount::from_atto(attos)
    }
}

#[test]
fn snapshots() {
    assert_all_snapshots::<TokenAmount>();
}
