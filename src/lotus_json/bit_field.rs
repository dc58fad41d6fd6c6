// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::*;

use fvm_ipld_bitfield::{BitField, json::BitFieldJson};

/// Run-length encoded, `[0]` for the empty set.
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct BitFieldLotusJson(pub BitFieldJson);

impl HasLotusJson for BitField {
    type LotusJson = BitFieldLotusJson;

    #[cfg(test)]
    fn snapshots() -> Vec<(serde_json::Value, Self)> {
        vec![
            (json!([0]), Self::new()),
            (json!([1, 1]), {
                let mut it = Self::new();
                it.set(1);
                it
            }),
        ]
    }

    fn into_lotus_json(self) -> Self::LotusJson {
        BitFieldLotusJson(BitFieldJson(self))
    }

    fn from_lotus_json(BitFieldLotusJson(BitFieldJson(it)): Self::LotusJson) -> Self {
        it
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    // BitField is not PartialEq, so the shared snapshot helpers don't apply.
    #[test]
    fn snapshots() {
        for (lotus_json, val) in BitField::snapshots() {
            let expected: Vec<u64> = val.iter().collect();
            assert_eq!(
                val.into_lotus_json_value().unwrap().to_string(),
                lotus_json.to_string()
            );
            let parsed: LotusJson<BitField> = serde_json::from_value(lotus_json).unwrap();
            assert_eq!(parsed.into_inner().iter().collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn runs_round_trip_through_lotus_json() {
        let mut bits = BitField::new();
        for i in [0, 1, 2, 7, 9] {
            bits.set(i);
        }
        let json = bits.into_lotus_json_value().unwrap();
        assert_eq!(json, json!([0, 3, 4, 1, 1, 1]));
        let parsed: LotusJson<BitField> = serde_json::from_value(json).unwrap();
        assert_eq!(
            parsed.into_inner().iter().collect::<Vec<_>>(),
            vec![0, 1, 2, 7, 9]
        );
    }
}
