// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::*;

use fvm_ipld_encoding::RawBytes;

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct VecU8LotusJson(#[serde(with = "base64_standard")] Vec<u8>);

impl HasLotusJson for Vec<u8> {
    type LotusJson = VecU8LotusJson;

    #[cfg(test)]
    fn snapshots() -> Vec<(serde_json::Value, Self)> {
        vec![(json!("aGVsbG8gd29ybGQh"), Vec::from_iter(*b"hello world!"))]
    }

    fn into_lotus_json(self) -> Self::LotusJson {
        VecU8LotusJson(self)
    }

    fn from_lotus_json(VecU8LotusJson(bytes): Self::LotusJson) -> Self {
        bytes
    }
}

impl HasLotusJson for RawBytes {
    type LotusJson = VecU8LotusJson;

    #[cfg(test)]
    fn snapshots() -> Vec<(serde_json::Value, Self)> {
        vec![(json!("aGVsbG8gd29ybGQh"), RawBytes::new(Vec::from_iter(*b"hello world!")))]
    }

    fn into_lotus_json(self) -> Self::LotusJson {
        VecU8LotusJson(self.into())
    }

    fn from_lotus_json(VecU8LotusJson(bytes): Self::LotusJson) -> Self {
        RawBytes::new(bytes)
    }
}

#[test]
fn snapshots() {
    assert_all_snapshots::<Vec<u8>>();
    assert_all_snapshots::<RawBytes>();
}

#[test]
fn null_is_empty() {
    let bytes: LotusJson<Vec<u8>> = serde_json::from_value(json!(null)).unwrap();
    assert!(bytes.into_inner().is_empty());
}

#[cfg(test)]
quickcheck! {
    fn quickcheck(val: Vec<u8>) -> () {
        assert_unchanged_via_json(val)
    }
}
