//! Contract code and storage.

use scpt_common::{sha3_512, sha3_512_concat, Address, Hash};

use super::{code_key, contract_storage_key, contract_storage_prefix, StoreView};

impl StoreView {
    pub fn get_code(&self, code_hash: &Hash) -> Option<Vec<u8>> {
        self.get_raw(&code_key(code_hash)).map(<[u8]>::to_vec)
    }

    /// Store code under its hash and return the hash.
    pub fn set_code(&mut self, code: &[u8]) -> Hash {
        let hash = sha3_512(code);
        self.set_raw(code_key(&hash), code.to_vec());
        hash
    }

    pub fn get_contract_storage(&self, contract: &Address, key: &[u8]) -> Option<Vec<u8>> {
        self.get_raw(&contract_storage_key(contract, key))
            .map(<[u8]>::to_vec)
    }

    /// Write a storage slot; an empty value clears it.
    pub fn set_contract_storage(&mut self, contract: &Address, key: &[u8], value: Vec<u8>) {
        let k = contract_storage_key(contract, key);
        if value.is_empty() {
            self.delete(&k);
        } else {
            self.set_raw(k, value);
        }
    }

    /// Hash over the contract's storage slots in key order.
    pub fn contract_storage_root(&self, contract: &Address) -> Hash {
        let prefix = contract_storage_prefix(contract);
        let mut acc = sha3_512(&[]);
        for (k, v) in self.prefix_iter(&prefix) {
            acc = sha3_512_concat(&[&acc.as_bytes()[..], k.as_slice(), v.as_slice()]);
        }
        acc
    }
}
