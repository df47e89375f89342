//! Smart-contract virtual machine interface.
//!
//! The ledger treats the VM as a deterministic pure function: given the
//! call and a read-only view of contract state, it returns gas used,
//! output bytes and a list of mutations, or a revert. The ledger applies
//! the mutations only when the call did not revert.
//!
//! [`KvVm`] is a small deterministic machine over contract storage, used by
//! devnets and tests. It does not interpret bytecode.

use scpt_common::crypto::sha3_512_bytes;
use scpt_common::{Address, Coins};

use crate::state::StoreView;

/// Gas charged for any call or deploy before execution.
pub const GAS_CALL_BASE: u64 = 21_000;
pub const GAS_DEPLOY_PER_BYTE: u64 = 200;
pub const GAS_STORAGE_SET: u64 = 20_000;
pub const GAS_STORAGE_GET: u64 = 800;
pub const GAS_TRANSFER: u64 = 9_000;

#[derive(Debug, Clone)]
pub struct VmCall<'a> {
    pub caller: Address,
    /// Target contract; for a deploy, the address the new contract gets.
    pub contract: Address,
    pub value: Coins,
    pub data: &'a [u8],
    pub gas_limit: u64,
    pub block_height: u64,
    pub deploy: bool,
}

/// Read access a VM gets to the ledger.
pub trait ContractState {
    fn code(&self, contract: &Address) -> Option<Vec<u8>>;
    fn storage(&self, contract: &Address, key: &[u8]) -> Option<Vec<u8>>;
    fn balance(&self, address: &Address) -> Coins;
}

impl ContractState for StoreView {
    fn code(&self, contract: &Address) -> Option<Vec<u8>> {
        let hash = self.get_account(contract).ok()??.code_hash?;
        self.get_code(&hash)
    }

    fn storage(&self, contract: &Address, key: &[u8]) -> Option<Vec<u8>> {
        self.get_contract_storage(contract, key)
    }

    fn balance(&self, address: &Address) -> Coins {
        self.get_account(address)
            .ok()
            .flatten()
            .map(|a| a.balance)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMutation {
    SetStorage {
        contract: Address,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Transfer {
        from: Address,
        to: Address,
        coins: Coins,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VmOutcome {
    pub gas_used: u64,
    /// Return data; for a deploy, the code to install.
    pub output: Vec<u8>,
    pub mutations: Vec<StateMutation>,
    pub reverted: bool,
    pub error: Option<String>,
}

impl VmOutcome {
    fn revert(gas_used: u64, reason: impl Into<String>) -> Self {
        Self {
            gas_used,
            reverted: true,
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

pub trait VirtualMachine: Send + Sync {
    fn execute(&self, call: &VmCall<'_>, state: &dyn ContractState) -> VmOutcome;
}

/// Address of a contract deployed by `deployer` with its transaction sequence.
pub fn contract_address(deployer: &Address, sequence: u64) -> Address {
    let mut buf = Vec::with_capacity(28);
    buf.extend_from_slice(deployer.as_bytes());
    buf.extend_from_slice(&sequence.to_be_bytes());
    let digest = sha3_512_bytes(&buf);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    Address::from_bytes(out)
}

// ════════════════════════════════════════════════════════════════════════════
// KV VM
// ════════════════════════════════════════════════════════════════════════════

/// Call data opcodes understood by [`KvVm`]:
///
/// | Byte | Operands | Effect |
/// |------|----------|--------|
/// | `0x01` | `klen:u8 key value` | set `key = value` |
/// | `0x02` | `key` | return the value at `key` |
/// | `0x03` | `to:[u8;20] amount:u128-be` | send SPAY wei from the contract |
/// | `0xfd` | | revert |
pub mod op {
    pub const SET: u8 = 0x01;
    pub const GET: u8 = 0x02;
    pub const SEND: u8 = 0x03;
    pub const REVERT: u8 = 0xfd;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KvVm;

impl KvVm {
    pub fn set_data(key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut d = vec![op::SET, key.len() as u8];
        d.extend_from_slice(key);
        d.extend_from_slice(value);
        d
    }

    pub fn get_data(key: &[u8]) -> Vec<u8> {
        let mut d = vec![op::GET];
        d.extend_from_slice(key);
        d
    }

    pub fn send_data(to: &Address, amount: u128) -> Vec<u8> {
        let mut d = vec![op::SEND];
        d.extend_from_slice(to.as_bytes());
        d.extend_from_slice(&amount.to_be_bytes());
        d
    }

    fn run(&self, call: &VmCall<'_>, state: &dyn ContractState) -> VmOutcome {
        let Some((&opcode, rest)) = call.data.split_first() else {
            return VmOutcome {
                gas_used: GAS_CALL_BASE,
                ..VmOutcome::default()
            };
        };
        match opcode {
            op::SET => {
                let gas = GAS_CALL_BASE + GAS_STORAGE_SET;
                let Some((&klen, kv)) = rest.split_first() else {
                    return VmOutcome::revert(gas, "truncated set");
                };
                let klen = klen as usize;
                if kv.len() < klen || klen == 0 {
                    return VmOutcome::revert(gas, "bad key length");
                }
                let (key, value) = kv.split_at(klen);
                VmOutcome {
                    gas_used: gas,
                    mutations: vec![StateMutation::SetStorage {
                        contract: call.contract,
                        key: key.to_vec(),
                        value: value.to_vec(),
                    }],
                    ..VmOutcome::default()
                }
            }
            op::GET => VmOutcome {
                gas_used: GAS_CALL_BASE + GAS_STORAGE_GET,
                output: state.storage(&call.contract, rest).unwrap_or_default(),
                ..VmOutcome::default()
            },
            op::SEND => {
                let gas = GAS_CALL_BASE + GAS_TRANSFER;
                if rest.len() != 20 + 16 {
                    return VmOutcome::revert(gas, "bad send operands");
                }
                let mut to = [0u8; 20];
                to.copy_from_slice(&rest[..20]);
                let mut amount = [0u8; 16];
                amount.copy_from_slice(&rest[20..]);
                let coins = Coins::spay(u128::from_be_bytes(amount));
                // the call value is already credited to the contract
                if !state.balance(&call.contract).is_gte(&coins) {
                    return VmOutcome::revert(gas, "contract balance too low");
                }
                VmOutcome {
                    gas_used: gas,
                    mutations: vec![StateMutation::Transfer {
                        from: call.contract,
                        to: Address::from_bytes(to),
                        coins,
                    }],
                    ..VmOutcome::default()
                }
            }
            op::REVERT => VmOutcome::revert(GAS_CALL_BASE, "revert"),
            other => VmOutcome::revert(GAS_CALL_BASE, format!("unknown opcode {:#04x}", other)),
        }
    }
}

impl VirtualMachine for KvVm {
    fn execute(&self, call: &VmCall<'_>, state: &dyn ContractState) -> VmOutcome {
        let mut outcome = if call.deploy {
            let gas = GAS_CALL_BASE
                .saturating_add(GAS_DEPLOY_PER_BYTE.saturating_mul(call.data.len() as u64));
            if call.data.is_empty() {
                VmOutcome::revert(gas, "empty code")
            } else {
                VmOutcome {
                    gas_used: gas,
                    output: call.data.to_vec(),
                    ..VmOutcome::default()
                }
            }
        } else if state.code(&call.contract).is_none() {
            // plain value transfer to an account without code
            VmOutcome {
                gas_used: GAS_CALL_BASE,
                ..VmOutcome::default()
            }
        } else {
            self.run(call, state)
        };
        if outcome.gas_used > call.gas_limit {
            outcome = VmOutcome::revert(call.gas_limit, "out of gas");
        }
        outcome
    }
}
