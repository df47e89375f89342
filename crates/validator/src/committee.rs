//! Checkpoint committee: guardians and elite edge nodes that co-sign
//! checkpoint blocks with BLS keys.

use serde::{Deserialize, Serialize};

use scpt_common::heights::{min_elite_edge_node_stake, min_guardian_stake};
use scpt_common::{Address, BlsPublicKey};
use scpt_ledger::{StakePurpose, StakeSnapshot};

use crate::error::ValidatorResult;
use crate::set::{exceeds_two_thirds, to_power};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeMember {
    pub address: Address,
    pub power: u128,
    pub bls_pubkey: BlsPublicKey,
    pub purpose: StakePurpose,
}

/// Committee for one checkpoint height, sorted by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committee {
    checkpoint_height: u64,
    members: Vec<CommitteeMember>,
    total_power: u128,
}

impl Committee {
    /// Eligible guardian and elite edge node holders in `snapshot`.
    ///
    /// A holder staked in both pools is a single member: its powers are
    /// summed and the guardian BLS key wins. Holders without a BLS key are
    /// skipped since they cannot sign.
    pub fn from_snapshot(checkpoint_height: u64, snapshot: &StakeSnapshot) -> ValidatorResult<Self> {
        let mut members: Vec<CommitteeMember> = Vec::new();
        let pools = [
            (StakePurpose::Guardian, min_guardian_stake(checkpoint_height)),
            (
                StakePurpose::EliteEdgeNode,
                min_elite_edge_node_stake(checkpoint_height),
            ),
        ];
        for (purpose, min) in pools {
            for (holder, total) in snapshot.pool(purpose).eligible(&min) {
                let Some(bls_pubkey) = holder.bls_pubkey else {
                    continue;
                };
                let power = to_power(&holder.holder, &total)?;
                match members.iter_mut().find(|m| m.address == holder.holder) {
                    Some(existing) => existing.power = existing.power.saturating_add(power),
                    None => members.push(CommitteeMember {
                        address: holder.holder,
                        power,
                        bls_pubkey,
                        purpose,
                    }),
                }
            }
        }
        members.sort_by(|a, b| a.address.cmp(&b.address));
        let total_power = members.iter().fold(0u128, |acc, m| acc.saturating_add(m.power));
        Ok(Self {
            checkpoint_height,
            members,
            total_power,
        })
    }

    #[must_use]
    pub fn checkpoint_height(&self) -> u64 {
        self.checkpoint_height
    }

    #[must_use]
    pub fn members(&self) -> &[CommitteeMember] {
        &self.members
    }

    /// Members of one pool only (e.g. elite edge nodes for RPC queries).
    pub fn members_of(&self, purpose: StakePurpose) -> impl Iterator<Item = &CommitteeMember> {
        self.members.iter().filter(move |m| m.purpose == purpose)
    }

    #[must_use]
    pub fn member(&self, address: &Address) -> Option<&CommitteeMember> {
        self.members
            .binary_search_by(|m| m.address.cmp(address))
            .ok()
            .map(|i| &self.members[i])
    }

    #[must_use]
    pub fn total_power(&self) -> u128 {
        self.total_power
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn has_supermajority(&self, power: u128) -> bool {
        exceeds_two_thirds(power, self.total_power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scpt_common::{tokens, BlsKeypair};
    use scpt_ledger::CandidatePool;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn members_need_threshold_and_key() {
        let k1 = BlsKeypair::from_seed(b"one").unwrap().public_key();
        let k2 = BlsKeypair::from_seed(b"two").unwrap().public_key();
        let mut guardians = CandidatePool::new(StakePurpose::Guardian);
        guardians.deposit_stake(addr(9), addr(1), tokens(2_000), Some(k1)).unwrap();
        guardians.deposit_stake(addr(9), addr(2), tokens(500), Some(k2)).unwrap();
        guardians.deposit_stake(addr(9), addr(3), tokens(5_000), None).unwrap();
        let mut eens = CandidatePool::new(StakePurpose::EliteEdgeNode);
        eens.deposit_stake(addr(8), addr(1), tokens(10_000), Some(k2)).unwrap();
        eens.deposit_stake(addr(8), addr(4), tokens(20_000), Some(k2)).unwrap();

        let snapshot = StakeSnapshot {
            height: 101,
            validators: CandidatePool::new(StakePurpose::Validator),
            guardians,
            elite_edge_nodes: eens,
        };
        let c = Committee::from_snapshot(101, &snapshot).unwrap();
        let addrs: Vec<_> = c.members().iter().map(|m| m.address).collect();
        assert_eq!(addrs, vec![addr(1), addr(4)]);

        let m1 = c.member(&addr(1)).unwrap();
        assert_eq!(m1.bls_pubkey, k1);
        assert_eq!(m1.purpose, StakePurpose::Guardian);
        assert_eq!(c.total_power(), 32_000 * 10u128.pow(18));
        assert_eq!(c.members_of(StakePurpose::EliteEdgeNode).count(), 1);
        assert!(c.has_supermajority(22_000 * 10u128.pow(18)));
        assert!(!c.has_supermajority(20_000 * 10u128.pow(18)));
    }
}
