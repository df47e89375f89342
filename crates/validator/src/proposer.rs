//! Stake-weighted proposer selection.
//!
//! The seed is `sha3(height ‖ round)`; its first 16 bytes, read big-endian,
//! pick a point in `[0, total_power)` and the validator whose cumulative
//! power range covers that point proposes. Validators are walked in address
//! order so every node computes the same answer. [`ValidatorSet::proposer`]
//! draws round 0 this way and rotates through the set after a timeout.
//!
//! [`ValidatorSet::proposer`]: crate::ValidatorSet::proposer

use scpt_common::{sha3_512_concat, Address, Hash};

pub fn proposer_seed(height: u64, round: u32) -> Hash {
    sha3_512_concat(&[&height.to_be_bytes(), &round.to_be_bytes()])
}

fn seed_point(seed: &Hash) -> u128 {
    let mut arr = [0u8; 16];
    arr.copy_from_slice(&seed.as_bytes()[..16]);
    u128::from_be_bytes(arr)
}

/// Pick from `weighted` (sorted by address) using `seed`. Zero-weight
/// entries are never selected.
pub fn choose_proposer(seed: &Hash, weighted: &[(Address, u128)]) -> Option<Address> {
    let total = weighted
        .iter()
        .try_fold(0u128, |acc, (_, w)| acc.checked_add(*w))?;
    if total == 0 {
        return None;
    }
    let point = seed_point(seed) % total;
    let mut cumulative: u128 = 0;
    for (addr, weight) in weighted {
        cumulative += *weight;
        if point < cumulative {
            return Some(*addr);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn single_validator_always_proposes() {
        let list = vec![(addr(1), 10u128)];
        for round in 0..5 {
            assert_eq!(choose_proposer(&proposer_seed(7, round), &list), Some(addr(1)));
        }
    }

    #[test]
    fn zero_weight_never_selected() {
        let list = vec![(addr(1), 0u128), (addr(2), 5u128), (addr(3), 0u128)];
        for h in 1..50 {
            assert_eq!(choose_proposer(&proposer_seed(h, 0), &list), Some(addr(2)));
        }
        assert_eq!(choose_proposer(&proposer_seed(1, 0), &[(addr(1), 0)]), None);
        assert_eq!(choose_proposer(&proposer_seed(1, 0), &[]), None);
    }

    #[test]
    fn rounds_rotate_and_weights_matter() {
        let list = vec![(addr(1), 1_000u128), (addr(2), 3_000u128)];
        let mut counts: BTreeMap<Address, usize> = BTreeMap::new();
        for h in 0..2_000u64 {
            let p = choose_proposer(&proposer_seed(h, 0), &list).unwrap();
            *counts.entry(p).or_default() += 1;
        }
        let heavy = counts[&addr(2)];
        assert!(heavy > 1_300 && heavy < 1_700, "heavy picked {} times", heavy);

        let picks: Vec<_> = (0..32)
            .map(|r| choose_proposer(&proposer_seed(10, r), &list).unwrap())
            .collect();
        assert!(picks.contains(&addr(1)) && picks.contains(&addr(2)));
    }

    #[test]
    fn deterministic() {
        let list = vec![(addr(1), 7u128), (addr(2), 9u128), (addr(3), 11u128)];
        assert_eq!(
            choose_proposer(&proposer_seed(42, 3), &list),
            choose_proposer(&proposer_seed(42, 3), &list)
        );
    }

    proptest::proptest! {
        #[test]
        fn picks_a_weighted_member(
            weights in proptest::collection::vec(0u128..1_000_000, 1..20),
            height in 0u64..1_000_000,
            round in 0u32..64,
        ) {
            let list: Vec<_> = weights
                .iter()
                .enumerate()
                .map(|(i, w)| (addr(i as u8), *w))
                .collect();
            match choose_proposer(&proposer_seed(height, round), &list) {
                None => proptest::prop_assert!(weights.iter().all(|w| *w == 0)),
                Some(p) => {
                    let weight = list.iter().find(|(a, _)| *a == p).map(|(_, w)| *w);
                    proptest::prop_assert!(weight.is_some_and(|w| w > 0));
                }
            }
        }
    }
}
