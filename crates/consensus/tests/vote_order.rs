//! Tallying is order-independent: whatever order honest votes arrive in,
//! at most one block is certified per height, and it is certified exactly
//! when the voting power first crosses two thirds.

use std::sync::Arc;

use proptest::prelude::*;
use scpt_common::{Hash, Keypair};
use scpt_consensus::{AddVote, Vote, VoteSet};
use scpt_validator::{Validator, ValidatorSet};

const CHAIN: &str = "vote-order";
const HEIGHT: u64 = 12;

fn setup(powers: &[u128]) -> (Vec<Keypair>, Arc<ValidatorSet>) {
    let keys: Vec<Keypair> = (0..powers.len()).map(|i| Keypair::from_seed(i as u8 + 1)).collect();
    let set = ValidatorSet::new(
        0,
        keys.iter()
            .zip(powers)
            .map(|(k, p)| Validator {
                address: k.address(),
                power: *p,
            })
            .collect(),
    );
    (keys, Arc::new(set))
}

/// Validator powers plus a delivery order with some duplicates mixed in.
fn arrivals() -> impl Strategy<Value = (Vec<u128>, Vec<usize>)> {
    prop::collection::vec(1u128..100, 4..8).prop_flat_map(|powers| {
        let n = powers.len();
        let order = (0..n).collect::<Vec<_>>();
        let dups = prop::collection::vec(0..n, 0..4);
        (Just(powers), Just(order).prop_shuffle(), dups).prop_map(|(p, mut order, dups)| {
            for (i, d) in dups.into_iter().enumerate() {
                let at = (i * 3 + 1).min(order.len());
                order.insert(at, d);
            }
            (p, order)
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn certifies_once_when_power_crosses_two_thirds((powers, order) in arrivals()) {
        let (keys, set) = setup(&powers);
        let hash = Hash::from_bytes([0x5a; 64]);
        let mut tally = VoteSet::new(CHAIN, HEIGHT, set.clone());

        let mut seen = std::collections::BTreeSet::new();
        let mut power = 0u128;
        let mut certified = 0;
        for i in order {
            let vote = Vote::new(CHAIN, HEIGHT, hash, &keys[i]).unwrap();
            let fresh = seen.insert(i);
            let crossed = fresh && !set.has_supermajority(power) && set.has_supermajority(power + powers[i]);
            if fresh {
                power += powers[i];
            }
            match tally.add(vote).unwrap() {
                AddVote::Certified(cc) => {
                    prop_assert!(crossed);
                    prop_assert_eq!(cc.block_hash, hash);
                    prop_assert!(cc.verify(&set, CHAIN).is_ok());
                    certified += 1;
                }
                AddVote::Duplicate => prop_assert!(!fresh),
                AddVote::Added { .. } => prop_assert!(!crossed),
            }
        }
        prop_assert_eq!(certified, 1);
        prop_assert_eq!(tally.power_for(&hash), set.total_power());
        prop_assert_eq!(tally.certificate().map(|c| c.block_hash), Some(hash));
    }

    #[test]
    fn split_votes_never_certify_two_blocks(
        powers in prop::collection::vec(1u128..100, 4..8),
        picks in prop::collection::vec(any::<bool>(), 8),
        seed in any::<u64>(),
    ) {
        let (keys, set) = setup(&powers);
        let a = Hash::from_bytes([0xaa; 64]);
        let b = Hash::from_bytes([0xbb; 64]);
        let mut tally = VoteSet::new(CHAIN, HEIGHT, set.clone());

        // rotate the delivery order by the seed
        let n = keys.len();
        let start = (seed % n as u64) as usize;
        let mut winners = Vec::new();
        for step in 0..n {
            let i = (start + step) % n;
            let hash = if picks[i] { a } else { b };
            let vote = Vote::new(CHAIN, HEIGHT, hash, &keys[i]).unwrap();
            if let AddVote::Certified(cc) = tally.add(vote).unwrap() {
                winners.push(cc.block_hash);
            }
        }
        prop_assert!(winners.len() <= 1);
        for w in winners {
            prop_assert!(set.has_supermajority(tally.power_for(&w)));
        }
    }
}
