//! Merkle commitment over the full ledger state.
//!
//! - Leaf: `SHA3-512(key || value)`, in key order
//! - Parent: `SHA3-512(left || right)`
//! - Odd node count: duplicate last node
//! - Empty state: `SHA3-512("")`

use scpt_common::{sha3_512, sha3_512_concat, Hash};

use super::StoreView;

impl StoreView {
    #[must_use]
    pub fn state_root(&self) -> Hash {
        let leaves: Vec<Hash> = self
            .entries()
            .iter()
            .map(|(k, v)| sha3_512_concat(&[k.as_slice(), v.as_slice()]))
            .collect();
        merkle_root(leaves)
    }
}

pub(crate) fn merkle_root(mut nodes: Vec<Hash>) -> Hash {
    if nodes.is_empty() {
        return sha3_512(&[]);
    }
    while nodes.len() > 1 {
        if nodes.len() % 2 != 0 {
            let last = nodes[nodes.len() - 1];
            nodes.push(last);
        }
        nodes = nodes
            .chunks_exact(2)
            .map(|pair| sha3_512_concat(&[&pair[0].as_bytes()[..], &pair[1].as_bytes()[..]]))
            .collect();
    }
    nodes[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_root() {
        assert_eq!(StoreView::new(0).state_root(), sha3_512(&[]));
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let mut v = StoreView::new(0);
        v.set_raw(b"k".to_vec(), b"v".to_vec());
        assert_eq!(v.state_root(), sha3_512(b"kv"));
    }

    #[test]
    fn odd_leaf_count_duplicates_last() {
        let a = sha3_512(b"a");
        let b = sha3_512(b"b");
        let c = sha3_512(b"c");
        let ab = sha3_512_concat(&[a.as_bytes(), b.as_bytes()]);
        let cc = sha3_512_concat(&[c.as_bytes(), c.as_bytes()]);
        let expected = sha3_512_concat(&[ab.as_bytes(), cc.as_bytes()]);
        assert_eq!(merkle_root(vec![a, b, c]), expected);
    }

    #[test]
    fn root_ignores_insertion_order() {
        let mut x = StoreView::new(0);
        x.set_raw(b"b".to_vec(), vec![2]);
        x.set_raw(b"a".to_vec(), vec![1]);
        let mut y = StoreView::new(5);
        y.set_raw(b"a".to_vec(), vec![1]);
        y.set_raw(b"b".to_vec(), vec![2]);
        assert_eq!(x.state_root(), y.state_root());
    }
}
