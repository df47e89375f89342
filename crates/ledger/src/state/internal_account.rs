//! Account accessors on `StoreView`.

use scpt_common::Address;

use super::{account_key, StoreView};
use crate::account::Account;
use crate::error::LedgerResult;

const ACCOUNT_PREFIX: &[u8] = b"ls/a/";

impl StoreView {
    pub fn get_account(&self, addr: &Address) -> LedgerResult<Option<Account>> {
        self.get(&account_key(addr))
    }

    /// Existing account or a fresh zero-balance one (not yet written).
    pub fn get_or_make_account(&self, addr: &Address) -> LedgerResult<Account> {
        Ok(self
            .get_account(addr)?
            .unwrap_or_else(|| Account::new(*addr)))
    }

    pub fn set_account(&mut self, account: &Account) -> LedgerResult<()> {
        self.set(account_key(&account.address), account)
    }

    /// Every account in address order.
    pub fn accounts(&self) -> LedgerResult<Vec<Account>> {
        let mut out = Vec::new();
        for (key, _) in self.prefix_iter(ACCOUNT_PREFIX) {
            if let Some(account) = self.get::<Account>(key)? {
                out.push(account);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scpt_common::Coins;

    #[test]
    fn missing_account_is_made_but_not_stored() {
        let v = StoreView::new(0);
        let addr = Address::from_bytes([9; 20]);
        let a = v.get_or_make_account(&addr).unwrap();
        assert_eq!(a.sequence, 0);
        assert!(a.balance.is_zero());
        assert!(v.get_account(&addr).unwrap().is_none());
    }

    #[test]
    fn accounts_round_trip_through_view() {
        let mut v = StoreView::new(0);
        for b in [3u8, 1, 2] {
            let mut a = Account::new(Address::from_bytes([b; 20]));
            a.balance = Coins::new(b, 0);
            v.set_account(&a).unwrap();
        }
        let all = v.accounts().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].address, Address::from_bytes([1; 20]));
        assert_eq!(all[2].balance, Coins::new(3, 0));
    }
}
