//! Stake deposits, withdrawals and stake returns.

use num_traits::{Signed, Zero};
use scpt_common::heights::{last_checkpoint_height, STAKE_RETURN_LOCKING_PERIOD};
use scpt_common::{Coins, Hash};
use tracing::debug;

use super::common::{
    credit, debit, get_input, sanity_check_for_fee, validate_input_advanced, validate_input_basic,
    validate_output_basic,
};
use super::{TxEnv, TxExecutor, TxOutcome};
use crate::error::{LedgerError, LedgerResult};
use crate::stake::StakePurpose;
use crate::state::StoreView;
use crate::tx::{DepositStakeTx, WithdrawStakeTx};

/// Height at which a stake withdrawn in `block_height` is paid back.
#[must_use]
pub fn stake_return_height(block_height: u64) -> u64 {
    last_checkpoint_height(block_height) + STAKE_RETURN_LOCKING_PERIOD
}

impl DepositStakeTx {
    fn check_holder_binding(&self) -> LedgerResult<()> {
        if !self.purpose.requires_bls() {
            return Ok(());
        }
        let (Some(pk), Some(pop)) = (&self.bls_pubkey, &self.bls_pop) else {
            return Err(LedgerError::StakeCheck(format!(
                "{} stake requires a BLS key and proof of possession",
                self.purpose.as_str()
            )));
        };
        if !pk.verify_pop(pop) {
            return Err(LedgerError::StakeCheck("invalid BLS proof of possession".into()));
        }
        match &self.holder_sig {
            Some(sig) if sig.verify(&self.holder.address, &self.source.address) => Ok(()),
            Some(_) => Err(LedgerError::StakeCheck("invalid holder signature".into())),
            None => Err(LedgerError::StakeCheck(format!(
                "{} stake requires a holder signature",
                self.purpose.as_str()
            ))),
        }
    }
}

impl TxExecutor for DepositStakeTx {
    fn sanity_check(&self, env: &TxEnv<'_>, view: &StoreView) -> LedgerResult<()> {
        validate_input_basic(&self.source)?;
        validate_output_basic(&self.holder)?;

        let stake = &self.source.coins;
        if !stake.spay.is_zero() || !stake.scpt.is_positive() {
            return Err(LedgerError::StakeCheck(format!(
                "stake must be a positive SCPT amount, got ({})",
                stake
            )));
        }
        self.check_holder_binding()?;

        let account = get_input(view, &self.source)?;
        let required = stake.plus(&self.fee);
        validate_input_advanced(&account, &env.sign_bytes, &self.source, &required)?;
        sanity_check_for_fee(&self.fee, view.block_height())?;

        view.get_candidate_pool(self.purpose)?.check_deposit(
            &self.source.address,
            &self.holder.address,
            &stake.scpt,
        )
    }

    fn process(
        &self,
        _env: &TxEnv<'_>,
        view: &mut StoreView,
        tx_id: Hash,
    ) -> LedgerResult<TxOutcome> {
        let height = view.block_height();
        let mut account = get_input(view, &self.source)?;
        debit(&mut account, &self.source.coins.plus(&self.fee), height)?;
        account.sequence = self.source.sequence;
        view.set_account(&account)?;

        let mut pool = view.get_candidate_pool(self.purpose)?;
        let bls = if self.purpose.requires_bls() {
            self.bls_pubkey
        } else {
            None
        };
        pool.deposit_stake(
            self.source.address,
            self.holder.address,
            self.source.coins.scpt.clone(),
            bls,
        )?;
        view.set_candidate_pool(&pool)?;
        debug!(
            purpose = self.purpose.as_str(),
            source = %self.source.address,
            holder = %self.holder.address,
            height,
            "stake deposited"
        );
        Ok(TxOutcome::with_fee(tx_id, self.fee.clone()))
    }
}

impl TxExecutor for WithdrawStakeTx {
    fn sanity_check(&self, env: &TxEnv<'_>, view: &StoreView) -> LedgerResult<()> {
        validate_input_basic(&self.source)?;
        validate_output_basic(&self.holder)?;

        let account = get_input(view, &self.source)?;
        validate_input_advanced(&account, &env.sign_bytes, &self.source, &self.fee)?;
        sanity_check_for_fee(&self.fee, view.block_height())?;

        view.get_candidate_pool(self.purpose)?
            .check_withdraw(&self.source.address, &self.holder.address)
    }

    fn process(
        &self,
        _env: &TxEnv<'_>,
        view: &mut StoreView,
        tx_id: Hash,
    ) -> LedgerResult<TxOutcome> {
        let height = view.block_height();
        let mut account = get_input(view, &self.source)?;
        debit(&mut account, &self.fee, height)?;
        account.sequence = self.source.sequence;
        view.set_account(&account)?;

        let return_height = stake_return_height(height);
        let mut pool = view.get_candidate_pool(self.purpose)?;
        pool.withdraw_stake(&self.source.address, &self.holder.address, return_height)?;
        view.set_candidate_pool(&pool)?;
        debug!(
            purpose = self.purpose.as_str(),
            source = %self.source.address,
            holder = %self.holder.address,
            return_height,
            "stake withdrawn"
        );
        Ok(TxOutcome::with_fee(tx_id, self.fee.clone()))
    }
}

/// Pay back every withdrawn stake due at the view's block height.
/// Runs before the block's transactions.
pub(crate) fn process_stake_returns(view: &mut StoreView) -> LedgerResult<usize> {
    let height = view.block_height();
    let mut count = 0;
    for purpose in StakePurpose::ALL {
        let mut pool = view.get_candidate_pool(purpose)?;
        let returned = pool.take_returned_stakes(height);
        if returned.is_empty() {
            continue;
        }
        view.set_candidate_pool(&pool)?;
        for (source, amount) in returned {
            let mut account = view.get_or_make_account(&source)?;
            credit(&mut account, &Coins::scpt(amount), height);
            view.set_account(&account)?;
            count += 1;
        }
    }
    if count > 0 {
        debug!(height, count, "returned withdrawn stakes");
    }
    Ok(count)
}
