//! Payout split tables for reserved-fund resources.

use scpt_common::Hash;
use tracing::debug;

use super::common::{
    check_accounts_affected, debit, get_input, sanity_check_for_fee, validate_input_advanced,
    validate_input_basic,
};
use super::{TxEnv, TxExecutor, TxOutcome};
use crate::account::MAXIMUM_FUND_RESERVE_DURATION;
use crate::error::{LedgerError, LedgerResult};
use crate::state::{SplitContract, StoreView};
use crate::tx::SplitRuleTx;

/// Longest lifetime of a split contract, in blocks.
pub const MAXIMUM_SPLIT_CONTRACT_DURATION: u64 = MAXIMUM_FUND_RESERVE_DURATION;

impl SplitRuleTx {
    fn check_splits(&self) -> LedgerResult<()> {
        let mut total: u64 = 0;
        for split in &self.splits {
            if split.address.is_zero() {
                return Err(LedgerError::SplitRuleCheck("split address is zero".into()));
            }
            total += u64::from(split.percentage);
        }
        if total > 100 {
            return Err(LedgerError::SplitRuleCheck(format!(
                "split percentages add up to {}, more than 100",
                total
            )));
        }
        Ok(())
    }
}

impl TxExecutor for SplitRuleTx {
    fn sanity_check(&self, env: &TxEnv<'_>, view: &StoreView) -> LedgerResult<()> {
        validate_input_basic(&self.initiator)?;
        if self.resource_id.is_empty() {
            return Err(LedgerError::SplitRuleCheck("empty resource id".into()));
        }
        if self.duration == 0 || self.duration > MAXIMUM_SPLIT_CONTRACT_DURATION {
            return Err(LedgerError::SplitRuleCheck(format!(
                "duration {} outside 1..={}",
                self.duration, MAXIMUM_SPLIT_CONTRACT_DURATION
            )));
        }
        check_accounts_affected(self.splits.len() + 1)?;
        self.check_splits()?;

        let account = get_input(view, &self.initiator)?;
        validate_input_advanced(&account, &env.sign_bytes, &self.initiator, &self.fee)?;
        sanity_check_for_fee(&self.fee, view.block_height())?;

        if let Some(existing) = view.get_split_contract(&self.resource_id)? {
            if !existing.is_expired(view.block_height())
                && existing.initiator != self.initiator.address
            {
                return Err(LedgerError::SplitRuleCheck(format!(
                    "split rule for {} belongs to {}",
                    self.resource_id, existing.initiator
                )));
            }
        }
        Ok(())
    }

    fn process(
        &self,
        _env: &TxEnv<'_>,
        view: &mut StoreView,
        tx_id: Hash,
    ) -> LedgerResult<TxOutcome> {
        let height = view.block_height();
        let mut account = get_input(view, &self.initiator)?;
        debit(&mut account, &self.fee, height)?;
        account.sequence = self.initiator.sequence;
        view.set_account(&account)?;

        let contract = SplitContract {
            resource_id: self.resource_id.clone(),
            initiator: self.initiator.address,
            splits: self.splits.clone(),
            end_block_height: height + self.duration,
        };
        view.set_split_contract(&contract)?;
        debug!(
            resource_id = %self.resource_id,
            splits = self.splits.len(),
            end_block_height = contract.end_block_height,
            "split rule set"
        );
        Ok(TxOutcome::with_fee(tx_id, self.fee.clone()))
    }
}
