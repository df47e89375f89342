//! Stake reward distribution rules.

use scpt_common::Hash;

use super::common::{
    debit, get_input, sanity_check_for_fee, validate_input_advanced, validate_input_basic,
    validate_output_basic,
};
use super::{TxEnv, TxExecutor, TxOutcome};
use crate::error::{LedgerError, LedgerResult};
use crate::stake::StakePurpose;
use crate::state::{StakeRewardDistributionRule, StoreView};
use crate::tx::StakeRewardDistributionTx;

/// Largest share (basis points of 1/10000) a holder may route to a beneficiary.
pub const MAXIMUM_SPLIT_BASIS_POINT: u32 = 1_000;

impl TxExecutor for StakeRewardDistributionTx {
    fn sanity_check(&self, env: &TxEnv<'_>, view: &StoreView) -> LedgerResult<()> {
        validate_input_basic(&self.holder)?;
        validate_output_basic(&self.beneficiary)?;
        if self.split_basis_point > MAXIMUM_SPLIT_BASIS_POINT {
            return Err(LedgerError::StakeRewardDistributionCheck(format!(
                "split basis point {} above {}",
                self.split_basis_point, MAXIMUM_SPLIT_BASIS_POINT
            )));
        }

        let account = get_input(view, &self.holder)?;
        validate_input_advanced(&account, &env.sign_bytes, &self.holder, &self.fee)?;
        sanity_check_for_fee(&self.fee, view.block_height())?;

        let mut holds_stake = false;
        for purpose in [StakePurpose::Guardian, StakePurpose::EliteEdgeNode] {
            if view
                .get_candidate_pool(purpose)?
                .holder(&self.holder.address)
                .is_some()
            {
                holds_stake = true;
            }
        }
        if !holds_stake {
            return Err(LedgerError::StakeRewardDistributionCheck(format!(
                "{} holds no guardian or elite edge node stake",
                self.holder.address
            )));
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
        let mut account = get_input(view, &self.holder)?;
        debit(&mut account, &self.fee, height)?;
        account.sequence = self.holder.sequence;
        view.set_account(&account)?;

        view.set_stake_reward_distribution(&StakeRewardDistributionRule {
            holder: self.holder.address,
            beneficiary: self.beneficiary.address,
            split_basis_point: self.split_basis_point,
        })?;
        Ok(TxOutcome::with_fee(tx_id, self.fee.clone()))
    }
}
