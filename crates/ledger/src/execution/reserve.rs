//! Reserved-fund micropayment escrow: `ReserveFund` and `ReleaseFund`.

use scpt_common::Hash;
use tracing::debug;

use super::common::{
    debit, get_input, sanity_check_for_fee, validate_input_advanced, validate_input_basic,
};
use super::{TxEnv, TxExecutor, TxOutcome};
use crate::account::MAXIMUM_TARGET_ADDRESSES_FOR_STAKE_BINDING;
use crate::error::{LedgerError, LedgerResult};
use crate::state::StoreView;
use crate::tx::{ReleaseFundTx, ReserveFundTx};

impl TxExecutor for ReserveFundTx {
    fn sanity_check(&self, env: &TxEnv<'_>, view: &StoreView) -> LedgerResult<()> {
        validate_input_basic(&self.source)?;
        if self.resource_ids.is_empty() {
            return Err(LedgerError::ReserveFundCheck("no resource ids".into()));
        }
        if self.resource_ids.len() > MAXIMUM_TARGET_ADDRESSES_FOR_STAKE_BINDING {
            return Err(LedgerError::ReserveFundCheck(format!(
                "{} resource ids, at most {} allowed",
                self.resource_ids.len(),
                MAXIMUM_TARGET_ADDRESSES_FOR_STAKE_BINDING
            )));
        }

        let account = get_input(view, &self.source)?;
        let required = self.source.coins.plus(&self.collateral).plus(&self.fee);
        validate_input_advanced(&account, &env.sign_bytes, &self.source, &required)?;
        sanity_check_for_fee(&self.fee, view.block_height())?;

        account.check_reserve_fund(
            &self.collateral,
            &self.source.coins,
            self.duration,
            self.source.sequence,
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
        debit(&mut account, &self.fee, height)?;
        account.sequence = self.source.sequence;
        let end_block_height = height + self.duration;
        account.reserve_fund(
            self.collateral.clone(),
            self.source.coins.clone(),
            self.resource_ids.clone(),
            end_block_height,
            self.source.sequence,
        );
        if !account.balance.is_valid() {
            return Err(LedgerError::Internal(format!(
                "reservation left {} with a negative balance",
                account.address
            )));
        }
        view.set_account(&account)?;
        debug!(
            source = %self.source.address,
            reserve_sequence = self.source.sequence,
            end_block_height,
            "fund reserved"
        );
        Ok(TxOutcome::with_fee(tx_id, self.fee.clone()))
    }
}

impl TxExecutor for ReleaseFundTx {
    fn sanity_check(&self, env: &TxEnv<'_>, view: &StoreView) -> LedgerResult<()> {
        validate_input_basic(&self.source)?;
        let account = get_input(view, &self.source)?;
        validate_input_advanced(&account, &env.sign_bytes, &self.source, &self.fee)?;
        sanity_check_for_fee(&self.fee, view.block_height())?;
        account.check_release_fund(view.block_height(), self.reserve_sequence)
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
        let refund = account.release_fund(self.reserve_sequence).ok_or_else(|| {
            LedgerError::ReleaseFundCheck(format!(
                "no reserved fund with sequence {}",
                self.reserve_sequence
            ))
        })?;
        view.set_account(&account)?;
        debug!(
            source = %self.source.address,
            reserve_sequence = self.reserve_sequence,
            %refund,
            "fund released"
        );
        Ok(TxOutcome::with_fee(tx_id, self.fee.clone()))
    }
}
