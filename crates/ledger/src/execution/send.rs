//! Transfers (`Send` and `EdgeStake`).

use scpt_common::Hash;

use super::common::{
    adjust_by_inputs, adjust_by_outputs, check_accounts_affected, check_no_contract_outputs,
    get_inputs, get_or_make_outputs, sanity_check_for_fee, sanity_check_for_transfer_price,
    sum_outputs, validate_inputs_advanced, validate_inputs_basic, validate_outputs_basic,
};
use super::{TxEnv, TxExecutor, TxOutcome};
use crate::error::{LedgerError, LedgerResult};
use crate::state::StoreView;
use crate::tx::SendTx;

impl TxExecutor for SendTx {
    fn sanity_check(&self, env: &TxEnv<'_>, view: &StoreView) -> LedgerResult<()> {
        validate_inputs_basic(&self.inputs)?;
        validate_outputs_basic(&self.outputs)?;
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(LedgerError::Malformed(format!(
                "{}: inputs and outputs must be non-empty",
                env.kind.as_str()
            )));
        }
        check_accounts_affected(self.inputs.len() + self.outputs.len())?;

        let mut accounts = get_inputs(view, &self.inputs)?;
        get_or_make_outputs(view, &mut accounts, &self.outputs)?;
        check_no_contract_outputs(&accounts, &self.outputs, view.block_height())?;

        let in_total = validate_inputs_advanced(&accounts, &env.sign_bytes, &self.inputs)?;
        sanity_check_for_fee(&self.fee, view.block_height())?;
        sanity_check_for_transfer_price(
            &self.fee,
            self.inputs.len() + self.outputs.len(),
            view.block_height(),
        )?;

        let out_plus_fee = sum_outputs(&self.outputs).plus(&self.fee);
        if !in_total.is_equal(&out_plus_fee) {
            return Err(LedgerError::Unbalanced {
                inputs: in_total,
                outputs_plus_fee: out_plus_fee,
            });
        }
        Ok(())
    }

    fn process(
        &self,
        _env: &TxEnv<'_>,
        view: &mut StoreView,
        tx_id: Hash,
    ) -> LedgerResult<TxOutcome> {
        let mut accounts = get_inputs(view, &self.inputs)?;
        get_or_make_outputs(view, &mut accounts, &self.outputs)?;
        adjust_by_inputs(view, &mut accounts, &self.inputs)?;
        adjust_by_outputs(view, &mut accounts, &self.outputs)?;
        Ok(TxOutcome::with_fee(tx_id, self.fee.clone()))
    }
}
