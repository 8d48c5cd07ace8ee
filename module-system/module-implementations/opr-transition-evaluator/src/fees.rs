use opr_rollup_interface::entities::{AccountInfo, GlobalInfo};
use opr_rollup_interface::transition::{
    Fee, TransferOperatorFeeTransition, WithdrawProtocolFeeTransition, FEE_ASSET_ID,
};

use crate::math::{credit, debit};
use crate::{account_mut, EvaluationError, TransitionState};

/// What is left of `amount` after a fee charged in the traded unit.
pub(crate) fn net_of_fee(amount: u128, fee: &Fee) -> Result<u128, EvaluationError> {
    let fee = fee.traded_unit_amount();
    amount
        .checked_sub(fee)
        .ok_or(EvaluationError::Insufficient {
            what: "amount to cover the fee",
            available: amount,
            needed: fee,
        })
}

/// Moves a fee paid in the fee asset from the account to the operator.
pub(crate) fn charge_fee_asset(
    account: &mut AccountInfo,
    global: &mut GlobalInfo,
    fee: u128,
) -> Result<(), EvaluationError> {
    if fee == 0 {
        return Ok(());
    }
    debit(account.idle_asset_mut(FEE_ASSET_ID), fee, "fee asset")?;
    credit(global.op_fee_asset_mut(FEE_ASSET_ID), fee)
}

pub(crate) fn withdraw_protocol_fee(
    t: &WithdrawProtocolFeeTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    debit(
        state.global.protocol_fee_mut(t.asset_id),
        t.amount,
        "protocol fees",
    )
}

pub(crate) fn transfer_operator_fee(
    t: &TransferOperatorFeeTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    let account = account_mut(&mut state.accounts[0], t.account_id)?;
    let fees = std::mem::take(&mut state.global.op_fees);
    for (asset_id, amount) in (0u32..).zip(fees.assets) {
        if amount > 0 {
            credit(account.idle_asset_mut(asset_id), amount)?;
        }
    }
    for (strategy_id, shares) in (0u32..).zip(fees.shares) {
        if shares > 0 {
            credit(account.share_mut(strategy_id), shares)?;
        }
    }
    Ok(())
}
