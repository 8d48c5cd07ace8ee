//! Deposits, withdrawals and account-to-account transfers.
use opr_rollup_interface::entities::AccountInfo;
use opr_rollup_interface::transition::{
    DepositTransition, TransferAssetTransition, TransferShareTransition, WithdrawTransition,
    FEE_ASSET_ID,
};
use opr_rollup_interface::{AccountId, Address};

use crate::fees::{charge_fee_asset, net_of_fee};
use crate::math::{credit, debit};
use crate::{account_mut, EvaluationError, TransitionState};

/// The account at `slot`, created on first use. An existing leaf must match both the id and the
/// owner.
fn account_or_new(
    slot: &mut Option<AccountInfo>,
    owner: Address,
    account_id: AccountId,
) -> Result<&mut AccountInfo, EvaluationError> {
    if account_id == 0 {
        return Err(EvaluationError::Invalid("account id 0 is reserved"));
    }
    let account = slot.get_or_insert_with(|| AccountInfo::new(owner, account_id));
    if account.account != owner || account.account_id != account_id {
        return Err(EvaluationError::AccountMismatch(account_id));
    }
    Ok(account)
}

pub(crate) fn deposit(
    t: &DepositTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    let account = account_or_new(&mut state.accounts[0], t.account, t.account_id)?;
    credit(account.idle_asset_mut(t.asset_id), t.amount)
}

pub(crate) fn withdraw(
    t: &WithdrawTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    let TransitionState {
        accounts, global, ..
    } = state;
    let account = account_mut(&mut accounts[0], t.account_id)?;
    if account.account != t.account {
        return Err(EvaluationError::AccountMismatch(t.account_id));
    }
    debit(account.idle_asset_mut(t.asset_id), t.amount, "idle assets")?;

    // The withdraw fee goes to the protocol, not the operator.
    if t.fee.in_fee_asset {
        debit(account.idle_asset_mut(FEE_ASSET_ID), t.fee.amount, "fee asset")?;
        credit(global.protocol_fee_mut(FEE_ASSET_ID), t.fee.amount)
    } else {
        net_of_fee(t.amount, &t.fee)?;
        if t.fee.amount == 0 {
            return Ok(());
        }
        credit(global.protocol_fee_mut(t.asset_id), t.fee.amount)
    }
}

fn check_transfer(from: AccountId, to: AccountId) -> Result<(), EvaluationError> {
    if from == to {
        return Err(EvaluationError::Invalid("transfer to the sending account"));
    }
    Ok(())
}

pub(crate) fn transfer_asset(
    t: &TransferAssetTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    check_transfer(t.from_account_id, t.to_account_id)?;
    let TransitionState {
        accounts, global, ..
    } = state;
    let [from_slot, to_slot] = accounts;

    let from = account_mut(from_slot, t.from_account_id)?;
    debit(from.idle_asset_mut(t.asset_id), t.amount, "idle assets")?;
    let received = if t.fee.in_fee_asset {
        charge_fee_asset(from, global, t.fee.amount)?;
        t.amount
    } else {
        let received = net_of_fee(t.amount, &t.fee)?;
        if t.fee.amount > 0 {
            credit(global.op_fee_asset_mut(t.asset_id), t.fee.amount)?;
        }
        received
    };

    let to = account_or_new(to_slot, t.to_account, t.to_account_id)?;
    credit(to.idle_asset_mut(t.asset_id), received)
}

pub(crate) fn transfer_share(
    t: &TransferShareTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    check_transfer(t.from_account_id, t.to_account_id)?;
    let TransitionState {
        accounts, global, ..
    } = state;
    let [from_slot, to_slot] = accounts;

    let from = account_mut(from_slot, t.from_account_id)?;
    debit(from.share_mut(t.strategy_id), t.shares, "shares")?;
    let received = if t.fee.in_fee_asset {
        charge_fee_asset(from, global, t.fee.amount)?;
        t.shares
    } else {
        let received = net_of_fee(t.shares, &t.fee)?;
        if t.fee.amount > 0 {
            credit(global.op_fee_share_mut(t.strategy_id), t.fee.amount)?;
        }
        received
    };

    let to = account_or_new(to_slot, t.to_account, t.to_account_id)?;
    credit(to.share_mut(t.strategy_id), received)
}
