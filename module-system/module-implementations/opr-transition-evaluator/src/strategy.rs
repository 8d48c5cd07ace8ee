//! The aggregate-order lifecycle of a strategy: collect buys and sells, close the aggregate,
//! record its execution and settle it account by account.
use opr_rollup_interface::collaborators::{Registry, Strategy};
use opr_rollup_interface::entities::{PendingAccountInfo, PendingStrategyInfo, StrategyInfo};
use opr_rollup_interface::transition::{
    AggregateOrdersTransition, BuyTransition, ExecutionResultTransition, SellTransition,
    SettlementTransition,
};
use opr_rollup_interface::{AggregateId, StrategyId};

use crate::fees::{charge_fee_asset, net_of_fee};
use crate::math::{credit, debit, mul_div, PRICE_SCALE};
use crate::{account_mut, strategy_mut, EvaluationError, TransitionState};

/// A strategy seen for the first time, bound to the asset its adapter trades.
fn new_strategy<R: Registry>(
    strategy_id: StrategyId,
    registry: &R,
) -> Result<StrategyInfo, EvaluationError> {
    let adapter = registry
        .strategy_index_to_address(strategy_id)
        .and_then(|address| registry.strategy(&address))
        .ok_or(EvaluationError::UnregisteredStrategy(strategy_id))?;
    let asset_id = registry.asset_address_to_index(&adapter.asset_address());
    if asset_id == 0 {
        return Err(EvaluationError::Invalid("strategy asset is not registered"));
    }
    Ok(StrategyInfo::new(asset_id))
}

/// The aggregate currently collecting orders.
fn collecting(strategy: &mut StrategyInfo) -> &mut PendingStrategyInfo {
    let aggregate_id = strategy.next_aggregate_id;
    let position = match strategy
        .pending
        .iter()
        .position(|p| p.aggregate_id == aggregate_id)
    {
        Some(position) => position,
        None => {
            strategy.pending.push(PendingStrategyInfo {
                aggregate_id,
                ..Default::default()
            });
            strategy.pending.len() - 1
        }
    };
    &mut strategy.pending[position]
}

fn account_entry(
    entries: &mut Vec<PendingAccountInfo>,
    aggregate_id: AggregateId,
) -> &mut PendingAccountInfo {
    let position = match entries.iter().position(|p| p.aggregate_id == aggregate_id) {
        Some(position) => position,
        None => {
            entries.push(PendingAccountInfo {
                aggregate_id,
                ..Default::default()
            });
            entries.len() - 1
        }
    };
    &mut entries[position]
}

pub(crate) fn buy<R: Registry>(
    t: &BuyTransition,
    state: &mut TransitionState,
    registry: &R,
) -> Result<(), EvaluationError> {
    if t.max_share_price == 0 {
        return Err(EvaluationError::Invalid("max share price must be positive"));
    }
    let TransitionState {
        accounts,
        strategy,
        global,
        ..
    } = state;
    if strategy.is_none() {
        *strategy = Some(new_strategy(t.strategy_id, registry)?);
    }
    let strategy = strategy_mut(strategy, t.strategy_id)?;
    let account = account_mut(&mut accounts[0], t.account_id)?;

    debit(
        account.idle_asset_mut(strategy.asset_id),
        t.amount,
        "idle assets",
    )?;
    let (net, held_fee) = if t.fee.in_fee_asset {
        charge_fee_asset(account, global, t.fee.amount)?;
        (t.amount, 0)
    } else {
        (net_of_fee(t.amount, &t.fee)?, t.fee.amount)
    };

    let pending = collecting(strategy);
    let aggregate_id = pending.aggregate_id;
    if pending.max_share_price_for_buy == 0 || t.max_share_price < pending.max_share_price_for_buy
    {
        pending.max_share_price_for_buy = t.max_share_price;
    }
    credit(&mut pending.buy_amount, net)?;

    let entry = account_entry(account.pending_mut(t.strategy_id), aggregate_id);
    credit(&mut entry.buy_amount, net)?;
    credit(&mut entry.buy_fees, held_fee)
}

pub(crate) fn sell(t: &SellTransition, state: &mut TransitionState) -> Result<(), EvaluationError> {
    let TransitionState {
        accounts,
        strategy,
        global,
        ..
    } = state;
    let strategy = strategy_mut(strategy, t.strategy_id)?;
    let account = account_mut(&mut accounts[0], t.account_id)?;

    debit(account.share_mut(t.strategy_id), t.shares, "shares")?;
    // A traded-unit fee is taken from the sale proceeds at settlement.
    let held_fee = if t.fee.in_fee_asset {
        charge_fee_asset(account, global, t.fee.amount)?;
        0
    } else {
        t.fee.amount
    };

    let pending = collecting(strategy);
    let aggregate_id = pending.aggregate_id;
    pending.min_share_price_for_sell = pending.min_share_price_for_sell.max(t.min_share_price);
    credit(&mut pending.sell_shares, t.shares)?;

    let entry = account_entry(account.pending_mut(t.strategy_id), aggregate_id);
    credit(&mut entry.sell_shares, t.shares)?;
    credit(&mut entry.sell_fees, held_fee)
}

fn expect_total(field: &'static str, expected: u128, got: u128) -> Result<(), EvaluationError> {
    if expected != got {
        return Err(EvaluationError::AggregateMismatch {
            field,
            expected,
            got,
        });
    }
    Ok(())
}

pub(crate) fn aggregate_orders(
    t: &AggregateOrdersTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    let strategy = strategy_mut(&mut state.strategy, t.strategy_id)?;
    let aggregate_id = strategy.next_aggregate_id;
    let pending = strategy
        .pending_mut(aggregate_id)
        .ok_or(EvaluationError::MissingAggregate(aggregate_id))?;

    expect_total("buy amount", pending.buy_amount, t.buy_amount)?;
    expect_total("sell shares", pending.sell_shares, t.sell_shares)?;
    let min_shares_from_buy = if pending.buy_amount == 0 {
        0
    } else {
        mul_div(
            pending.buy_amount,
            PRICE_SCALE,
            pending.max_share_price_for_buy,
        )?
    };
    let min_amount_from_sell = mul_div(
        pending.sell_shares,
        pending.min_share_price_for_sell,
        PRICE_SCALE,
    )?;
    expect_total(
        "min shares from buy",
        min_shares_from_buy,
        t.min_shares_from_buy,
    )?;
    expect_total(
        "min amount from sell",
        min_amount_from_sell,
        t.min_amount_from_sell,
    )?;

    strategy.next_aggregate_id = aggregate_id
        .checked_add(1)
        .ok_or(EvaluationError::Overflow)?;
    Ok(())
}

pub(crate) fn execution_result(
    t: &ExecutionResultTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    let strategy = strategy_mut(&mut state.strategy, t.strategy_id)?;
    let expected = strategy.last_exec_aggregate_id + 1;
    if t.aggregate_id != expected {
        return Err(EvaluationError::UnexpectedAggregate {
            expected,
            got: t.aggregate_id,
        });
    }
    if t.aggregate_id >= strategy.next_aggregate_id {
        return Err(EvaluationError::Invalid("aggregate is still collecting orders"));
    }
    let (shares_from_buy, amount_from_sell) = if t.success {
        (t.shares_from_buy, t.amount_from_sell)
    } else {
        (0, 0)
    };

    let pending = strategy
        .pending_mut(t.aggregate_id)
        .ok_or(EvaluationError::MissingAggregate(t.aggregate_id))?;
    pending.execution_succeed = t.success;
    pending.shares_from_buy = shares_from_buy;
    pending.amount_from_sell = amount_from_sell;
    pending.unsettled_buy_amount = pending.buy_amount;
    pending.unsettled_sell_shares = pending.sell_shares;
    let sold_shares = pending.sell_shares;

    if t.success {
        credit(&mut strategy.share_supply, shares_from_buy)?;
        debit(&mut strategy.share_supply, sold_shares, "share supply")?;
    }
    strategy.last_exec_aggregate_id = t.aggregate_id;
    Ok(())
}

pub(crate) fn settlement(
    t: &SettlementTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    let TransitionState {
        accounts,
        strategy,
        global,
        ..
    } = state;
    let account = account_mut(&mut accounts[0], t.account_id)?;
    let strategy = strategy_mut(strategy, t.strategy_id)?;
    if t.aggregate_id > strategy.last_exec_aggregate_id {
        return Err(EvaluationError::Invalid("aggregate has not been executed"));
    }
    let asset_id = strategy.asset_id;

    let entries = account.pending_mut(t.strategy_id);
    let entry = entries
        .iter()
        .position(|p| p.aggregate_id == t.aggregate_id)
        .map(|position| entries.remove(position))
        .ok_or(EvaluationError::MissingAggregate(t.aggregate_id))?;
    let index = strategy
        .pending
        .iter()
        .position(|p| p.aggregate_id == t.aggregate_id)
        .ok_or(EvaluationError::MissingAggregate(t.aggregate_id))?;
    let pending = &mut strategy.pending[index];

    if pending.execution_succeed {
        // Pro rata over what is still unsettled, so the last account takes the remainder.
        let shares = if entry.buy_amount == 0 {
            0
        } else {
            mul_div(
                pending.shares_from_buy,
                entry.buy_amount,
                pending.unsettled_buy_amount,
            )?
        };
        let amount = if entry.sell_shares == 0 {
            0
        } else {
            mul_div(
                pending.amount_from_sell,
                entry.sell_shares,
                pending.unsettled_sell_shares,
            )?
        };
        debit(&mut pending.shares_from_buy, shares, "aggregate shares")?;
        debit(&mut pending.amount_from_sell, amount, "aggregate proceeds")?;
        debit(
            &mut pending.unsettled_buy_amount,
            entry.buy_amount,
            "unsettled buy amount",
        )?;
        debit(
            &mut pending.unsettled_sell_shares,
            entry.sell_shares,
            "unsettled sell shares",
        )?;

        let sell_fee = entry.sell_fees.min(amount);
        credit(account.share_mut(t.strategy_id), shares)?;
        credit(account.idle_asset_mut(asset_id), amount - sell_fee)?;
        let fees = entry
            .buy_fees
            .checked_add(sell_fee)
            .ok_or(EvaluationError::Overflow)?;
        if fees > 0 {
            credit(global.op_fee_asset_mut(asset_id), fees)?;
        }
    } else {
        debit(
            &mut pending.unsettled_buy_amount,
            entry.buy_amount,
            "unsettled buy amount",
        )?;
        debit(
            &mut pending.unsettled_sell_shares,
            entry.sell_shares,
            "unsettled sell shares",
        )?;
        let refund = entry
            .buy_amount
            .checked_add(entry.buy_fees)
            .ok_or(EvaluationError::Overflow)?;
        credit(account.idle_asset_mut(asset_id), refund)?;
        credit(account.share_mut(t.strategy_id), entry.sell_shares)?;
    }

    if pending.unsettled_buy_amount == 0 && pending.unsettled_sell_shares == 0 {
        strategy.pending.remove(index);
    }
    Ok(())
}
