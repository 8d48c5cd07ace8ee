//! Staking pools and the reward clock.
//!
//! Each pool tracks, per reward asset, the rewards accumulated per unit of adjusted stake.
//! An account's pending reward is `stake * accumulated / STAKING_SCALE - debt`, and its debt is
//! reset whenever its stake changes.
use opr_rollup_interface::collaborators::Registry;
use opr_rollup_interface::entities::{AccountInfo, GlobalInfo, StakingPoolInfo};
use opr_rollup_interface::transition::{
    AddPoolTransition, DepositRewardTransition, StakeTransition, UnstakeTransition,
    UpdateEpochTransition, UpdatePoolTransition,
};
use opr_rollup_interface::PoolId;

use crate::fees::{charge_fee_asset, net_of_fee};
use crate::math::{adjusted_stake, credit, debit, mul_div, STAKING_SCALE};
use crate::{account_mut, pool_mut, EvaluationError, TransitionState};

/// Distributes the rewards emitted since the pool was last updated, bounded by the global
/// reward pools.
fn accrue_rewards(
    pool: &mut StakingPoolInfo,
    global: &mut GlobalInfo,
) -> Result<(), EvaluationError> {
    let from = pool.last_reward_epoch.max(pool.start_epoch);
    let epoch = global.curr_epoch;
    if epoch <= from {
        return Ok(());
    }
    let epochs = u128::from(epoch - from);
    let rewards = pool.reward_asset_ids.len();
    pool.accumulated_reward_per_unit.resize(rewards, 0);

    if pool.total_stakes > 0 {
        for (i, asset_id) in pool.reward_asset_ids.iter().enumerate() {
            let per_epoch = pool.reward_per_epoch.get(i).copied().unwrap_or(0);
            let emitted = per_epoch.saturating_mul(epochs);
            let reward = emitted.min(global.reward(*asset_id));
            if reward == 0 {
                continue;
            }
            debit(global.reward_mut(*asset_id), reward, "reward pool")?;
            let per_unit = mul_div(reward, STAKING_SCALE, pool.total_stakes)?;
            credit(&mut pool.accumulated_reward_per_unit[i], per_unit)?;
        }
    }
    pool.last_reward_epoch = epoch;
    Ok(())
}

fn earned(stake: u128, accumulated: u128) -> Result<u128, EvaluationError> {
    mul_div(stake, accumulated, STAKING_SCALE)
}

/// Pays out the account's pending rewards in the pool.
fn harvest(
    account: &mut AccountInfo,
    pool_id: PoolId,
    pool: &StakingPoolInfo,
) -> Result<(), EvaluationError> {
    let stake = account.stake(pool_id);
    let debts = account
        .reward_debts_mut(pool_id, pool.reward_asset_ids.len())
        .clone();
    for (i, asset_id) in pool.reward_asset_ids.iter().enumerate() {
        let accumulated = pool.accumulated_reward_per_unit.get(i).copied().unwrap_or(0);
        let pending = earned(stake, accumulated)?.saturating_sub(debts[i]);
        if pending > 0 {
            credit(account.idle_asset_mut(*asset_id), pending)?;
        }
    }
    Ok(())
}

/// Recomputes the account's adjusted stake after its staked shares changed.
fn restake(
    account: &mut AccountInfo,
    pool_id: PoolId,
    pool: &mut StakingPoolInfo,
) -> Result<(), EvaluationError> {
    let previous = account.stake(pool_id);
    let stake = adjusted_stake(
        account.staked_share(pool_id),
        pool.stake_adjustment_factor,
    )?;
    debit(&mut pool.total_stakes, previous, "pool stakes")?;
    credit(&mut pool.total_stakes, stake)?;
    *account.stake_mut(pool_id) = stake;

    let debts = account.reward_debts_mut(pool_id, pool.reward_asset_ids.len());
    for (debt, accumulated) in debts.iter_mut().zip(&pool.accumulated_reward_per_unit) {
        *debt = earned(stake, *accumulated)?;
    }
    Ok(())
}

pub(crate) fn stake(t: &StakeTransition, state: &mut TransitionState) -> Result<(), EvaluationError> {
    let TransitionState {
        accounts,
        staking_pool,
        global,
        ..
    } = state;
    let account = account_mut(&mut accounts[0], t.account_id)?;
    let pool = pool_mut(staking_pool, t.pool_id)?;
    accrue_rewards(pool, global)?;
    harvest(account, t.pool_id, pool)?;

    debit(account.share_mut(pool.strategy_id), t.shares, "shares")?;
    let staked = if t.fee.in_fee_asset {
        charge_fee_asset(account, global, t.fee.amount)?;
        t.shares
    } else {
        let staked = net_of_fee(t.shares, &t.fee)?;
        if t.fee.amount > 0 {
            credit(global.op_fee_share_mut(pool.strategy_id), t.fee.amount)?;
        }
        staked
    };
    credit(account.staked_share_mut(t.pool_id), staked)?;
    credit(&mut pool.total_shares, staked)?;
    restake(account, t.pool_id, pool)
}

pub(crate) fn unstake(
    t: &UnstakeTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    let TransitionState {
        accounts,
        staking_pool,
        global,
        ..
    } = state;
    let account = account_mut(&mut accounts[0], t.account_id)?;
    let pool = pool_mut(staking_pool, t.pool_id)?;
    accrue_rewards(pool, global)?;
    harvest(account, t.pool_id, pool)?;

    debit(
        account.staked_share_mut(t.pool_id),
        t.shares,
        "staked shares",
    )?;
    debit(&mut pool.total_shares, t.shares, "pool shares")?;
    let returned = if t.fee.in_fee_asset {
        charge_fee_asset(account, global, t.fee.amount)?;
        t.shares
    } else {
        let returned = net_of_fee(t.shares, &t.fee)?;
        if t.fee.amount > 0 {
            credit(global.op_fee_share_mut(pool.strategy_id), t.fee.amount)?;
        }
        returned
    };
    credit(account.share_mut(pool.strategy_id), returned)?;
    restake(account, t.pool_id, pool)
}

pub(crate) fn add_pool<R: Registry>(
    t: &AddPoolTransition,
    state: &mut TransitionState,
    registry: &R,
) -> Result<(), EvaluationError> {
    if t.pool_id == 0 {
        return Err(EvaluationError::Invalid("pool id 0 is reserved"));
    }
    if state.staking_pool.is_some() {
        return Err(EvaluationError::PoolExists(t.pool_id));
    }
    if registry.strategy_index_to_address(t.strategy_id).is_none() {
        return Err(EvaluationError::UnregisteredStrategy(t.strategy_id));
    }
    if t.reward_asset_ids.len() != t.reward_per_epoch.len() {
        return Err(EvaluationError::Invalid(
            "reward assets and emissions differ in length",
        ));
    }
    if t.stake_adjustment_factor > STAKING_SCALE {
        return Err(EvaluationError::Invalid(
            "stake adjustment factor exceeds its scale",
        ));
    }

    state.staking_pool = Some(StakingPoolInfo {
        strategy_id: t.strategy_id,
        reward_asset_ids: t.reward_asset_ids.clone(),
        reward_per_epoch: t.reward_per_epoch.clone(),
        total_shares: 0,
        total_stakes: 0,
        accumulated_reward_per_unit: vec![0; t.reward_asset_ids.len()],
        // Epochs before the pool existed emit nothing.
        last_reward_epoch: state.global.curr_epoch,
        stake_adjustment_factor: t.stake_adjustment_factor,
        start_epoch: t.start_epoch,
    });
    Ok(())
}

pub(crate) fn update_pool(
    t: &UpdatePoolTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    let pool = pool_mut(&mut state.staking_pool, t.pool_id)?;
    if t.reward_per_epoch.len() != pool.reward_asset_ids.len() {
        return Err(EvaluationError::Invalid(
            "reward assets and emissions differ in length",
        ));
    }
    accrue_rewards(pool, &mut state.global)?;
    pool.reward_per_epoch = t.reward_per_epoch.clone();
    Ok(())
}

pub(crate) fn deposit_reward(
    t: &DepositRewardTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    credit(state.global.reward_mut(t.asset_id), t.amount)
}

pub(crate) fn update_epoch(
    t: &UpdateEpochTransition,
    state: &mut TransitionState,
) -> Result<(), EvaluationError> {
    if t.epoch <= state.global.curr_epoch {
        return Err(EvaluationError::Invalid("epoch must increase"));
    }
    state.global.curr_epoch = t.epoch;
    Ok(())
}
