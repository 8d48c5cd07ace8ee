#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod account;
mod fees;
mod ledger;
pub mod math;
mod staking;
mod strategy;


pub use ledger::{LedgerError, LedgerState};
use opr_rollup_interface::collaborators::Registry;
use opr_rollup_interface::entities::{
    leaf_hash_of, AccountInfo, GlobalInfo, StakingPoolInfo, StrategyInfo, MAX_ASSET_ID,
    MAX_POOL_ID, MAX_STRATEGY_ID,
};
use opr_rollup_interface::transition::{Transition, TransitionError};
use opr_rollup_interface::{AccountId, AggregateId, Hash, PoolId, StrategyId, ZERO_HASH};
use thiserror::Error;
use tracing::debug;

/// Reasons a transition cannot be applied to the supplied state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// Init only fixes the empty state and is never re-executed.
    #[error("Init transitions are not evaluated")]
    NotEvaluable,
    /// The signature is malformed or does not belong to the source account.
    #[error("bad signature: {0}")]
    BadSignature(String),
    /// The transition timestamp does not exceed the account's last one.
    #[error("replayed or stale transition: account is at {current}, transition has {got}")]
    ReplayOrStaleTransition {
        /// Timestamp stored in the account.
        current: u64,
        /// Timestamp carried by the transition.
        got: u64,
    },
    /// The account leaf is empty.
    #[error("account {0} does not exist")]
    MissingAccount(AccountId),
    /// The account leaf belongs to another id or owner.
    #[error("account {0} does not match the transition")]
    AccountMismatch(AccountId),
    /// The strategy leaf is empty.
    #[error("strategy {0} does not exist")]
    MissingStrategy(StrategyId),
    /// The registry does not know the strategy.
    #[error("strategy {0} is not registered")]
    UnregisteredStrategy(StrategyId),
    /// The staking-pool leaf is empty.
    #[error("staking pool {0} does not exist")]
    MissingPool(PoolId),
    /// The staking-pool leaf is already taken.
    #[error("staking pool {0} already exists")]
    PoolExists(PoolId),
    /// A balance is too small for a debit.
    #[error("insufficient {what}: available {available}, needed {needed}")]
    Insufficient {
        /// The debited balance.
        what: &'static str,
        /// Its value.
        available: u128,
        /// The requested debit.
        needed: u128,
    },
    /// An amount does not fit in 128 bits.
    #[error("arithmetic overflow")]
    Overflow,
    /// A pro-rata share was computed over an empty total.
    #[error("division by zero")]
    DivisionByZero,
    /// An aggregate-orders transition disagrees with what was collected.
    #[error("aggregate {field} mismatch: collected {expected}, transition has {got}")]
    AggregateMismatch {
        /// The mismatching total.
        field: &'static str,
        /// Value derived from the pending aggregate.
        expected: u128,
        /// Value carried by the transition.
        got: u128,
    },
    /// No pending entry exists for the aggregate.
    #[error("aggregate {0} is not pending")]
    MissingAggregate(AggregateId),
    /// Execution results must arrive in aggregate order.
    #[error("expected the result of aggregate {expected}, got {got}")]
    UnexpectedAggregate {
        /// `last_exec_aggregate_id + 1`.
        expected: AggregateId,
        /// The transition's aggregate.
        got: AggregateId,
    },
    /// The transition is internally inconsistent.
    #[error("invalid transition: {0}")]
    Invalid(&'static str),
    /// An id does not fit the tree or balance vector it indexes.
    #[error("{kind} id {id} is out of range, the largest is {max}")]
    IdOutOfRange {
        /// What the id names.
        kind: &'static str,
        /// The id carried by the transition.
        id: u32,
        /// Largest valid id.
        max: u32,
    },
}

/// The entities a transition may read and write.
///
/// `accounts[0]` is the source account and `accounts[1]` the destination of a transfer.
/// Absent entities are `None`, which some transitions fill in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionState {
    /// Source and destination accounts.
    pub accounts: [Option<AccountInfo>; 2],
    /// The strategy named by the transition.
    pub strategy: Option<StrategyInfo>,
    /// The staking pool named by the transition.
    pub staking_pool: Option<StakingPoolInfo>,
    /// The global info.
    pub global: GlobalInfo,
}

/// New leaf hashes produced by one transition. [`ZERO_HASH`] marks an entity left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatedHashes {
    /// Source and destination account leaves.
    pub accounts: [Hash; 2],
    /// Strategy leaf.
    pub strategy: Hash,
    /// Staking-pool leaf.
    pub staking_pool: Hash,
    /// Global-info hash.
    pub global: Hash,
}

impl EvaluatedHashes {
    fn between(before: &TransitionState, after: &TransitionState) -> Self {
        fn changed<T: PartialEq>(before: &T, after: &T, hash: impl FnOnce() -> Hash) -> Hash {
            if before == after {
                ZERO_HASH
            } else {
                hash()
            }
        }

        Self {
            accounts: [0, 1].map(|i| {
                changed(&before.accounts[i], &after.accounts[i], || {
                    leaf_hash_of(after.accounts[i].as_ref())
                })
            }),
            strategy: changed(&before.strategy, &after.strategy, || {
                leaf_hash_of(after.strategy.as_ref())
            }),
            staking_pool: changed(&before.staking_pool, &after.staking_pool, || {
                leaf_hash_of(after.staking_pool.as_ref())
            }),
            global: changed(&before.global, &after.global, || after.global.hash()),
        }
    }
}

/// Ids of the tree leaves a transition claims to touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessIds {
    /// Source account.
    pub account_id: Option<AccountId>,
    /// Destination account of a transfer.
    pub account_id_dest: Option<AccountId>,
    /// Strategy.
    pub strategy_id: Option<StrategyId>,
    /// Staking pool.
    pub pool_id: Option<PoolId>,
}

impl AccessIds {
    /// Reads the ids out of a decoded transition.
    pub fn of(transition: &Transition) -> Self {
        let account = |id| Self {
            account_id: Some(id),
            ..Default::default()
        };
        match transition {
            Transition::Init(_)
            | Transition::DepositReward(_)
            | Transition::WithdrawProtocolFee(_)
            | Transition::UpdateEpoch(_) => Self::default(),
            Transition::Deposit(t) => account(t.account_id),
            Transition::Withdraw(t) => account(t.account_id),
            Transition::TransferOperatorFee(t) => account(t.account_id),
            Transition::Buy(t) => Self {
                strategy_id: Some(t.strategy_id),
                ..account(t.account_id)
            },
            Transition::Sell(t) => Self {
                strategy_id: Some(t.strategy_id),
                ..account(t.account_id)
            },
            Transition::Settlement(t) => Self {
                strategy_id: Some(t.strategy_id),
                ..account(t.account_id)
            },
            Transition::TransferAsset(t) => Self {
                account_id_dest: Some(t.to_account_id),
                ..account(t.from_account_id)
            },
            Transition::TransferShare(t) => Self {
                account_id_dest: Some(t.to_account_id),
                ..account(t.from_account_id)
            },
            Transition::AggregateOrders(t) => Self {
                strategy_id: Some(t.strategy_id),
                ..Default::default()
            },
            Transition::ExecutionResult(t) => Self {
                strategy_id: Some(t.strategy_id),
                ..Default::default()
            },
            Transition::Stake(t) => Self {
                pool_id: Some(t.pool_id),
                ..account(t.account_id)
            },
            Transition::Unstake(t) => Self {
                pool_id: Some(t.pool_id),
                ..account(t.account_id)
            },
            Transition::AddPool(t) => Self {
                pool_id: Some(t.pool_id),
                ..Default::default()
            },
            Transition::UpdatePool(t) => Self {
                pool_id: Some(t.pool_id),
                ..Default::default()
            },
        }
    }
}

/// Checks that every strategy, pool and asset id the transition carries is in range.
///
/// Transitions failing this can never be applied, whatever the state. Account ids always fit
/// the account tree.
pub fn check_id_bounds(transition: &Transition) -> Result<(), EvaluationError> {
    fn check(kind: &'static str, id: u32, max: u32) -> Result<(), EvaluationError> {
        if id > max {
            return Err(EvaluationError::IdOutOfRange { kind, id, max });
        }
        Ok(())
    }

    let ids = AccessIds::of(transition);
    if let Some(strategy_id) = ids.strategy_id {
        check("strategy", strategy_id, MAX_STRATEGY_ID)?;
    }
    if let Some(pool_id) = ids.pool_id {
        check("staking pool", pool_id, MAX_POOL_ID)?;
    }
    match transition {
        Transition::Deposit(t) => check("asset", t.asset_id, MAX_ASSET_ID),
        Transition::Withdraw(t) => check("asset", t.asset_id, MAX_ASSET_ID),
        Transition::TransferAsset(t) => check("asset", t.asset_id, MAX_ASSET_ID),
        Transition::DepositReward(t) => check("asset", t.asset_id, MAX_ASSET_ID),
        Transition::WithdrawProtocolFee(t) => check("asset", t.asset_id, MAX_ASSET_ID),
        Transition::AddPool(t) => {
            check("strategy", t.strategy_id, MAX_STRATEGY_ID)?;
            t.reward_asset_ids
                .iter()
                .try_for_each(|&asset_id| check("asset", asset_id, MAX_ASSET_ID))
        }
        _ => Ok(()),
    }
}

/// Decodes an encoded transition far enough to learn its claimed post-state root and the
/// leaves it touches, without executing it.
pub fn get_state_root_and_access_ids(encoded: &[u8]) -> Result<(Hash, AccessIds), TransitionError> {
    let transition = Transition::decode(encoded)?;
    Ok((transition.state_root(), AccessIds::of(&transition)))
}

/// Re-executes `transition` against `state` and returns the leaf hashes of the entities it
/// changed.
pub fn evaluate<R: Registry>(
    transition: &Transition,
    state: &TransitionState,
    registry: &R,
) -> Result<EvaluatedHashes, EvaluationError> {
    let mut next = state.clone();
    apply_transition(transition, &mut next, registry)?;
    Ok(EvaluatedHashes::between(state, &next))
}

/// Applies `transition` to `state` in place.
///
/// On error `state` may be partially updated and must be discarded.
pub fn apply_transition<R: Registry>(
    transition: &Transition,
    state: &mut TransitionState,
    registry: &R,
) -> Result<(), EvaluationError> {
    check_id_bounds(transition)?;
    let transition_type = transition.transition_type();
    if transition_type.is_user_signed() {
        let account_id = AccessIds::of(transition).account_id.unwrap_or_default();
        let account = account_mut(&mut state.accounts[0], account_id)?;
        account.timestamp = authorize(transition, account)?;
    }
    debug!(%transition_type, "Applying transition");

    match transition {
        Transition::Init(_) => Err(EvaluationError::NotEvaluable),
        Transition::Deposit(t) => account::deposit(t, state),
        Transition::Withdraw(t) => account::withdraw(t, state),
        Transition::TransferAsset(t) => account::transfer_asset(t, state),
        Transition::TransferShare(t) => account::transfer_share(t, state),
        Transition::Buy(t) => strategy::buy(t, state, registry),
        Transition::Sell(t) => strategy::sell(t, state),
        Transition::AggregateOrders(t) => strategy::aggregate_orders(t, state),
        Transition::ExecutionResult(t) => strategy::execution_result(t, state),
        Transition::Settlement(t) => strategy::settlement(t, state),
        Transition::Stake(t) => staking::stake(t, state),
        Transition::Unstake(t) => staking::unstake(t, state),
        Transition::AddPool(t) => staking::add_pool(t, state, registry),
        Transition::UpdatePool(t) => staking::update_pool(t, state),
        Transition::DepositReward(t) => staking::deposit_reward(t, state),
        Transition::UpdateEpoch(t) => staking::update_epoch(t, state),
        Transition::WithdrawProtocolFee(t) => fees::withdraw_protocol_fee(t, state),
        Transition::TransferOperatorFee(t) => fees::transfer_operator_fee(t, state),
    }
}

/// Checks that the source account signed the transition and that its timestamp is fresh.
/// Returns the new account timestamp.
fn authorize(transition: &Transition, account: &AccountInfo) -> Result<u64, EvaluationError> {
    let signer = transition
        .recover_signer()
        .map_err(|e| EvaluationError::BadSignature(e.to_string()))?;
    if signer != account.account {
        return Err(EvaluationError::BadSignature(format!(
            "signed by {signer}, account {} is owned by {}",
            account.account_id, account.account
        )));
    }
    let timestamp = transition.timestamp().unwrap_or_default();
    if timestamp <= account.timestamp {
        return Err(EvaluationError::ReplayOrStaleTransition {
            current: account.timestamp,
            got: timestamp,
        });
    }
    Ok(timestamp)
}

pub(crate) fn account_mut(
    slot: &mut Option<AccountInfo>,
    account_id: AccountId,
) -> Result<&mut AccountInfo, EvaluationError> {
    match slot {
        Some(account) if account.account_id == account_id => Ok(account),
        Some(_) => Err(EvaluationError::AccountMismatch(account_id)),
        None => Err(EvaluationError::MissingAccount(account_id)),
    }
}

pub(crate) fn strategy_mut(
    slot: &mut Option<StrategyInfo>,
    strategy_id: StrategyId,
) -> Result<&mut StrategyInfo, EvaluationError> {
    slot.as_mut()
        .ok_or(EvaluationError::MissingStrategy(strategy_id))
}

pub(crate) fn pool_mut(
    slot: &mut Option<StakingPoolInfo>,
    pool_id: PoolId,
) -> Result<&mut StakingPoolInfo, EvaluationError> {
    slot.as_mut().ok_or(EvaluationError::MissingPool(pool_id))
}
