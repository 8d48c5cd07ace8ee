//! Entry points of the rollup chain: block commit, execution, disputes and custody.
use borsh::{BorshDeserialize, BorshSerialize};
use opr_priority_queues::{PriorityEvent, PriorityQueueError};
use opr_rollup_interface::collaborators::{
    AggregateFill, AggregateOrder, AssetBank, Registry, Strategy, TransferError,
};
use opr_rollup_interface::optimistic::{DisputeProofs, TransitionProof};
use opr_rollup_interface::transition::{
    peek_transition_type, AggregateOrdersTransition, Transition, TransitionError, TransitionType,
};
use opr_rollup_interface::{Address, AssetId, StrategyId};
use opr_state::{Storage, WorkingSet};
use opr_transition_disputer::{block_root, BlockCommitment, DisputeError, FraudReason};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    intent_hash, Block, ChainStatus, HaltReason, RollupChain, WithdrawCommit, INTENT_EXECUTED,
};

/// This enumeration represents the available call messages for interacting with the
/// `RollupChain` module.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum CallMessage {
    /// Appends a block of encoded transitions. Operator only.
    CommitBlock {
        /// Must equal the number of committed blocks.
        block_id: u64,
        /// Encoded transitions, in order.
        transitions: Vec<Vec<u8>>,
    },
    /// Executes the next `exec_len` intents of a block.
    ExecuteBlock {
        /// Must equal the number of fully executed blocks.
        block_id: u64,
        /// Every intent of the block, as committed.
        intents: Vec<Vec<u8>>,
        /// How many intents to execute in this call.
        exec_len: u32,
    },
    /// Proves a committed transition fraudulent.
    DisputeTransition {
        /// The transition committed immediately before the disputed one.
        prior: TransitionProof,
        /// The disputed transition.
        disputed: TransitionProof,
        /// Witnesses of the state between the two.
        proofs: DisputeProofs,
    },
    /// Halts the chain if a priority event has waited too long.
    DisputePriorityDelay,
    /// Deposits `amount` of the asset at `asset` into the rollup.
    Deposit {
        /// Asset contract.
        asset: Address,
        /// Deposited amount.
        amount: u128,
    },
    /// Funds the staking reward pool of an asset.
    DepositReward {
        /// Asset contract.
        asset: Address,
        /// Deposited amount.
        amount: u128,
    },
    /// Advances the staking epoch to the one of the current height.
    UpdateEpoch,
    /// Pays out everything `account` can claim in `asset`.
    Withdraw {
        /// Receiver of the withdrawal.
        account: Address,
        /// Asset contract.
        asset: Address,
    },
    /// Stops commits, executions and withdrawals. Owner only.
    Pause,
    /// Resumes a paused or halted chain. Owner only.
    Unpause,
    /// Replaces the operator. Owner only.
    SetOperator(Address),
}

/// The caller of a message and the base-ledger height it is processed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// Sender of the message.
    pub sender: Address,
    /// Current base-ledger height.
    pub height: u64,
}

/// The external systems the chain calls into.
#[derive(Debug, Clone, Default)]
pub struct Collaborators<R, B> {
    /// Asset and strategy registry.
    pub registry: R,
    /// Asset custody.
    pub bank: B,
}

/// Errors raised by the chain. The working set must be reverted when a call fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RollupChainError {
    /// The chain is not accepting this call.
    #[error("chain is {0}")]
    NotActive(ChainStatus),
    /// The sender lacks the role the call needs.
    #[error("{sender} is not the {role}")]
    Unauthorized {
        /// Missing role.
        role: &'static str,
        /// Sender of the call.
        sender: Address,
    },
    /// Blocks are appended without gaps.
    #[error("expected block {expected}, got {got}")]
    UnexpectedBlockId {
        /// The next block id.
        expected: u64,
        /// The supplied block id.
        got: u64,
    },
    /// Blocks must hold at least one transition.
    #[error("empty block")]
    EmptyBlock,
    /// A transition the chain must read does not decode.
    #[error("transition {index} does not decode: {source}")]
    MalformedTransition {
        /// Position in the block.
        index: usize,
        /// The codec error.
        #[source]
        source: TransitionError,
    },
    /// A transition does not match its priority queue.
    #[error(transparent)]
    PriorityQueue(#[from] PriorityQueueError),
    /// No block with this id was committed.
    #[error("unknown block {0}")]
    UnknownBlock(u64),
    /// Blocks are executed in order.
    #[error("block {expected} executes next, got {got}")]
    OutOfOrderExecution {
        /// The next block to execute.
        expected: u64,
        /// The supplied block id.
        got: u64,
    },
    /// The block can still be disputed.
    #[error("challenge period of block {block_id} ends after height {ends_at}")]
    ChallengePeriodNotOver {
        /// The block.
        block_id: u64,
        /// Last height at which it can be disputed.
        ends_at: u64,
    },
    /// The block can no longer be disputed.
    #[error("challenge period of block {block_id} ended at height {ended_at}")]
    ChallengePeriodOver {
        /// The block.
        block_id: u64,
        /// Last height at which it could be disputed.
        ended_at: u64,
    },
    /// The supplied intents are not the ones committed.
    #[error("intents do not match block {0}")]
    IntentHashMismatch(u64),
    /// `exec_len` exceeds the remaining intents, or is zero while intents remain.
    #[error("invalid data length: {requested} requested, {remaining} remaining")]
    InvalidDataLength {
        /// Requested intents.
        requested: u32,
        /// Intents not yet executed.
        remaining: u32,
    },
    /// The dispute was refused.
    #[error("Failed to dispute: {0}")]
    DisputeFailed(#[source] DisputeError),
    /// No priority event is overdue.
    #[error("no priority event exceeds the maximum delay")]
    NoPriorityDelay,
    /// The asset is not registered.
    #[error("asset {0} is not registered")]
    UnregisteredAsset(Address),
    /// Deposits must move value.
    #[error("amount must be positive")]
    ZeroAmount,
    /// The base-ledger transfer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// The epoch of the current height was already enqueued.
    #[error("epoch {epoch} does not follow {last}")]
    StaleEpoch {
        /// Last enqueued epoch.
        last: u64,
        /// Epoch of the current height.
        epoch: u64,
    },
    /// Nothing is claimable.
    #[error("{account} has nothing to withdraw in {asset}")]
    NothingToWithdraw {
        /// Receiver.
        account: Address,
        /// Asset contract.
        asset: Address,
    },
}

/// The priority event a committed transition consumes, if any.
fn consumed_event(transition: &Transition) -> Option<PriorityEvent> {
    match transition {
        Transition::Deposit(t) => Some(PriorityEvent::Deposit {
            account: t.account,
            asset_id: t.asset_id,
            amount: t.amount,
        }),
        Transition::DepositReward(t) => Some(PriorityEvent::Deposit {
            account: Address::ZERO,
            asset_id: t.asset_id,
            amount: t.amount,
        }),
        Transition::UpdateEpoch(t) => Some(PriorityEvent::EpochUpdate { epoch: t.epoch }),
        Transition::ExecutionResult(t) => Some(PriorityEvent::ExecutionResult {
            strategy_id: t.strategy_id,
            aggregate_id: t.aggregate_id,
            success: t.success,
            shares_from_buy: t.shares_from_buy,
            amount_from_sell: t.amount_from_sell,
        }),
        _ => None,
    }
}

/// Whether the chain needs to read a transition of this type at commit time. Other transitions
/// are committed opaquely and only decoded by a dispute.
fn read_at_commit(ty: TransitionType) -> bool {
    matches!(
        ty,
        TransitionType::Deposit
            | TransitionType::DepositReward
            | TransitionType::UpdateEpoch
            | TransitionType::ExecutionResult
            | TransitionType::Withdraw
            | TransitionType::WithdrawProtocolFee
            | TransitionType::AggregateOrders
    )
}

/// Decodes an intent committed by [`RollupChain::commit_block`].
fn decode_intent(index: usize, bytes: &[u8]) -> Result<AggregateOrdersTransition, RollupChainError> {
    match Transition::decode(bytes) {
        Ok(Transition::AggregateOrders(t)) => Ok(t),
        Ok(other) => Err(RollupChainError::MalformedTransition {
            index,
            source: TransitionError::Malformed {
                ty: other.transition_type(),
                reason: "not an aggregate order".to_owned(),
            },
        }),
        Err(source) => Err(RollupChainError::MalformedTransition { index, source }),
    }
}

impl RollupChain {
    /// Dispatches a call message.
    pub fn call<R: Registry, B: AssetBank, S: Storage>(
        &self,
        msg: CallMessage,
        context: &CallContext,
        collaborators: &mut Collaborators<R, B>,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        match msg {
            CallMessage::CommitBlock {
                block_id,
                transitions,
            } => self.commit_block(block_id, transitions, context, working_set),
            CallMessage::ExecuteBlock {
                block_id,
                intents,
                exec_len,
            } => self.execute_block(
                block_id,
                &intents,
                exec_len,
                context,
                &mut collaborators.registry,
                working_set,
            ),
            CallMessage::DisputeTransition {
                prior,
                disputed,
                proofs,
            } => self
                .dispute_transition(
                    &prior,
                    &disputed,
                    &proofs,
                    context,
                    &collaborators.registry,
                    working_set,
                )
                .map(|_| ()),
            CallMessage::DisputePriorityDelay => {
                if self.dispute_priority_delay(working_set) {
                    Ok(())
                } else {
                    Err(RollupChainError::NoPriorityDelay)
                }
            }
            CallMessage::Deposit { asset, amount } => {
                self.deposit(&asset, amount, context, collaborators, working_set)
            }
            CallMessage::DepositReward { asset, amount } => {
                self.deposit_reward(&asset, amount, context, collaborators, working_set)
            }
            CallMessage::UpdateEpoch => self.update_epoch(context, working_set),
            CallMessage::Withdraw { account, asset } => {
                self.withdraw(&account, &asset, collaborators, working_set)
            }
            CallMessage::Pause => self.pause(context, working_set),
            CallMessage::Unpause => self.unpause(context, working_set),
            CallMessage::SetOperator(operator) => {
                self.set_operator(operator, context, working_set)
            }
        }
    }

    fn ensure_active<S: Storage>(
        &self,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        match self.status.get(working_set).unwrap_or_default() {
            ChainStatus::Active => Ok(()),
            status => Err(RollupChainError::NotActive(status)),
        }
    }

    fn ensure_owner<S: Storage>(
        &self,
        sender: &Address,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        if self.owner.get(working_set).as_ref() != Some(sender) {
            return Err(RollupChainError::Unauthorized {
                role: "owner",
                sender: *sender,
            });
        }
        Ok(())
    }

    fn block<S: Storage>(
        &self,
        block_id: u64,
        working_set: &mut WorkingSet<S>,
    ) -> Result<Block, RollupChainError> {
        self.blocks
            .get_or_err(block_id, working_set)
            .map_err(|_| RollupChainError::UnknownBlock(block_id))
    }

    /// Appends a block of encoded transitions.
    ///
    /// Matches every transition that consumes a priority event against its queue, records the
    /// block's withdrawals and commits its aggregate orders as intents.
    pub fn commit_block<S: Storage>(
        &self,
        block_id: u64,
        transitions: Vec<Vec<u8>>,
        context: &CallContext,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        self.ensure_active(working_set)?;
        if self.operator.get(working_set) != Some(context.sender) {
            return Err(RollupChainError::Unauthorized {
                role: "operator",
                sender: context.sender,
            });
        }
        let expected = self.blocks.len(working_set);
        if block_id != expected {
            return Err(RollupChainError::UnexpectedBlockId {
                expected,
                got: block_id,
            });
        }
        if transitions.is_empty() {
            return Err(RollupChainError::EmptyBlock);
        }

        let fee_receiver = self
            .protocol_fee_receiver
            .get(working_set)
            .unwrap_or_default();
        let mut intents = Vec::new();
        let mut withdraw_commits = Vec::new();
        for (index, bytes) in transitions.iter().enumerate() {
            let ty = match peek_transition_type(bytes) {
                Ok(Some(ty)) if read_at_commit(ty) => ty,
                _ => continue,
            };
            let transition = Transition::decode(bytes)
                .map_err(|source| RollupChainError::MalformedTransition { index, source })?;
            debug!(block_id, index, transition_type = %ty, "Reading committed transition");

            if let Some(event) = consumed_event(&transition) {
                self.queues
                    .check_and_advance(&event, block_id, working_set)?;
            }
            match &transition {
                Transition::Withdraw(t) => withdraw_commits.push(WithdrawCommit {
                    account: t.account,
                    asset_id: t.asset_id,
                    amount: t.net_amount(),
                }),
                Transition::WithdrawProtocolFee(t) => withdraw_commits.push(WithdrawCommit {
                    account: fee_receiver,
                    asset_id: t.asset_id,
                    amount: t.amount,
                }),
                Transition::AggregateOrders(_) => intents.push(bytes.as_slice()),
                _ => {}
            }
        }

        let block = Block {
            root_hash: block_root(&transitions),
            intent_hash: intent_hash(&intents),
            intent_exec_count: 0,
            block_time: context.height,
            block_size: transitions.len() as u64,
        };
        self.blocks.push(&block, working_set);
        if !withdraw_commits.is_empty() {
            self.withdraw_commits
                .set(&block_id, &withdraw_commits, working_set);
        }

        working_set.add_event(
            "rollup_block_committed",
            &format!(
                "block {block_id}: {} transitions, {} intents, root 0x{}",
                block.block_size,
                intents.len(),
                hex::encode(block.root_hash)
            ),
        );
        info!(
            block_id,
            size = block.block_size,
            intents = intents.len(),
            withdrawals = withdraw_commits.len(),
            "Committed block"
        );
        Ok(())
    }

    /// Executes intents `[exec_count, exec_count + exec_len)` of the next block to execute.
    ///
    /// The first execution of a block finalizes the priority events it consumed and makes its
    /// withdrawals claimable. A failing strategy is recorded as an unsuccessful execution.
    pub fn execute_block<R: Registry, S: Storage>(
        &self,
        block_id: u64,
        intents: &[Vec<u8>],
        exec_len: u32,
        context: &CallContext,
        registry: &mut R,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        self.ensure_active(working_set)?;
        let expected = self.executed_count.get(working_set).unwrap_or_default();
        if block_id != expected {
            return Err(RollupChainError::OutOfOrderExecution {
                expected,
                got: block_id,
            });
        }
        let mut block = self.block(block_id, working_set)?;
        let ends_at = block
            .block_time
            .saturating_add(self.challenge_period.get(working_set).unwrap_or_default());
        if context.height <= ends_at {
            return Err(RollupChainError::ChallengePeriodNotOver { block_id, ends_at });
        }
        if intent_hash(intents) != block.intent_hash {
            return Err(RollupChainError::IntentHashMismatch(block_id));
        }

        let total = u32::try_from(intents.len()).map_err(|_| {
            RollupChainError::InvalidDataLength {
                requested: exec_len,
                remaining: u32::MAX,
            }
        })?;
        let done = block.intent_exec_count;
        let remaining = total - done;
        if exec_len > remaining || (exec_len == 0 && remaining > 0) {
            return Err(RollupChainError::InvalidDataLength {
                requested: exec_len,
                remaining,
            });
        }
        let orders = intents[done as usize..(done + exec_len) as usize]
            .iter()
            .enumerate()
            .map(|(i, bytes)| decode_intent(done as usize + i, bytes))
            .collect::<Result<Vec<_>, _>>()?;

        if done == 0 {
            self.finalize_block(block_id, working_set);
        }
        for order in &orders {
            self.execute_intent(order, registry, working_set);
        }

        block.intent_exec_count = done + exec_len;
        if block.intent_exec_count == total {
            block.intent_exec_count = INTENT_EXECUTED;
            self.executed_count.set(&(block_id + 1), working_set);
        }
        self.blocks
            .set(block_id, &block, working_set)
            .map_err(|_| RollupChainError::UnknownBlock(block_id))?;

        let progress = if block.is_executed() {
            "fully executed".to_owned()
        } else {
            format!("{}/{total} intents executed", block.intent_exec_count)
        };
        working_set.add_event(
            "rollup_block_executed",
            &format!("block {block_id}: {progress}"),
        );
        info!(block_id, executed = exec_len, %progress, "Executed block");
        Ok(())
    }

    /// Drops the priority events consumed by the block and moves its withdrawals into the
    /// claimable balances.
    fn finalize_block<S: Storage>(&self, block_id: u64, working_set: &mut WorkingSet<S>) {
        self.queues.cleanup(block_id, working_set);
        let commits = self
            .withdraw_commits
            .remove(&block_id, working_set)
            .unwrap_or_default();
        for commit in &commits {
            let key = (commit.account, commit.asset_id);
            let balance = self
                .pending_withdraws
                .get(&key, working_set)
                .unwrap_or_default();
            self.pending_withdraws
                .set(&key, &balance.saturating_add(commit.amount), working_set);
        }
        debug!(block_id, withdrawals = commits.len(), "Finalized block");
    }

    fn execute_intent<R: Registry, S: Storage>(
        &self,
        order: &AggregateOrdersTransition,
        registry: &mut R,
        working_set: &mut WorkingSet<S>,
    ) {
        let strategy_id = order.strategy_id;
        let aggregate_id = self
            .next_aggregate_ids
            .get(&strategy_id, working_set)
            .unwrap_or(1);
        self.next_aggregate_ids
            .set(&strategy_id, &(aggregate_id + 1), working_set);

        let request = AggregateOrder {
            buy_amount: order.buy_amount,
            sell_shares: order.sell_shares,
            min_shares_from_buy: order.min_shares_from_buy,
            min_amount_from_sell: order.min_amount_from_sell,
        };
        let fill = call_strategy(strategy_id, &request, registry);
        let (success, fill) = match fill {
            Some(fill) => (true, fill),
            None => (false, AggregateFill::default()),
        };

        let event = PriorityEvent::ExecutionResult {
            strategy_id,
            aggregate_id,
            success,
            shares_from_buy: fill.shares_from_buy,
            amount_from_sell: fill.amount_from_sell,
        };
        let block_count = self.blocks.len(working_set);
        self.queues.enqueue(&event, block_count, working_set);
        working_set.add_event(
            "aggregation_executed",
            &format!(
                "strategy {strategy_id} aggregate {aggregate_id}: success {success}, {} shares from buy, {} from sell",
                fill.shares_from_buy, fill.amount_from_sell
            ),
        );
    }

    /// Checks a dispute and, if it proves fraud, rolls the ledger back to the disputed block
    /// and halts the chain. Available in every status.
    pub fn dispute_transition<R: Registry, S: Storage>(
        &self,
        prior: &TransitionProof,
        disputed: &TransitionProof,
        proofs: &DisputeProofs,
        context: &CallContext,
        registry: &R,
        working_set: &mut WorkingSet<S>,
    ) -> Result<FraudReason, RollupChainError> {
        let block_id = disputed.block_id;
        let disputed_block = self.block(block_id, working_set)?;
        let ended_at = disputed_block
            .block_time
            .saturating_add(self.challenge_period.get(working_set).unwrap_or_default());
        if context.height > ended_at {
            return Err(RollupChainError::ChallengePeriodOver { block_id, ended_at });
        }
        let prior_block = if disputed.block_id == 0 && disputed.index == 0 {
            disputed_block.clone()
        } else {
            self.block(prior.block_id, working_set)?
        };

        let reason = opr_transition_disputer::dispute_transition(
            prior,
            &commitment(&prior_block),
            disputed,
            &commitment(&disputed_block),
            proofs,
            registry,
        )
        .map_err(|e| {
            debug!(block_id, index = disputed.index, error = %e, "Dispute refused");
            RollupChainError::DisputeFailed(e)
        })?;

        self.revert_blocks(block_id, &reason, working_set);
        Ok(reason)
    }

    /// Truncates the ledger to `block_id`, returns the consumed priority events to their queues
    /// and halts the chain.
    fn revert_blocks<S: Storage>(
        &self,
        block_id: u64,
        reason: &FraudReason,
        working_set: &mut WorkingSet<S>,
    ) {
        let count = self.blocks.len(working_set);
        for reverted in block_id..count {
            self.withdraw_commits.delete(&reverted, working_set);
        }
        self.blocks.truncate(block_id, working_set);
        self.queues.revert(block_id, working_set);

        let status = ChainStatus::Halted(HaltReason::Fraud { batch_id: block_id });
        self.status.set(&status, working_set);
        working_set.add_event(
            "rollup_block_reverted",
            &format!("block {block_id}: {reason}"),
        );
        working_set.add_event("chain_halted", &status.to_string());
        warn!(block_id, reverted = count - block_id, %reason, "Fraud proven, reverted blocks");
    }

    /// Halts the chain if the oldest pending deposit or epoch update has waited more than
    /// `max_priority_delay` blocks. Returns whether it did.
    pub fn dispute_priority_delay<S: Storage>(&self, working_set: &mut WorkingSet<S>) -> bool {
        let block_count = self.blocks.len(working_set);
        let max_delay = self.max_priority_delay.get(working_set).unwrap_or_default();
        if !self
            .queues
            .priority_delay_exceeded(block_count, max_delay, working_set)
        {
            return false;
        }
        // A fraud halt is kept, it names the block to recover from.
        let status = self.status.get(working_set).unwrap_or_default();
        if !matches!(status, ChainStatus::Halted(HaltReason::Fraud { .. })) {
            let status = ChainStatus::Halted(HaltReason::PriorityDelay);
            self.status.set(&status, working_set);
            working_set.add_event("chain_halted", &status.to_string());
        }
        warn!(block_count, max_delay, "Priority events are overdue");
        true
    }

    fn asset_id<R: Registry>(asset: &Address, registry: &R) -> Result<AssetId, RollupChainError> {
        match registry.asset_address_to_index(asset) {
            0 => Err(RollupChainError::UnregisteredAsset(*asset)),
            asset_id => Ok(asset_id),
        }
    }

    /// Moves `amount` of `asset` from the sender to the chain's custody address.
    fn take_custody<R: Registry, B: AssetBank, S: Storage>(
        &self,
        asset: &Address,
        amount: u128,
        context: &CallContext,
        collaborators: &mut Collaborators<R, B>,
        working_set: &mut WorkingSet<S>,
    ) -> Result<AssetId, RollupChainError> {
        self.ensure_active(working_set)?;
        if amount == 0 {
            return Err(RollupChainError::ZeroAmount);
        }
        let asset_id = Self::asset_id(asset, &collaborators.registry)?;
        let chain_address = self.chain_address.get(working_set).unwrap_or_default();
        collaborators
            .bank
            .transfer_from(asset, &context.sender, &chain_address, amount)?;
        Ok(asset_id)
    }

    fn queue_deposit<S: Storage>(
        &self,
        account: Address,
        asset_id: AssetId,
        amount: u128,
        working_set: &mut WorkingSet<S>,
    ) -> u64 {
        let event = PriorityEvent::Deposit {
            account,
            asset_id,
            amount,
        };
        let block_count = self.blocks.len(working_set);
        self.queues.enqueue(&event, block_count, working_set)
    }

    /// Moves `amount` of `asset` from the sender into custody and queues the deposit for the
    /// operator to include.
    pub fn deposit<R: Registry, B: AssetBank, S: Storage>(
        &self,
        asset: &Address,
        amount: u128,
        context: &CallContext,
        collaborators: &mut Collaborators<R, B>,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        let asset_id = self.take_custody(asset, amount, context, collaborators, working_set)?;
        let index = self.queue_deposit(context.sender, asset_id, amount, working_set);
        working_set.add_event(
            "asset_deposited",
            &format!("{} deposited {amount} of asset {asset_id}", context.sender),
        );
        info!(sender = %context.sender, asset_id, amount, index, "Queued deposit");
        Ok(())
    }

    /// Like [`RollupChain::deposit`], but funds the staking reward pool. Reward deposits
    /// travel through the deposit queue with the zero address as depositor.
    pub fn deposit_reward<R: Registry, B: AssetBank, S: Storage>(
        &self,
        asset: &Address,
        amount: u128,
        context: &CallContext,
        collaborators: &mut Collaborators<R, B>,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        let asset_id = self.take_custody(asset, amount, context, collaborators, working_set)?;
        let index = self.queue_deposit(Address::ZERO, asset_id, amount, working_set);
        working_set.add_event(
            "reward_deposited",
            &format!("{} deposited {amount} of reward asset {asset_id}", context.sender),
        );
        info!(sender = %context.sender, asset_id, amount, index, "Queued reward deposit");
        Ok(())
    }

    /// Queues an epoch update to the epoch of the current height.
    pub fn update_epoch<S: Storage>(
        &self,
        context: &CallContext,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        self.ensure_active(working_set)?;
        let blocks_per_epoch = self.blocks_per_epoch.get(working_set).unwrap_or(1).max(1);
        let epoch = context.height / blocks_per_epoch;
        let last = self.last_epoch.get(working_set).unwrap_or_default();
        if epoch <= last {
            return Err(RollupChainError::StaleEpoch { last, epoch });
        }
        self.last_epoch.set(&epoch, working_set);

        let block_count = self.blocks.len(working_set);
        self.queues
            .enqueue(&PriorityEvent::EpochUpdate { epoch }, block_count, working_set);
        working_set.add_event("epoch_updated", &epoch.to_string());
        info!(epoch, "Queued epoch update");
        Ok(())
    }

    /// Pays out everything `account` can claim in `asset`.
    pub fn withdraw<R: Registry, B: AssetBank, S: Storage>(
        &self,
        account: &Address,
        asset: &Address,
        collaborators: &mut Collaborators<R, B>,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        self.ensure_active(working_set)?;
        let asset_id = Self::asset_id(asset, &collaborators.registry)?;
        let key = (*account, asset_id);
        let amount = match self.pending_withdraws.remove(&key, working_set) {
            Some(amount) if amount > 0 => amount,
            _ => {
                return Err(RollupChainError::NothingToWithdraw {
                    account: *account,
                    asset: *asset,
                })
            }
        };
        let chain_address = self.chain_address.get(working_set).unwrap_or_default();
        collaborators
            .bank
            .transfer_from(asset, &chain_address, account, amount)?;

        working_set.add_event(
            "asset_withdrawn",
            &format!("{account} withdrew {amount} of asset {asset_id}"),
        );
        info!(%account, asset_id, amount, "Paid out withdrawal");
        Ok(())
    }

    /// Stops commits, executions and withdrawals.
    pub fn pause<S: Storage>(
        &self,
        context: &CallContext,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        self.ensure_owner(&context.sender, working_set)?;
        self.ensure_active(working_set)?;
        self.status.set(&ChainStatus::Paused, working_set);
        working_set.add_event("chain_halted", &ChainStatus::Paused.to_string());
        info!("Chain paused");
        Ok(())
    }

    /// Returns a paused or halted chain to normal operation.
    pub fn unpause<S: Storage>(
        &self,
        context: &CallContext,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        self.ensure_owner(&context.sender, working_set)?;
        let previous = self.status.get(working_set).unwrap_or_default();
        self.status.set(&ChainStatus::Active, working_set);
        working_set.add_event("chain_resumed", &format!("was {previous}"));
        info!(%previous, "Chain resumed");
        Ok(())
    }

    /// Replaces the operator.
    pub fn set_operator<S: Storage>(
        &self,
        operator: Address,
        context: &CallContext,
        working_set: &mut WorkingSet<S>,
    ) -> Result<(), RollupChainError> {
        self.ensure_owner(&context.sender, working_set)?;
        self.operator.set(&operator, working_set);
        working_set.add_event("operator_changed", &operator.to_string());
        info!(%operator, "Operator changed");
        Ok(())
    }
}

fn commitment(block: &Block) -> BlockCommitment {
    BlockCommitment {
        root_hash: block.root_hash,
        size: block.block_size,
    }
}

/// Executes an aggregate order on its strategy. `None` if the strategy is unknown or the call
/// failed.
fn call_strategy<R: Registry>(
    strategy_id: StrategyId,
    order: &AggregateOrder,
    registry: &mut R,
) -> Option<AggregateFill> {
    let Some(address) = registry.strategy_index_to_address(strategy_id) else {
        warn!(strategy_id, "Aggregate order for an unregistered strategy");
        return None;
    };
    let Some(strategy) = registry.strategy_mut(&address) else {
        warn!(strategy_id, %address, "No adapter deployed for strategy");
        return None;
    };
    match strategy.aggregate_orders(order) {
        Ok(fill) => Some(fill),
        Err(e) => {
            warn!(strategy_id, error = %e, "Strategy call failed");
            None
        }
    }
}
