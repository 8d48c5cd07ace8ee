#![allow(dead_code)]

use opr_rollup_chain::{
    CallContext, CallMessage, Collaborators, RollupChain, RollupChainConfig, RollupChainError,
};
use opr_rollup_interface::collaborators::AssetBank;
use opr_rollup_interface::crypto::signature::{address_of_secret, Signature};
use opr_rollup_interface::events::Event;
use opr_rollup_interface::mocks::{MockAssetBank, MockRegistry, MockStrategy, MOCK_PRICE_SCALE};
use opr_rollup_interface::optimistic::{DisputeProofs, TransitionProof};
use opr_rollup_interface::transition::*;
use opr_rollup_interface::{AccountId, Address, AggregateId, AssetId, Hash, StrategyId, ZERO_HASH};
use opr_state::{InMemoryStorage, WorkingSet};
use opr_transition_disputer::transition_proof;
use opr_transition_evaluator::math::PRICE_SCALE;
use opr_transition_evaluator::LedgerState;
use secp256k1::SecretKey;
use tracing_subscriber::EnvFilter;

pub const OWNER: Address = Address([0x0a; 20]);
pub const OPERATOR: Address = Address([0x0b; 20]);
pub const CHAIN_ADDRESS: Address = Address([0x0c; 20]);
pub const FEE_RECEIVER: Address = Address([0x0d; 20]);

pub const FEE_ASSET_ADDRESS: Address = Address([0xfe; 20]);
pub const USDC_ADDRESS: Address = Address([0xdc; 20]);
pub const STRATEGY_ADDRESS: Address = Address([0x51; 20]);
pub const USDC: AssetId = 2;
pub const STRATEGY: StrategyId = 1;

pub const CHALLENGE_PERIOD: u64 = 10;
pub const MAX_PRIORITY_DELAY: u64 = 2;
pub const BLOCKS_PER_EPOCH: u64 = 100;
pub const INITIAL_BALANCE: u128 = 1_000;

pub const ALICE: u8 = 0xa1;
pub const BOB: u8 = 0xb0;
pub const FORGED_ROOT: Hash = [7; 32];

pub fn key(seed: u8) -> SecretKey {
    SecretKey::from_slice(&[seed; 32]).unwrap()
}

pub fn owner(seed: u8) -> Address {
    address_of_secret(&key(seed))
}

pub fn signed(mut transition: Transition, seed: u8) -> Transition {
    transition.sign(&key(seed)).unwrap();
    transition
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> RollupChainConfig {
    RollupChainConfig {
        owner: OWNER,
        operator: OPERATOR,
        chain_address: CHAIN_ADDRESS,
        protocol_fee_receiver: FEE_RECEIVER,
        challenge_period: CHALLENGE_PERIOD,
        max_priority_delay: MAX_PRIORITY_DELAY,
        blocks_per_epoch: BLOCKS_PER_EPOCH,
    }
}

pub fn deposit(seed: u8, account_id: AccountId, amount: u128) -> Transition {
    Transition::Deposit(DepositTransition {
        state_root: ZERO_HASH,
        account: owner(seed),
        account_id,
        asset_id: USDC,
        amount,
    })
}

pub fn withdraw(seed: u8, account_id: AccountId, amount: u128, fee: Fee, timestamp: u64) -> Transition {
    signed(
        Transition::Withdraw(WithdrawTransition {
            state_root: ZERO_HASH,
            account: owner(seed),
            account_id,
            asset_id: USDC,
            amount,
            fee,
            timestamp,
            signature: Signature::default(),
        }),
        seed,
    )
}

pub fn buy(seed: u8, account_id: AccountId, amount: u128, timestamp: u64) -> Transition {
    signed(
        Transition::Buy(BuyTransition {
            state_root: ZERO_HASH,
            account_id,
            strategy_id: STRATEGY,
            amount,
            max_share_price: 3 * PRICE_SCALE,
            fee: Fee::in_kind(0),
            timestamp,
            signature: Signature::default(),
        }),
        seed,
    )
}

pub fn settlement(account_id: AccountId, aggregate_id: AggregateId) -> Transition {
    Transition::Settlement(SettlementTransition {
        state_root: ZERO_HASH,
        strategy_id: STRATEGY,
        aggregate_id,
        account_id,
    })
}

/// A transition as committed, with the witnesses of the state it was applied to.
pub struct Entry {
    pub encoded: Vec<u8>,
    pub proofs: DisputeProofs,
}

/// A rollup chain driven by an operator that keeps its own copy of the rollup state.
///
/// Calls are reverted when they fail, the way the runtime reverts a failed call.
pub struct TestChain {
    pub chain: RollupChain,
    pub collaborators: Collaborators<MockRegistry, MockAssetBank>,
    working_set: Option<WorkingSet<InMemoryStorage>>,
    pub events: Vec<Event>,
    pub height: u64,
    /// The operator's state, including transitions not committed yet.
    pub ledger: LedgerState,
    /// The operator's state after the last committed block.
    committed: LedgerState,
    /// The operator's state before each committed block.
    snapshots: Vec<LedgerState>,
    /// Committed blocks.
    pub blocks: Vec<Vec<Entry>>,
}

impl TestChain {
    /// A chain whose block 0, holding the Init transition, is committed at height 1.
    pub fn new() -> Self {
        init_logging();
        let mut registry = MockRegistry::default();
        registry.register_asset(FEE_ASSET_ADDRESS);
        assert_eq!(registry.register_asset(USDC_ADDRESS), USDC);
        let strategy = MockStrategy::new(USDC_ADDRESS, 2 * MOCK_PRICE_SCALE);
        assert_eq!(
            registry.register_strategy(STRATEGY_ADDRESS, strategy),
            STRATEGY
        );
        let mut bank = MockAssetBank::default();
        for seed in [ALICE, BOB] {
            bank.mint(USDC_ADDRESS, owner(seed), INITIAL_BALANCE);
        }

        let chain = RollupChain::default();
        let mut working_set = WorkingSet::new(InMemoryStorage::default());
        chain.init_module(&config(), &mut working_set).unwrap();

        let mut test_chain = Self {
            chain,
            collaborators: Collaborators { registry, bank },
            working_set: Some(working_set.checkpoint().to_revertable()),
            events: Vec::new(),
            height: 1,
            ledger: LedgerState::default(),
            committed: LedgerState::default(),
            snapshots: Vec::new(),
            blocks: Vec::new(),
        };
        let genesis = test_chain.honest(Transition::Init(InitTransition {
            state_root: ZERO_HASH,
        }));
        test_chain.commit(vec![genesis]).unwrap();
        test_chain
    }

    pub fn call(&mut self, sender: Address, msg: CallMessage) -> Result<(), RollupChainError> {
        let context = CallContext {
            sender,
            height: self.height,
        };
        let mut working_set = self.working_set.take().unwrap();
        let result = self
            .chain
            .call(msg, &context, &mut self.collaborators, &mut working_set);
        self.working_set = Some(match result {
            Ok(()) => {
                self.events.extend(working_set.take_events());
                working_set.checkpoint().to_revertable()
            }
            Err(_) => working_set.revert().to_revertable(),
        });
        result
    }

    /// Runs a read-only accessor against the current state.
    pub fn query<T>(
        &mut self,
        f: impl FnOnce(&RollupChain, &mut WorkingSet<InMemoryStorage>) -> T,
    ) -> T {
        let working_set = self.working_set.as_mut().unwrap();
        f(&self.chain, working_set)
    }

    pub fn advance(&mut self, blocks: u64) {
        self.height += blocks;
    }

    pub fn balance(&self, account: &Address) -> u128 {
        self.collaborators.bank.balance_of(&USDC_ADDRESS, account)
    }

    pub fn user_deposit(&mut self, seed: u8, amount: u128) -> Result<(), RollupChainError> {
        self.call(
            owner(seed),
            CallMessage::Deposit {
                asset: USDC_ADDRESS,
                amount,
            },
        )
    }

    /// Applies a transition to the operator's state.
    pub fn honest(&mut self, transition: Transition) -> Entry {
        let proofs = self.ledger.dispute_proofs(&transition).unwrap();
        let applied = self
            .ledger
            .apply(transition, &self.collaborators.registry)
            .unwrap();
        Entry {
            encoded: applied.encode(),
            proofs,
        }
    }

    /// A transition claiming `state_root`, leaving the operator's state untouched.
    pub fn forged(&self, mut transition: Transition, state_root: Hash) -> Entry {
        let proofs = self.ledger.dispute_proofs(&transition).unwrap();
        transition.set_state_root(state_root);
        Entry {
            encoded: transition.encode(),
            proofs,
        }
    }

    /// The aggregate order closing the strategy's collecting aggregate in the operator's state.
    pub fn aggregate(&self) -> Transition {
        let strategy = self.ledger.strategy(STRATEGY).unwrap();
        let pending = strategy
            .pending
            .iter()
            .find(|p| p.aggregate_id == strategy.next_aggregate_id)
            .unwrap();
        Transition::AggregateOrders(AggregateOrdersTransition {
            state_root: ZERO_HASH,
            strategy_id: STRATEGY,
            buy_amount: pending.buy_amount,
            sell_shares: pending.sell_shares,
            min_shares_from_buy: if pending.buy_amount == 0 {
                0
            } else {
                pending.buy_amount * PRICE_SCALE / pending.max_share_price_for_buy
            },
            min_amount_from_sell: pending.sell_shares * pending.min_share_price_for_sell
                / PRICE_SCALE,
        })
    }

    pub fn next_block_id(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Commits the entries as the next block. On failure the operator's state is rolled back.
    pub fn commit(&mut self, entries: Vec<Entry>) -> Result<(), RollupChainError> {
        let block_id = self.next_block_id();
        let transitions = entries.iter().map(|e| e.encoded.clone()).collect();
        let result = self.call(
            OPERATOR,
            CallMessage::CommitBlock {
                block_id,
                transitions,
            },
        );
        match result {
            Ok(()) => {
                let before = std::mem::replace(&mut self.committed, self.ledger.clone());
                self.snapshots.push(before);
                self.blocks.push(entries);
            }
            Err(_) => self.ledger = self.committed.clone(),
        }
        result
    }

    /// Drops the blocks from `block_id` on from the operator's view, after a rollback.
    pub fn rewind(&mut self, block_id: u64) {
        self.ledger = self.snapshots[block_id as usize].clone();
        self.committed = self.ledger.clone();
        self.snapshots.truncate(block_id as usize);
        self.blocks.truncate(block_id as usize);
    }

    pub fn intents(&self, block_id: u64) -> Vec<Vec<u8>> {
        self.blocks[block_id as usize]
            .iter()
            .filter(|e| {
                matches!(
                    peek_transition_type(&e.encoded),
                    Ok(Some(TransitionType::AggregateOrders))
                )
            })
            .map(|e| e.encoded.clone())
            .collect()
    }

    pub fn execute(&mut self, block_id: u64, exec_len: u32) -> Result<(), RollupChainError> {
        let intents = self.intents(block_id);
        self.call(
            OPERATOR,
            CallMessage::ExecuteBlock {
                block_id,
                intents,
                exec_len,
            },
        )
    }

    /// Executes every committed block that is not executed yet, in one call each.
    pub fn execute_all(&mut self) {
        let executed = self.query(|chain, ws| chain.executed_count(ws));
        for block_id in executed..self.next_block_id() {
            let intents = self.intents(block_id).len() as u32;
            self.execute(block_id, intents).unwrap();
        }
    }

    pub fn transition_proof(&self, block_id: u64, index: u64) -> TransitionProof {
        let encoded: Vec<Vec<u8>> = self.blocks[block_id as usize]
            .iter()
            .map(|e| e.encoded.clone())
            .collect();
        transition_proof(block_id, &encoded, index).unwrap()
    }

    /// The dispute of transition `index` of `block_id`, with the witnesses recorded at commit.
    pub fn dispute_msg(&self, block_id: u64, index: u64) -> CallMessage {
        let prior = match (block_id, index) {
            (0, 0) => self.transition_proof(0, 0),
            (_, 0) => {
                let prior_block = block_id - 1;
                let last = self.blocks[prior_block as usize].len() as u64 - 1;
                self.transition_proof(prior_block, last)
            }
            _ => self.transition_proof(block_id, index - 1),
        };
        CallMessage::DisputeTransition {
            prior,
            disputed: self.transition_proof(block_id, index),
            proofs: self.blocks[block_id as usize][index as usize].proofs.clone(),
        }
    }

    pub fn events_with_key(&self, key: &str) -> Vec<String> {
        self.events
            .iter()
            .filter(|e| e.key().is(key))
            .map(|e| e.value().as_str().to_owned())
            .collect()
    }
}
