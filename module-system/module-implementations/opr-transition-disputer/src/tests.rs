use opr_rollup_interface::crypto::signature::{address_of_secret, Signature};
use opr_rollup_interface::entities::{empty_state_root, MAX_POOL_ID, MAX_STRATEGY_ID};
use opr_rollup_interface::mocks::{MockRegistry, MockStrategy, MOCK_PRICE_SCALE};
use opr_rollup_interface::transition::*;
use opr_rollup_interface::{AccountId, Address, AssetId};
use opr_transition_evaluator::LedgerState;
use secp256k1::SecretKey;

use super::*;

const USDC: AssetId = 2;
const STRATEGY: u32 = 1;
const ALICE: u8 = 0xa1;
const BOB: u8 = 0xb0;
const FORGED_ROOT: Hash = [7; 32];

fn key(seed: u8) -> SecretKey {
    SecretKey::from_slice(&[seed; 32]).unwrap()
}

fn owner(seed: u8) -> Address {
    address_of_secret(&key(seed))
}

fn signed(mut transition: Transition, seed: u8) -> Transition {
    transition.sign(&key(seed)).unwrap();
    transition
}

fn init(state_root: Hash) -> Transition {
    Transition::Init(InitTransition { state_root })
}

fn deposit(seed: u8, account_id: AccountId, amount: u128) -> Transition {
    Transition::Deposit(DepositTransition {
        state_root: ZERO_HASH,
        account: owner(seed),
        account_id,
        asset_id: USDC,
        amount,
    })
}

fn withdraw(account_id: AccountId, amount: u128, timestamp: u64) -> Transition {
    signed(
        Transition::Withdraw(WithdrawTransition {
            state_root: ZERO_HASH,
            account: owner(ALICE),
            account_id,
            asset_id: USDC,
            amount,
            fee: Fee::in_kind(0),
            timestamp,
            signature: Signature::default(),
        }),
        ALICE,
    )
}

fn transfer(to_account_id: AccountId, amount: u128, timestamp: u64) -> Transition {
    signed(
        Transition::TransferAsset(TransferAssetTransition {
            state_root: ZERO_HASH,
            from_account_id: 1,
            to_account_id,
            to_account: owner(BOB),
            asset_id: USDC,
            amount,
            fee: Fee::in_kind(2),
            timestamp,
            signature: Signature::default(),
        }),
        ALICE,
    )
}

fn buy(amount: u128) -> Transition {
    signed(
        Transition::Buy(BuyTransition {
            state_root: ZERO_HASH,
            account_id: 1,
            strategy_id: STRATEGY,
            amount,
            max_share_price: 3 * MOCK_PRICE_SCALE,
            fee: Fee::in_kind(1),
            timestamp: 1,
            signature: Signature::default(),
        }),
        ALICE,
    )
}

/// One committed transition and the witnesses of the state it was applied to.
struct Entry {
    encoded: Vec<u8>,
    proofs: DisputeProofs,
}

/// An operator that commits blocks of transitions on top of a ledger, honestly or not.
struct Chain {
    ledger: LedgerState,
    registry: MockRegistry,
    blocks: Vec<Vec<Entry>>,
}

impl Chain {
    /// A chain whose block 0 holds the Init transition.
    fn new() -> Self {
        let mut registry = MockRegistry::default();
        registry.register_asset(Address([0xfe; 20]));
        assert_eq!(registry.register_asset(Address([0xdc; 20])), USDC);
        let strategy = MockStrategy::new(Address([0xdc; 20]), 2 * MOCK_PRICE_SCALE);
        registry.register_strategy(Address([0x51; 20]), strategy);
        let mut chain = Self {
            ledger: LedgerState::default(),
            registry,
            blocks: Vec::new(),
        };
        let genesis = chain.valid(init(ZERO_HASH));
        chain.commit(vec![genesis]);
        chain
    }

    /// Applies the transition and records it with the root the ledger reached.
    fn valid(&mut self, transition: Transition) -> Entry {
        let proofs = self.ledger.dispute_proofs(&transition).unwrap();
        let applied = self.ledger.apply(transition, &self.registry).unwrap();
        Entry {
            encoded: applied.encode(),
            proofs,
        }
    }

    /// Records the transition claiming `state_root` without touching the ledger.
    fn forged(&self, mut transition: Transition, state_root: Hash) -> Entry {
        let proofs = self.ledger.dispute_proofs(&transition).unwrap();
        transition.set_state_root(state_root);
        Entry {
            encoded: transition.encode(),
            proofs,
        }
    }

    fn raw(&self, encoded: Vec<u8>) -> Entry {
        Entry {
            encoded,
            proofs: DisputeProofs::default(),
        }
    }

    fn commit(&mut self, entries: Vec<Entry>) -> u64 {
        self.blocks.push(entries);
        self.blocks.len() as u64 - 1
    }

    fn encoded(&self, block_id: u64) -> Vec<Vec<u8>> {
        self.blocks[block_id as usize]
            .iter()
            .map(|e| e.encoded.clone())
            .collect()
    }

    fn commitment(&self, block_id: u64) -> BlockCommitment {
        let encoded = self.encoded(block_id);
        BlockCommitment {
            root_hash: block_root(&encoded),
            size: encoded.len() as u64,
        }
    }

    fn proof(&self, block_id: u64, index: u64) -> TransitionProof {
        transition_proof(block_id, &self.encoded(block_id), index).unwrap()
    }

    fn previous(&self, block_id: u64, index: u64) -> (u64, u64) {
        match index {
            0 if block_id == 0 => (0, 0),
            0 => (block_id - 1, self.commitment(block_id - 1).size - 1),
            _ => (block_id, index - 1),
        }
    }

    fn dispute_pair(
        &self,
        prior: (u64, u64),
        disputed: (u64, u64),
        proofs: &DisputeProofs,
    ) -> Result<FraudReason, DisputeError> {
        dispute_transition(
            &self.proof(prior.0, prior.1),
            &self.commitment(prior.0),
            &self.proof(disputed.0, disputed.1),
            &self.commitment(disputed.0),
            proofs,
            &self.registry,
        )
    }

    fn dispute_with(
        &self,
        block_id: u64,
        index: u64,
        proofs: &DisputeProofs,
    ) -> Result<FraudReason, DisputeError> {
        self.dispute_pair(self.previous(block_id, index), (block_id, index), proofs)
    }

    /// Disputes with the witnesses recorded when the transition was committed.
    fn dispute(&self, block_id: u64, index: u64) -> Result<FraudReason, DisputeError> {
        let proofs = &self.blocks[block_id as usize][index as usize].proofs;
        self.dispute_with(block_id, index, proofs)
    }
}

#[test]
fn init_must_claim_the_empty_state() {
    let chain = Chain::new();
    assert_eq!(chain.dispute(0, 0), Err(DisputeError::NoFraudDetected));

    let mut forged = Chain::new();
    forged.blocks.clear();
    let entry = forged.forged(init(ZERO_HASH), [1; 32]);
    forged.commit(vec![entry]);
    assert_eq!(forged.dispute(0, 0), Ok(FraudReason::InvalidInitTransition));

    let mut not_init = Chain::new();
    not_init.blocks.clear();
    let entry = not_init.valid(deposit(ALICE, 1, 10));
    not_init.commit(vec![entry]);
    assert_eq!(not_init.dispute(0, 0), Ok(FraudReason::InvalidInitTransition));
}

#[test]
fn valid_transitions_cannot_be_disputed() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    let second = chain.valid(buy(40));
    chain.commit(vec![first, second]);
    let third = chain.valid(transfer(2, 30, 2));
    let fourth = chain.valid(withdraw(1, 10, 3));
    chain.commit(vec![third, fourth]);

    for (block_id, index) in [(1, 0), (1, 1), (2, 0), (2, 1)] {
        assert_eq!(
            chain.dispute(block_id, index),
            Err(DisputeError::NoFraudDetected),
            "transition {block_id}/{index}"
        );
    }
    assert_eq!(
        chain.ledger.state_root(),
        Transition::decode(&chain.blocks[2][1].encoded)
            .unwrap()
            .state_root()
    );
}

#[test]
fn a_wrong_post_state_root_is_fraud() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    let second = chain.forged(deposit(BOB, 2, 10), FORGED_ROOT);
    chain.commit(vec![first, second]);

    assert_eq!(chain.dispute(1, 1), Ok(FraudReason::InvalidPostStateRoot));
}

#[test]
fn a_wrong_root_on_a_two_account_transition_is_fraud() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    let second = chain.forged(transfer(2, 30, 1), FORGED_ROOT);
    chain.commit(vec![first, second]);

    assert_eq!(chain.dispute(1, 1), Ok(FraudReason::InvalidPostStateRoot));

    let mut proofs = chain.blocks[1][1].proofs.clone();
    proofs.account_proofs.truncate(1);
    assert_eq!(
        chain.dispute_with(1, 1, &proofs),
        Err(DisputeError::MissingAccountProof {
            expected: 2,
            got: 1
        })
    );
}

#[test]
fn disputes_cross_block_boundaries() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    let second = chain.valid(deposit(BOB, 2, 50));
    chain.commit(vec![first, second]);
    let forged = chain.forged(deposit(ALICE, 1, 1), FORGED_ROOT);
    chain.commit(vec![forged]);

    assert_eq!(chain.dispute(2, 0), Ok(FraudReason::InvalidPostStateRoot));

    // The first transition of block 1 is not the last one, so it does not precede block 2.
    let proofs = &chain.blocks[2][0].proofs;
    assert_eq!(
        chain.dispute_pair((1, 0), (2, 0), proofs),
        Err(DisputeError::NotSequential {
            prior_block: 1,
            prior_index: 0,
            block: 2,
            index: 0
        })
    );
}

#[test]
fn prior_must_immediately_precede() {
    let mut chain = Chain::new();
    let entries = vec![
        chain.valid(deposit(ALICE, 1, 100)),
        chain.valid(deposit(ALICE, 1, 100)),
        chain.forged(deposit(ALICE, 1, 100), FORGED_ROOT),
    ];
    chain.commit(entries);
    let proofs = &chain.blocks[1][2].proofs;

    assert!(matches!(
        chain.dispute_pair((1, 0), (1, 2), proofs),
        Err(DisputeError::NotSequential { .. })
    ));
    assert_eq!(chain.dispute(1, 2), Ok(FraudReason::InvalidPostStateRoot));
}

#[test]
fn transitions_must_be_included() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    let second = chain.forged(deposit(ALICE, 1, 5), FORGED_ROOT);
    chain.commit(vec![first, second]);

    let mut disputed = chain.proof(1, 1);
    disputed.transition = chain.forged(deposit(ALICE, 1, 6), FORGED_ROOT).encoded;
    let result = dispute_transition(
        &chain.proof(1, 0),
        &chain.commitment(1),
        &disputed,
        &chain.commitment(1),
        &chain.blocks[1][1].proofs,
        &chain.registry,
    );
    assert_eq!(result, Err(DisputeError::NotIncluded { block: 1, index: 1 }));

    let mut short = chain.proof(1, 1);
    short.siblings.clear();
    let result = dispute_transition(
        &chain.proof(1, 0),
        &chain.commitment(1),
        &short,
        &chain.commitment(1),
        &chain.blocks[1][1].proofs,
        &chain.registry,
    );
    assert_eq!(result, Err(DisputeError::NotIncluded { block: 1, index: 1 }));
}

#[test]
fn undecodable_transitions() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    let garbage = chain.raw(vec![0xff, 1, 2, 3]);
    let after = chain.valid(deposit(ALICE, 1, 1));
    chain.commit(vec![first, garbage, after]);

    assert_eq!(chain.dispute(1, 1), Ok(FraudReason::BadEncoding));
    assert_eq!(
        chain.dispute(1, 2),
        Err(DisputeError::UndecodablePrior(TransitionError::UnknownType(
            0xff
        )))
    );
}

#[test]
fn a_second_account_for_the_same_owner_is_fraud() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    chain.commit(vec![first]);
    let existing = chain.ledger.dispute_proofs(&deposit(ALICE, 1, 0)).unwrap();
    let duplicate = chain.valid(deposit(ALICE, 2, 10));
    chain.commit(vec![duplicate]);

    assert_eq!(
        chain.dispute_with(2, 0, &existing),
        Ok(FraudReason::BadAccountId)
    );
}

#[test]
fn proofs_must_be_for_the_touched_leaves() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    chain.commit(vec![first]);
    let alice = chain.ledger.dispute_proofs(&deposit(ALICE, 1, 0)).unwrap();
    let bob = chain.forged(deposit(BOB, 2, 10), FORGED_ROOT);
    chain.commit(vec![bob]);

    assert_eq!(
        chain.dispute_with(2, 0, &alice),
        Err(DisputeError::IndexMismatch {
            tree: "account",
            expected: 2,
            got: 1
        })
    );

    let mut tampered = chain.blocks[2][0].proofs.clone();
    tampered.account_proofs[0].siblings[0] = [9; 32];
    assert_eq!(
        chain.dispute_with(2, 0, &tampered),
        Err(DisputeError::InvalidProof {
            tree: "account",
            index: 2
        })
    );
}

#[test]
fn witnesses_must_match_the_prior_root() {
    let mut chain = Chain::new();
    let stale = chain.ledger.dispute_proofs(&deposit(ALICE, 1, 0)).unwrap();
    let first = chain.valid(deposit(ALICE, 1, 100));
    let second = chain.forged(deposit(ALICE, 1, 1), FORGED_ROOT);
    chain.commit(vec![first, second]);

    let prior_root = Transition::decode(&chain.blocks[1][0].encoded)
        .unwrap()
        .state_root();
    assert_eq!(
        chain.dispute_with(1, 1, &stale),
        Err(DisputeError::PreStateRootMismatch(prior_root))
    );
    assert_ne!(prior_root, empty_state_root());

    let mut split = chain.blocks[1][1].proofs.clone();
    let mut other = split.account_proofs[0].clone();
    other.state_root = [3; 32];
    split.account_proofs.push(other);
    assert_eq!(
        chain.dispute_with(1, 1, &split),
        Err(DisputeError::AccountRootMismatch)
    );
}

#[test]
fn failing_transitions_are_fraud() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    let overdraw = chain.forged(withdraw(1, 1_000, 1), FORGED_ROOT);
    chain.commit(vec![first, overdraw]);

    match chain.dispute(1, 1) {
        Ok(FraudReason::FailedToEvaluate(reason)) => assert!(!reason.is_empty()),
        other => panic!("expected an evaluation failure, got {other:?}"),
    }
}

#[test]
fn fraud_reasons_render() {
    assert_eq!(
        FraudReason::InvalidPostStateRoot.to_string(),
        "invalid post-state root"
    );
    assert_eq!(
        FraudReason::FailedToEvaluate("x".to_owned()).to_string(),
        "failed to evaluate: x"
    );
    assert_eq!(DisputeError::NoFraudDetected.to_string(), "no fraud detected");
}

#[test]
fn out_of_range_ids_are_fraud_without_witnesses() {
    let mut chain = Chain::new();
    let first = chain.valid(deposit(ALICE, 1, 100));
    let settlement = chain.raw(
        Transition::Settlement(SettlementTransition {
            state_root: FORGED_ROOT,
            strategy_id: MAX_STRATEGY_ID + 1,
            aggregate_id: 1,
            account_id: 1,
        })
        .encode(),
    );
    let pool = chain.raw(
        Transition::UpdatePool(UpdatePoolTransition {
            state_root: FORGED_ROOT,
            pool_id: MAX_POOL_ID + 1,
            reward_per_epoch: vec![],
        })
        .encode(),
    );
    let fee = chain.raw(
        Transition::WithdrawProtocolFee(WithdrawProtocolFeeTransition {
            state_root: FORGED_ROOT,
            asset_id: u32::MAX,
            amount: 1,
        })
        .encode(),
    );
    chain.commit(vec![first, settlement, pool, fee]);

    let reasons = [
        "strategy id 65536 is out of range, the largest is 65535",
        "staking pool id 65536 is out of range, the largest is 65535",
        "asset id 4294967295 is out of range, the largest is 65535",
    ];
    for (index, reason) in (1..).zip(reasons) {
        assert_eq!(
            chain.dispute(1, index),
            Ok(FraudReason::FailedToEvaluate(reason.to_owned())),
            "transition {index}"
        );
    }
}

#[test]
fn the_last_leaves_are_disputed_like_any_other() {
    let mut chain = Chain::new();
    let last_account = chain.valid(deposit(ALICE, u32::MAX, 100));
    let last_pool = chain.valid(Transition::AddPool(AddPoolTransition {
        state_root: ZERO_HASH,
        pool_id: MAX_POOL_ID,
        strategy_id: STRATEGY,
        reward_asset_ids: vec![USDC],
        reward_per_epoch: vec![1],
        stake_adjustment_factor: 0,
        start_epoch: 1,
    }));
    let forged = chain.forged(deposit(ALICE, u32::MAX, 1), FORGED_ROOT);
    chain.commit(vec![last_account, last_pool, forged]);

    assert_eq!(chain.dispute(1, 0), Err(DisputeError::NoFraudDetected));
    assert_eq!(chain.dispute(1, 1), Err(DisputeError::NoFraudDetected));
    assert_eq!(chain.dispute(1, 2), Ok(FraudReason::InvalidPostStateRoot));
}
