mod helpers;

use helpers::*;
use opr_priority_queues::QueueKind;
use opr_rollup_chain::{CallMessage, ChainStatus, RollupChainError, WithdrawCommit};
use opr_rollup_interface::collaborators::TransferError;
use opr_rollup_interface::transition::*;
use opr_rollup_interface::{Address, ZERO_HASH};

fn claim(chain: &mut TestChain, seed: u8) -> Result<(), RollupChainError> {
    chain.call(
        owner(BOB),
        CallMessage::Withdraw {
            account: owner(seed),
            asset: USDC_ADDRESS,
        },
    )
}

#[test]
fn withdrawals_are_paid_once_their_block_is_executed() {
    let mut chain = TestChain::new();
    chain.user_deposit(ALICE, 100).unwrap();
    let entry = chain.honest(deposit(ALICE, 1, 100));
    chain.commit(vec![entry]).unwrap();

    let withdrawal = chain.honest(withdraw(ALICE, 1, 40, Fee::in_kind(1), 1));
    let fee = chain.honest(Transition::WithdrawProtocolFee(
        WithdrawProtocolFeeTransition {
            state_root: ZERO_HASH,
            asset_id: USDC,
            amount: 1,
        },
    ));
    chain.commit(vec![withdrawal, fee]).unwrap();
    assert_eq!(
        chain.query(|c, ws| c.withdraw_commits(2, ws)),
        vec![
            WithdrawCommit {
                account: owner(ALICE),
                asset_id: USDC,
                amount: 39,
            },
            WithdrawCommit {
                account: FEE_RECEIVER,
                asset_id: USDC,
                amount: 1,
            },
        ]
    );

    assert_eq!(
        claim(&mut chain, ALICE),
        Err(RollupChainError::NothingToWithdraw {
            account: owner(ALICE),
            asset: USDC_ADDRESS
        })
    );

    chain.advance(CHALLENGE_PERIOD + 1);
    chain.execute_all();
    assert!(chain.query(|c, ws| c.withdraw_commits(2, ws)).is_empty());
    assert_eq!(
        chain.query(|c, ws| c.pending_withdraw(&owner(ALICE), USDC, ws)),
        39
    );

    claim(&mut chain, ALICE).unwrap();
    assert_eq!(chain.balance(&owner(ALICE)), INITIAL_BALANCE - 100 + 39);
    assert_eq!(chain.balance(&CHAIN_ADDRESS), 61);
    assert_eq!(
        chain.query(|c, ws| c.pending_withdraw(&owner(ALICE), USDC, ws)),
        0
    );
    assert!(matches!(
        claim(&mut chain, ALICE),
        Err(RollupChainError::NothingToWithdraw { .. })
    ));

    chain
        .call(
            owner(BOB),
            CallMessage::Withdraw {
                account: FEE_RECEIVER,
                asset: USDC_ADDRESS,
            },
        )
        .unwrap();
    assert_eq!(chain.balance(&FEE_RECEIVER), 1);
    assert_eq!(chain.balance(&CHAIN_ADDRESS), 60);
    assert_eq!(chain.events_with_key("asset_withdrawn").len(), 2);
}

#[test]
fn withdrawals_of_several_blocks_accumulate() {
    let mut chain = TestChain::new();
    chain.user_deposit(ALICE, 100).unwrap();
    let entry = chain.honest(deposit(ALICE, 1, 100));
    chain.commit(vec![entry]).unwrap();
    for timestamp in 1..=2 {
        let entry = chain.honest(withdraw(ALICE, 1, 10, Fee::in_kind(0), timestamp));
        chain.commit(vec![entry]).unwrap();
    }

    chain.advance(CHALLENGE_PERIOD + 1);
    chain.execute_all();
    assert_eq!(
        chain.query(|c, ws| c.pending_withdraw(&owner(ALICE), USDC, ws)),
        20
    );
    claim(&mut chain, ALICE).unwrap();
    assert_eq!(chain.balance(&owner(ALICE)), INITIAL_BALANCE - 80);
}

#[test]
fn deposits_need_a_registered_asset_and_funds() {
    let mut chain = TestChain::new();
    let unknown = Address([0x99; 20]);

    assert_eq!(
        chain.call(
            owner(ALICE),
            CallMessage::Deposit {
                asset: unknown,
                amount: 10
            }
        ),
        Err(RollupChainError::UnregisteredAsset(unknown))
    );
    assert_eq!(
        chain.user_deposit(ALICE, 0),
        Err(RollupChainError::ZeroAmount)
    );
    assert_eq!(
        chain.user_deposit(ALICE, INITIAL_BALANCE + 1),
        Err(RollupChainError::Transfer(
            TransferError::InsufficientBalance {
                asset: USDC_ADDRESS,
                owner: owner(ALICE),
                available: INITIAL_BALANCE,
                needed: INITIAL_BALANCE + 1,
            }
        ))
    );

    let pointer = chain.query(|c, ws| c.queue_pointer(QueueKind::Deposit, ws));
    assert_eq!(pointer.tail, 0);
    assert_eq!(chain.balance(&CHAIN_ADDRESS), 0);
    assert!(chain.events_with_key("asset_deposited").is_empty());
}

#[test]
fn reward_deposits_are_queued_without_a_depositor() {
    let mut chain = TestChain::new();
    chain
        .call(
            owner(BOB),
            CallMessage::DepositReward {
                asset: USDC_ADDRESS,
                amount: 10,
            },
        )
        .unwrap();
    assert_eq!(chain.balance(&CHAIN_ADDRESS), 10);
    assert_eq!(chain.events_with_key("reward_deposited").len(), 1);

    let reward = Transition::DepositReward(DepositRewardTransition {
        state_root: ZERO_HASH,
        asset_id: USDC,
        amount: 10,
    });
    let entry = chain.honest(reward);
    chain.commit(vec![entry]).unwrap();
    assert_eq!(chain.ledger.global().reward(USDC), 10);
}

#[test]
fn only_the_owner_pauses_and_resumes() {
    let mut chain = TestChain::new();

    assert!(matches!(
        chain.call(OPERATOR, CallMessage::Pause),
        Err(RollupChainError::Unauthorized { role: "owner", .. })
    ));
    chain.call(OWNER, CallMessage::Pause).unwrap();
    assert_eq!(chain.query(|c, ws| c.status(ws)), ChainStatus::Paused);
    assert_eq!(
        chain.call(OWNER, CallMessage::Pause),
        Err(RollupChainError::NotActive(ChainStatus::Paused))
    );
    assert_eq!(
        chain.user_deposit(ALICE, 10),
        Err(RollupChainError::NotActive(ChainStatus::Paused))
    );

    assert!(matches!(
        chain.call(OPERATOR, CallMessage::Unpause),
        Err(RollupChainError::Unauthorized { role: "owner", .. })
    ));
    chain.call(OWNER, CallMessage::Unpause).unwrap();
    assert_eq!(chain.query(|c, ws| c.status(ws)), ChainStatus::Active);
    assert_eq!(
        chain.events_with_key("chain_resumed"),
        vec!["was paused".to_owned()]
    );
    chain.user_deposit(ALICE, 10).unwrap();
}

#[test]
fn the_owner_replaces_the_operator() {
    let mut chain = TestChain::new();
    let operator = owner(BOB);

    assert!(matches!(
        chain.call(OPERATOR, CallMessage::SetOperator(operator)),
        Err(RollupChainError::Unauthorized { role: "owner", .. })
    ));
    chain
        .call(OWNER, CallMessage::SetOperator(operator))
        .unwrap();
    assert_eq!(chain.query(|c, ws| c.operator(ws)), Some(operator));
    assert_eq!(
        chain.events_with_key("operator_changed"),
        vec![operator.to_string()]
    );

    let encoded = Transition::UpdatePool(UpdatePoolTransition::default()).encode();
    assert!(matches!(
        chain.call(
            OPERATOR,
            CallMessage::CommitBlock {
                block_id: 1,
                transitions: vec![encoded.clone()],
            }
        ),
        Err(RollupChainError::Unauthorized {
            role: "operator",
            ..
        })
    ));
    chain
        .call(
            operator,
            CallMessage::CommitBlock {
                block_id: 1,
                transitions: vec![encoded],
            },
        )
        .unwrap();
}
