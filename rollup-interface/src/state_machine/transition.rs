//! The typed transition log committed in every rollup block.
//!
//! On the wire a transition is a 1-byte type tag followed by the borsh encoding of its fields.
//! The tag is the declaration order of [`Transition`]'s variants.
use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::signature::{Signature, SignatureError};
use crate::{AccountId, Address, AggregateId, AssetId, Hash, PoolId, StrategyId};

/// The asset in which fees flagged with [`Fee::in_fee_asset`] are charged.
pub const FEE_ASSET_ID: AssetId = 1;

/// Fee attached to a user-signed transition.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Fee {
    /// Fee amount.
    pub amount: u128,
    /// If set, the fee is charged in [`FEE_ASSET_ID`] from idle assets instead of the traded unit.
    pub in_fee_asset: bool,
}

impl Fee {
    /// A fee charged in the traded unit.
    pub fn in_kind(amount: u128) -> Self {
        Self {
            amount,
            in_fee_asset: false,
        }
    }

    /// A fee charged in [`FEE_ASSET_ID`].
    pub fn in_fee_asset(amount: u128) -> Self {
        Self {
            amount,
            in_fee_asset: true,
        }
    }

    /// The part of the fee that is taken out of the traded unit.
    pub fn traded_unit_amount(&self) -> u128 {
        if self.in_fee_asset {
            0
        } else {
            self.amount
        }
    }
}

/// Errors raised while decoding or signing transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The input is empty and carries no type tag.
    #[error("empty transition")]
    Empty,
    /// The type tag does not name a transition.
    #[error("unknown transition type {0}")]
    UnknownType(u8),
    /// The body does not decode as the tagged variant.
    #[error("malformed {ty} transition: {reason}")]
    Malformed {
        /// The tagged type.
        ty: TransitionType,
        /// The codec error.
        reason: String,
    },
    /// Only user-initiated transitions carry a signature.
    #[error("{0} transitions are not signed")]
    NotSigned(TransitionType),
    /// The signature does not recover to any signer.
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// The type tag of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TransitionType {
    Init = 0,
    Deposit,
    Withdraw,
    Buy,
    Sell,
    Settlement,
    TransferAsset,
    TransferShare,
    AggregateOrders,
    ExecutionResult,
    Stake,
    Unstake,
    AddPool,
    UpdatePool,
    DepositReward,
    WithdrawProtocolFee,
    TransferOperatorFee,
    UpdateEpoch,
}

impl TransitionType {
    const ALL: [TransitionType; 18] = [
        Self::Init,
        Self::Deposit,
        Self::Withdraw,
        Self::Buy,
        Self::Sell,
        Self::Settlement,
        Self::TransferAsset,
        Self::TransferShare,
        Self::AggregateOrders,
        Self::ExecutionResult,
        Self::Stake,
        Self::Unstake,
        Self::AddPool,
        Self::UpdatePool,
        Self::DepositReward,
        Self::WithdrawProtocolFee,
        Self::TransferOperatorFee,
        Self::UpdateEpoch,
    ];

    /// Maps a wire tag to its type.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }

    /// The wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// True for transitions that are authorised by an account signature.
    pub fn is_user_signed(self) -> bool {
        matches!(
            self,
            Self::Withdraw
                | Self::Buy
                | Self::Sell
                | Self::TransferAsset
                | Self::TransferShare
                | Self::Stake
                | Self::Unstake
        )
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reads the type tag of an encoded transition without decoding the body.
///
/// Returns `Ok(None)` for tags that name no transition.
pub fn peek_transition_type(bytes: &[u8]) -> Result<Option<TransitionType>, TransitionError> {
    let tag = bytes.first().ok_or(TransitionError::Empty)?;
    Ok(TransitionType::from_tag(*tag))
}

/// The first transition of the chain. Its post root must be the empty-state root.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct InitTransition {
    pub state_root: Hash,
}

/// Credits a base-ledger deposit. Matched against the deposit queue at commit time.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct DepositTransition {
    pub state_root: Hash,
    pub account: Address,
    pub account_id: AccountId,
    pub asset_id: AssetId,
    pub amount: u128,
}

/// Moves idle assets out of the rollup. Recorded as a withdraw commit.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct WithdrawTransition {
    pub state_root: Hash,
    pub account: Address,
    pub account_id: AccountId,
    pub asset_id: AssetId,
    pub amount: u128,
    pub fee: Fee,
    pub timestamp: u64,
    pub signature: Signature,
}

impl WithdrawTransition {
    /// The amount paid out on the base ledger after the protocol fee.
    pub fn net_amount(&self) -> u128 {
        self.amount.saturating_sub(self.fee.traded_unit_amount())
    }
}

/// Commits idle assets to a strategy's next aggregate order.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct BuyTransition {
    pub state_root: Hash,
    pub account_id: AccountId,
    pub strategy_id: StrategyId,
    pub amount: u128,
    pub max_share_price: u128,
    pub fee: Fee,
    pub timestamp: u64,
    pub signature: Signature,
}

/// Commits strategy shares to a strategy's next aggregate order.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct SellTransition {
    pub state_root: Hash,
    pub account_id: AccountId,
    pub strategy_id: StrategyId,
    pub shares: u128,
    pub min_share_price: u128,
    pub fee: Fee,
    pub timestamp: u64,
    pub signature: Signature,
}

/// Distributes an executed aggregate to one contributing account.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct SettlementTransition {
    pub state_root: Hash,
    pub strategy_id: StrategyId,
    pub aggregate_id: AggregateId,
    pub account_id: AccountId,
}

/// Moves idle assets between accounts, creating the destination on first use.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct TransferAssetTransition {
    pub state_root: Hash,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub to_account: Address,
    pub asset_id: AssetId,
    pub amount: u128,
    pub fee: Fee,
    pub timestamp: u64,
    pub signature: Signature,
}

/// Moves strategy shares between accounts, creating the destination on first use.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct TransferShareTransition {
    pub state_root: Hash,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub to_account: Address,
    pub strategy_id: StrategyId,
    pub shares: u128,
    pub fee: Fee,
    pub timestamp: u64,
    pub signature: Signature,
}

/// Closes a strategy's current aggregate. This is the only intent.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct AggregateOrdersTransition {
    pub state_root: Hash,
    pub strategy_id: StrategyId,
    pub buy_amount: u128,
    pub sell_shares: u128,
    pub min_shares_from_buy: u128,
    pub min_amount_from_sell: u128,
}

/// Records the fill of an executed aggregate. Matched against the strategy's result queue.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct ExecutionResultTransition {
    pub state_root: Hash,
    pub strategy_id: StrategyId,
    pub aggregate_id: AggregateId,
    pub success: bool,
    pub shares_from_buy: u128,
    pub amount_from_sell: u128,
}

/// Stakes strategy shares into a pool.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct StakeTransition {
    pub state_root: Hash,
    pub pool_id: PoolId,
    pub account_id: AccountId,
    pub shares: u128,
    pub fee: Fee,
    pub timestamp: u64,
    pub signature: Signature,
}

/// Withdraws staked shares from a pool.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct UnstakeTransition {
    pub state_root: Hash,
    pub pool_id: PoolId,
    pub account_id: AccountId,
    pub shares: u128,
    pub fee: Fee,
    pub timestamp: u64,
    pub signature: Signature,
}

/// Creates a staking pool over a strategy's shares.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct AddPoolTransition {
    pub state_root: Hash,
    pub pool_id: PoolId,
    pub strategy_id: StrategyId,
    pub reward_asset_ids: Vec<AssetId>,
    pub reward_per_epoch: Vec<u128>,
    pub stake_adjustment_factor: u128,
    pub start_epoch: u64,
}

/// Changes a pool's reward emission.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct UpdatePoolTransition {
    pub state_root: Hash,
    pub pool_id: PoolId,
    pub reward_per_epoch: Vec<u128>,
}

/// Credits a reward deposit to the global reward pool. Matched against the deposit queue.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct DepositRewardTransition {
    pub state_root: Hash,
    pub asset_id: AssetId,
    pub amount: u128,
}

/// Moves accumulated protocol fees out of the rollup. Recorded as a withdraw commit.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct WithdrawProtocolFeeTransition {
    pub state_root: Hash,
    pub asset_id: AssetId,
    pub amount: u128,
}

/// Moves all accumulated operator fees to an account.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct TransferOperatorFeeTransition {
    pub state_root: Hash,
    pub account_id: AccountId,
}

/// Advances the staking clock. Matched against the epoch queue.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct UpdateEpochTransition {
    pub state_root: Hash,
    pub epoch: u64,
}

/// A typed state change. Every variant carries the state root reached after applying it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Transition {
    Init(InitTransition),
    Deposit(DepositTransition),
    Withdraw(WithdrawTransition),
    Buy(BuyTransition),
    Sell(SellTransition),
    Settlement(SettlementTransition),
    TransferAsset(TransferAssetTransition),
    TransferShare(TransferShareTransition),
    AggregateOrders(AggregateOrdersTransition),
    ExecutionResult(ExecutionResultTransition),
    Stake(StakeTransition),
    Unstake(UnstakeTransition),
    AddPool(AddPoolTransition),
    UpdatePool(UpdatePoolTransition),
    DepositReward(DepositRewardTransition),
    WithdrawProtocolFee(WithdrawProtocolFeeTransition),
    TransferOperatorFee(TransferOperatorFeeTransition),
    UpdateEpoch(UpdateEpochTransition),
}

macro_rules! with_variant {
    ($transition:expr, $inner:ident => $body:expr) => {
        match $transition {
            Transition::Init($inner) => $body,
            Transition::Deposit($inner) => $body,
            Transition::Withdraw($inner) => $body,
            Transition::Buy($inner) => $body,
            Transition::Sell($inner) => $body,
            Transition::Settlement($inner) => $body,
            Transition::TransferAsset($inner) => $body,
            Transition::TransferShare($inner) => $body,
            Transition::AggregateOrders($inner) => $body,
            Transition::ExecutionResult($inner) => $body,
            Transition::Stake($inner) => $body,
            Transition::Unstake($inner) => $body,
            Transition::AddPool($inner) => $body,
            Transition::UpdatePool($inner) => $body,
            Transition::DepositReward($inner) => $body,
            Transition::WithdrawProtocolFee($inner) => $body,
            Transition::TransferOperatorFee($inner) => $body,
            Transition::UpdateEpoch($inner) => $body,
        }
    };
}

fn encode_fields<T: BorshSerialize>(fields: &T) -> Vec<u8> {
    fields
        .try_to_vec()
        .expect("Serialization to vec is infallible")
}

impl Transition {
    /// The type tag of this transition.
    pub fn transition_type(&self) -> TransitionType {
        match self {
            Transition::Init(_) => TransitionType::Init,
            Transition::Deposit(_) => TransitionType::Deposit,
            Transition::Withdraw(_) => TransitionType::Withdraw,
            Transition::Buy(_) => TransitionType::Buy,
            Transition::Sell(_) => TransitionType::Sell,
            Transition::Settlement(_) => TransitionType::Settlement,
            Transition::TransferAsset(_) => TransitionType::TransferAsset,
            Transition::TransferShare(_) => TransitionType::TransferShare,
            Transition::AggregateOrders(_) => TransitionType::AggregateOrders,
            Transition::ExecutionResult(_) => TransitionType::ExecutionResult,
            Transition::Stake(_) => TransitionType::Stake,
            Transition::Unstake(_) => TransitionType::Unstake,
            Transition::AddPool(_) => TransitionType::AddPool,
            Transition::UpdatePool(_) => TransitionType::UpdatePool,
            Transition::DepositReward(_) => TransitionType::DepositReward,
            Transition::WithdrawProtocolFee(_) => TransitionType::WithdrawProtocolFee,
            Transition::TransferOperatorFee(_) => TransitionType::TransferOperatorFee,
            Transition::UpdateEpoch(_) => TransitionType::UpdateEpoch,
        }
    }

    /// The claimed state root after this transition.
    pub fn state_root(&self) -> Hash {
        with_variant!(self, inner => inner.state_root)
    }

    /// Replaces the claimed post-state root.
    pub fn set_state_root(&mut self, state_root: Hash) {
        with_variant!(self, inner => inner.state_root = state_root)
    }

    /// Encodes the transition as tag followed by its fields.
    pub fn encode(&self) -> Vec<u8> {
        encode_fields(self)
    }

    /// Decodes a transition, rejecting unknown tags and trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, TransitionError> {
        let ty = peek_transition_type(bytes)?
            .ok_or_else(|| TransitionError::UnknownType(bytes[0]))?;
        Self::try_from_slice(bytes).map_err(|e| TransitionError::Malformed {
            ty,
            reason: e.to_string(),
        })
    }

    /// The bytes an account signs: the tag followed by every field except the state root
    /// and the signature. `None` for transitions that are not user-signed.
    pub fn signed_payload(&self) -> Option<Vec<u8>> {
        let fields = match self {
            Transition::Withdraw(t) => encode_fields(&(
                t.account,
                t.account_id,
                t.asset_id,
                t.amount,
                t.fee,
                t.timestamp,
            )),
            Transition::Buy(t) => encode_fields(&(
                t.account_id,
                t.strategy_id,
                t.amount,
                t.max_share_price,
                t.fee,
                t.timestamp,
            )),
            Transition::Sell(t) => encode_fields(&(
                t.account_id,
                t.strategy_id,
                t.shares,
                t.min_share_price,
                t.fee,
                t.timestamp,
            )),
            Transition::TransferAsset(t) => encode_fields(&(
                t.from_account_id,
                t.to_account_id,
                t.to_account,
                t.asset_id,
                t.amount,
                t.fee,
                t.timestamp,
            )),
            Transition::TransferShare(t) => encode_fields(&(
                t.from_account_id,
                t.to_account_id,
                t.to_account,
                t.strategy_id,
                t.shares,
                t.fee,
                t.timestamp,
            )),
            Transition::Stake(t) => {
                encode_fields(&(t.pool_id, t.account_id, t.shares, t.fee, t.timestamp))
            }
            Transition::Unstake(t) => {
                encode_fields(&(t.pool_id, t.account_id, t.shares, t.fee, t.timestamp))
            }
            _ => return None,
        };
        let mut payload = Vec::with_capacity(1 + fields.len());
        payload.push(self.transition_type().tag());
        payload.extend_from_slice(&fields);
        Some(payload)
    }

    /// The signature of a user-signed transition.
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Transition::Withdraw(t) => Some(&t.signature),
            Transition::Buy(t) => Some(&t.signature),
            Transition::Sell(t) => Some(&t.signature),
            Transition::TransferAsset(t) => Some(&t.signature),
            Transition::TransferShare(t) => Some(&t.signature),
            Transition::Stake(t) => Some(&t.signature),
            Transition::Unstake(t) => Some(&t.signature),
            _ => None,
        }
    }

    fn signature_mut(&mut self) -> Option<&mut Signature> {
        match self {
            Transition::Withdraw(t) => Some(&mut t.signature),
            Transition::Buy(t) => Some(&mut t.signature),
            Transition::Sell(t) => Some(&mut t.signature),
            Transition::TransferAsset(t) => Some(&mut t.signature),
            Transition::TransferShare(t) => Some(&mut t.signature),
            Transition::Stake(t) => Some(&mut t.signature),
            Transition::Unstake(t) => Some(&mut t.signature),
            _ => None,
        }
    }

    /// The timestamp (per-account nonce) of a user-signed transition.
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Transition::Withdraw(t) => Some(t.timestamp),
            Transition::Buy(t) => Some(t.timestamp),
            Transition::Sell(t) => Some(t.timestamp),
            Transition::TransferAsset(t) => Some(t.timestamp),
            Transition::TransferShare(t) => Some(t.timestamp),
            Transition::Stake(t) => Some(t.timestamp),
            Transition::Unstake(t) => Some(t.timestamp),
            _ => None,
        }
    }

    /// Signs the transition in place with the account's key.
    pub fn sign(&mut self, secret_key: &SecretKey) -> Result<(), TransitionError> {
        let payload = self
            .signed_payload()
            .ok_or(TransitionError::NotSigned(self.transition_type()))?;
        let signature = Signature::sign(&payload, secret_key);
        if let Some(slot) = self.signature_mut() {
            *slot = signature;
        }
        Ok(())
    }

    /// Recovers the address that signed this transition.
    pub fn recover_signer(&self) -> Result<Address, TransitionError> {
        let ty = self.transition_type();
        let (Some(payload), Some(signature)) = (self.signed_payload(), self.signature()) else {
            return Err(TransitionError::NotSigned(ty));
        };
        Ok(signature.recover_signer(&payload)?)
    }
}
