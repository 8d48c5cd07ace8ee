//! Interfaces of the external collaborators the rollup core calls into.
//!
//! Asset custody, the strategy adapters and the asset/strategy registry live outside the core.
//! The core only depends on these traits, so they can be backed by base-ledger contracts or by
//! the in-memory implementations in `mocks`.
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Address, AssetId, StrategyId};

/// An aggregate order forwarded to a strategy during block execution.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct AggregateOrder {
    pub buy_amount: u128,
    pub sell_shares: u128,
    pub min_shares_from_buy: u128,
    pub min_amount_from_sell: u128,
}

/// What a strategy delivered for an aggregate order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub struct AggregateFill {
    pub shares_from_buy: u128,
    pub amount_from_sell: u128,
}

/// A strategy call that reverted. Tolerated by the chain and recorded as a failed execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("strategy call failed: {0}")]
pub struct StrategyError(pub String);

/// A failed asset transfer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The payer holds less than the amount.
    #[error("insufficient balance of {asset} at {owner}: has {available}, needs {needed}")]
    InsufficientBalance {
        /// Asset contract.
        asset: Address,
        /// Payer.
        owner: Address,
        /// Balance held.
        available: u128,
        /// Amount requested.
        needed: u128,
    },
    /// The recipient's balance would overflow.
    #[error("balance overflow of {asset} at {owner}")]
    Overflow {
        /// Asset contract.
        asset: Address,
        /// Recipient.
        owner: Address,
    },
}

/// A yield strategy adapter.
pub trait Strategy {
    /// The asset the strategy is bought with.
    fn asset_address(&self) -> Address;

    /// Executes one aggregate order, buying and selling shares in one step.
    fn aggregate_orders(&mut self, order: &AggregateOrder) -> Result<AggregateFill, StrategyError>;
}

/// The asset and strategy registry.
pub trait Registry {
    /// The strategy adapters this registry resolves to.
    type Strategy: Strategy;

    /// Id of a registered asset, `0` if unregistered.
    fn asset_address_to_index(&self, asset: &Address) -> AssetId;

    /// Address of a registered asset.
    fn asset_index_to_address(&self, asset_id: AssetId) -> Option<Address>;

    /// Address of a registered strategy.
    fn strategy_index_to_address(&self, strategy_id: StrategyId) -> Option<Address>;

    /// The adapter deployed at a strategy address.
    fn strategy(&self, address: &Address) -> Option<&Self::Strategy>;

    /// The adapter deployed at a strategy address, for execution.
    fn strategy_mut(&mut self, address: &Address) -> Option<&mut Self::Strategy>;
}

/// Fungible-token custody on the base ledger.
pub trait AssetBank {
    /// Moves `amount` of `asset` from `from` to `to`.
    fn transfer_from(
        &mut self,
        asset: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), TransferError>;

    /// Balance of `owner` in `asset`.
    fn balance_of(&self, asset: &Address, owner: &Address) -> u128;
}
