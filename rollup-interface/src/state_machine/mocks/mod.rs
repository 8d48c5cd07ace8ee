//! Defines in-memory instantiations of the collaborator traits, which are useful
//! for testing and for operator tooling that runs without a base ledger.
use std::collections::BTreeMap;

use crate::collaborators::{
    AggregateFill, AggregateOrder, AssetBank, Registry, Strategy, StrategyError, TransferError,
};
use crate::{Address, AssetId, StrategyId};

/// Share prices are fixed-point with this scale.
pub const MOCK_PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

/// A strategy that trades at a fixed share price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockStrategy {
    /// The asset the strategy is bought with.
    pub asset: Address,
    /// Price of one share, scaled by [`MOCK_PRICE_SCALE`].
    pub share_price: u128,
    /// If set, every call fails.
    pub fail: bool,
    /// Orders received so far.
    pub calls: Vec<AggregateOrder>,
}

impl MockStrategy {
    /// A strategy over `asset` trading at `share_price`.
    pub fn new(asset: Address, share_price: u128) -> Self {
        Self {
            asset,
            share_price,
            fail: false,
            calls: Vec::new(),
        }
    }
}

impl Strategy for MockStrategy {
    fn asset_address(&self) -> Address {
        self.asset
    }

    fn aggregate_orders(&mut self, order: &AggregateOrder) -> Result<AggregateFill, StrategyError> {
        self.calls.push(*order);
        if self.fail {
            return Err(StrategyError("strategy is failing".to_owned()));
        }
        if self.share_price == 0 {
            return Err(StrategyError("zero share price".to_owned()));
        }
        let overflow = || StrategyError("arithmetic overflow".to_owned());
        let shares_from_buy = order
            .buy_amount
            .checked_mul(MOCK_PRICE_SCALE)
            .ok_or_else(overflow)?
            / self.share_price;
        let amount_from_sell = order
            .sell_shares
            .checked_mul(self.share_price)
            .ok_or_else(overflow)?
            / MOCK_PRICE_SCALE;
        if shares_from_buy < order.min_shares_from_buy
            || amount_from_sell < order.min_amount_from_sell
        {
            return Err(StrategyError("slippage bound violated".to_owned()));
        }
        Ok(AggregateFill {
            shares_from_buy,
            amount_from_sell,
        })
    }
}

/// A registry backed by maps. Ids are assigned from 1 in registration order.
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    assets: Vec<Address>,
    strategies: Vec<Address>,
    adapters: BTreeMap<Address, MockStrategy>,
}

impl MockRegistry {
    /// Registers an asset and returns its id.
    pub fn register_asset(&mut self, asset: Address) -> AssetId {
        let existing = self.asset_address_to_index(&asset);
        if existing != 0 {
            return existing;
        }
        self.assets.push(asset);
        self.assets.len() as AssetId
    }

    /// Registers a strategy adapter at `address` and returns its id.
    pub fn register_strategy(&mut self, address: Address, strategy: MockStrategy) -> StrategyId {
        self.adapters.insert(address, strategy);
        self.strategies.push(address);
        self.strategies.len() as StrategyId
    }
}

impl Registry for MockRegistry {
    type Strategy = MockStrategy;

    fn asset_address_to_index(&self, asset: &Address) -> AssetId {
        self.assets
            .iter()
            .position(|a| a == asset)
            .map(|i| i as AssetId + 1)
            .unwrap_or(0)
    }

    fn asset_index_to_address(&self, asset_id: AssetId) -> Option<Address> {
        let index = asset_id.checked_sub(1)?;
        self.assets.get(index as usize).copied()
    }

    fn strategy_index_to_address(&self, strategy_id: StrategyId) -> Option<Address> {
        let index = strategy_id.checked_sub(1)?;
        self.strategies.get(index as usize).copied()
    }

    fn strategy(&self, address: &Address) -> Option<&MockStrategy> {
        self.adapters.get(address)
    }

    fn strategy_mut(&mut self, address: &Address) -> Option<&mut MockStrategy> {
        self.adapters.get_mut(address)
    }
}

/// Token balances keyed by (asset, owner).
#[derive(Debug, Clone, Default)]
pub struct MockAssetBank {
    balances: BTreeMap<(Address, Address), u128>,
}

impl MockAssetBank {
    /// Creates `amount` of `asset` out of thin air for `owner`.
    pub fn mint(&mut self, asset: Address, owner: Address, amount: u128) {
        let balance = self.balances.entry((asset, owner)).or_default();
        *balance = balance.saturating_add(amount);
    }
}

impl AssetBank for MockAssetBank {
    fn transfer_from(
        &mut self,
        asset: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), TransferError> {
        let available = self.balance_of(asset, from);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                asset: *asset,
                owner: *from,
                available,
                needed: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(asset, to)
            .checked_add(amount)
            .ok_or(TransferError::Overflow {
                asset: *asset,
                owner: *to,
            })?;
        self.balances.insert((*asset, *from), available - amount);
        self.balances.insert((*asset, *to), credited);
        Ok(())
    }

    fn balance_of(&self, asset: &Address, owner: &Address) -> u128 {
        self.balances
            .get(&(*asset, *owner))
            .copied()
            .unwrap_or_default()
    }
}
