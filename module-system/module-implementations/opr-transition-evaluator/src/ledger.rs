//! An operator-side ledger that applies transitions, maintains the state trees, and produces
//! the witnesses a dispute needs.
use std::collections::BTreeMap;

use opr_rollup_interface::collaborators::Registry;
use opr_rollup_interface::crypto::merkle::MerkleError;
use opr_rollup_interface::crypto::SparseStateTree;
use opr_rollup_interface::entities::{
    AccountInfo, GlobalInfo, StakingPoolInfo, StateLeaf, StateRoots, StrategyInfo,
    ACCOUNT_TREE_DEPTH, STAKING_POOL_TREE_DEPTH, STRATEGY_TREE_DEPTH,
};
use opr_rollup_interface::optimistic::{
    AccountProof, DisputeProofs, EntityProof, StakingPoolProof, StrategyProof,
};
use opr_rollup_interface::transition::Transition;
use opr_rollup_interface::{AccountId, Address, Hash, PoolId, StrategyId};
use thiserror::Error;
use tracing::debug;

use crate::{apply_transition, AccessIds, EvaluationError, TransitionState};

/// Failures of [`LedgerState::apply`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The transition cannot be applied.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    /// An id does not fit its tree.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

/// The full rollup state as the operator keeps it.
#[derive(Debug, Clone)]
pub struct LedgerState {
    accounts: BTreeMap<AccountId, AccountInfo>,
    strategies: BTreeMap<StrategyId, StrategyInfo>,
    pools: BTreeMap<PoolId, StakingPoolInfo>,
    global: GlobalInfo,
    account_tree: SparseStateTree,
    strategy_tree: SparseStateTree,
    pool_tree: SparseStateTree,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            accounts: BTreeMap::new(),
            strategies: BTreeMap::new(),
            pools: BTreeMap::new(),
            global: GlobalInfo::default(),
            account_tree: SparseStateTree::new(ACCOUNT_TREE_DEPTH),
            strategy_tree: SparseStateTree::new(STRATEGY_TREE_DEPTH),
            pool_tree: SparseStateTree::new(STAKING_POOL_TREE_DEPTH),
        }
    }
}

impl LedgerState {
    /// The four components of the current state root.
    pub fn roots(&self) -> StateRoots {
        StateRoots {
            account_root: self.account_tree.root(),
            strategy_root: self.strategy_tree.root(),
            staking_pool_root: self.pool_tree.root(),
            global_info_hash: self.global.hash(),
        }
    }

    /// The current state root.
    pub fn state_root(&self) -> Hash {
        self.roots().composite()
    }

    /// An account by id.
    pub fn account(&self, account_id: AccountId) -> Option<&AccountInfo> {
        self.accounts.get(&account_id)
    }

    /// The account owned by `owner`, if it has one.
    pub fn account_by_owner(&self, owner: &Address) -> Option<&AccountInfo> {
        self.accounts.values().find(|a| &a.account == owner)
    }

    /// A strategy by id.
    pub fn strategy(&self, strategy_id: StrategyId) -> Option<&StrategyInfo> {
        self.strategies.get(&strategy_id)
    }

    /// A staking pool by id.
    pub fn pool(&self, pool_id: PoolId) -> Option<&StakingPoolInfo> {
        self.pools.get(&pool_id)
    }

    /// The global info.
    pub fn global(&self) -> &GlobalInfo {
        &self.global
    }

    /// Proof of the account leaf at `account_id`.
    pub fn account_proof(&self, account_id: AccountId) -> Result<AccountProof, MerkleError> {
        entity_proof(&self.account_tree, account_id, self.accounts.get(&account_id))
    }

    /// Proof of the strategy leaf at `strategy_id`.
    pub fn strategy_proof(&self, strategy_id: StrategyId) -> Result<StrategyProof, MerkleError> {
        entity_proof(
            &self.strategy_tree,
            strategy_id,
            self.strategies.get(&strategy_id),
        )
    }

    /// Proof of the staking-pool leaf at `pool_id`.
    pub fn pool_proof(&self, pool_id: PoolId) -> Result<StakingPoolProof, MerkleError> {
        entity_proof(&self.pool_tree, pool_id, self.pools.get(&pool_id))
    }

    /// The pre-state witnesses of `transition`, taken from the current state. Leaves the
    /// transition does not touch are proven at index 0.
    pub fn dispute_proofs(&self, transition: &Transition) -> Result<DisputeProofs, MerkleError> {
        let ids = AccessIds::of(transition);
        let mut account_proofs = vec![self.account_proof(ids.account_id.unwrap_or_default())?];
        if let Some(dest) = ids.account_id_dest {
            account_proofs.push(self.account_proof(dest)?);
        }
        Ok(DisputeProofs {
            account_proofs,
            strategy_proof: self.strategy_proof(ids.strategy_id.unwrap_or_default())?,
            staking_pool_proof: self.pool_proof(ids.pool_id.unwrap_or_default())?,
            global_info: self.global.clone(),
        })
    }

    /// Applies `transition` and returns it with its post-state root filled in.
    ///
    /// Init leaves the state untouched and claims the current root. On error the ledger is
    /// unchanged.
    pub fn apply<R: Registry>(
        &mut self,
        mut transition: Transition,
        registry: &R,
    ) -> Result<Transition, LedgerError> {
        if !matches!(transition, Transition::Init(_)) {
            let ids = AccessIds::of(&transition);
            let mut state = self.transition_state(&ids);
            apply_transition(&transition, &mut state, registry)?;
            self.write_back(&ids, state)?;
        }
        let state_root = self.state_root();
        debug!(transition_type = %transition.transition_type(), state_root = hex::encode(state_root), "Applied transition");
        transition.set_state_root(state_root);
        Ok(transition)
    }

    fn transition_state(&self, ids: &AccessIds) -> TransitionState {
        let account = |id: Option<AccountId>| id.and_then(|id| self.accounts.get(&id).cloned());
        TransitionState {
            accounts: [account(ids.account_id), account(ids.account_id_dest)],
            strategy: ids
                .strategy_id
                .and_then(|id| self.strategies.get(&id).cloned()),
            staking_pool: ids.pool_id.and_then(|id| self.pools.get(&id).cloned()),
            global: self.global.clone(),
        }
    }

    fn write_back(&mut self, ids: &AccessIds, state: TransitionState) -> Result<(), MerkleError> {
        // Check every index before touching anything.
        let [source, dest] = state.accounts;
        let accounts = [(ids.account_id, source), (ids.account_id_dest, dest)];
        for (id, _) in &accounts {
            check_index(*id, ACCOUNT_TREE_DEPTH)?;
        }
        check_index(ids.strategy_id, STRATEGY_TREE_DEPTH)?;
        check_index(ids.pool_id, STAKING_POOL_TREE_DEPTH)?;

        for (id, account) in accounts {
            if let (Some(id), Some(account)) = (id, account) {
                self.account_tree.set(u64::from(id), account.leaf_hash())?;
                self.accounts.insert(id, account);
            }
        }
        if let (Some(id), Some(strategy)) = (ids.strategy_id, state.strategy) {
            self.strategy_tree.set(u64::from(id), strategy.leaf_hash())?;
            self.strategies.insert(id, strategy);
        }
        if let (Some(id), Some(pool)) = (ids.pool_id, state.staking_pool) {
            self.pool_tree.set(u64::from(id), pool.leaf_hash())?;
            self.pools.insert(id, pool);
        }
        self.global = state.global;
        Ok(())
    }
}

fn check_index(id: Option<u32>, depth: usize) -> Result<(), MerkleError> {
    match id {
        Some(id) if depth < 32 && u64::from(id) >> depth != 0 => Err(MerkleError::IndexOutOfRange {
            index: u64::from(id),
            depth,
        }),
        _ => Ok(()),
    }
}

fn entity_proof<T: Clone>(
    tree: &SparseStateTree,
    id: u32,
    value: Option<&T>,
) -> Result<EntityProof<T>, MerkleError> {
    Ok(EntityProof {
        state_root: tree.root(),
        index: u64::from(id),
        value: value.cloned(),
        siblings: tree.proof(u64::from(id))?,
    })
}
