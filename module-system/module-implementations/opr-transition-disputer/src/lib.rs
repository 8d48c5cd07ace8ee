#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

#[cfg(test)]
mod tests;

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use opr_rollup_interface::collaborators::Registry;
use opr_rollup_interface::crypto::merkle::{self, MerkleError};
use opr_rollup_interface::entities::{
    composite_state_root, empty_state_root, leaf_hash_of, StateLeaf, ACCOUNT_TREE_DEPTH,
    STAKING_POOL_TREE_DEPTH, STRATEGY_TREE_DEPTH,
};
use opr_rollup_interface::optimistic::{DisputeProofs, EntityProof, TransitionProof};
use opr_rollup_interface::transition::{Transition, TransitionError};
use opr_rollup_interface::{Hash, ZERO_HASH};
use opr_transition_evaluator::{
    check_id_bounds, evaluate, get_state_root_and_access_ids, AccessIds, TransitionState,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// What the disputer needs to know about a committed block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct BlockCommitment {
    /// Merkle root over the block's transitions.
    pub root_hash: Hash,
    /// Number of transitions in the block.
    pub size: u64,
}

/// Why a disputed transition is fraudulent.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum FraudReason {
    /// The first transition of the chain is not an Init claiming the empty state.
    InvalidInitTransition,
    /// The transition bytes do not decode.
    BadEncoding,
    /// A deposit opened a new account for an address that already has one.
    BadAccountId,
    /// The transition cannot be applied to its pre-state.
    FailedToEvaluate(String),
    /// Applying the transition yields a different state root than it claims.
    InvalidPostStateRoot,
}

impl fmt::Display for FraudReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FraudReason::InvalidInitTransition => write!(f, "invalid init transition"),
            FraudReason::BadEncoding => write!(f, "bad encoding"),
            FraudReason::BadAccountId => write!(f, "bad account id"),
            FraudReason::FailedToEvaluate(reason) => write!(f, "failed to evaluate: {reason}"),
            FraudReason::InvalidPostStateRoot => write!(f, "invalid post-state root"),
        }
    }
}

/// Reasons a dispute is refused. None of them proves the disputed transition valid, except
/// [`DisputeError::NoFraudDetected`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisputeError {
    /// The prior transition does not immediately precede the disputed one.
    #[error("transition {prior_block}/{prior_index} does not precede {block}/{index}")]
    NotSequential {
        /// Block of the prior transition.
        prior_block: u64,
        /// Index of the prior transition.
        prior_index: u64,
        /// Block of the disputed transition.
        block: u64,
        /// Index of the disputed transition.
        index: u64,
    },
    /// A transition proof does not verify against its block.
    #[error("transition {index} is not included in block {block}")]
    NotIncluded {
        /// The claimed block.
        block: u64,
        /// The claimed index.
        index: u64,
    },
    /// The prior transition does not decode. Dispute the prior transition instead.
    #[error("prior transition does not decode: {0}")]
    UndecodablePrior(#[source] TransitionError),
    /// No account proof was supplied.
    #[error("expected {expected} account proofs, got {got}")]
    MissingAccountProof {
        /// Proofs the transition needs.
        expected: usize,
        /// Proofs supplied.
        got: usize,
    },
    /// The account proofs disagree on the account root.
    #[error("account proofs are against different roots")]
    AccountRootMismatch,
    /// The supplied state does not hash to the prior transition's post-state root.
    #[error("supplied state does not match the pre-state root 0x{}", hex::encode(.0))]
    PreStateRootMismatch(Hash),
    /// A leaf proof does not verify against its sub-tree root.
    #[error("{tree} proof at index {index} does not verify")]
    InvalidProof {
        /// The sub-tree.
        tree: &'static str,
        /// The proven index.
        index: u64,
    },
    /// A leaf proof is for another leaf than the transition touches.
    #[error("{tree} proof is for index {got}, transition touches {expected}")]
    IndexMismatch {
        /// The sub-tree.
        tree: &'static str,
        /// Id decoded from the transition.
        expected: u64,
        /// Index of the supplied proof.
        got: u64,
    },
    /// Recomputing the post-state failed on the supplied proofs.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// The disputed transition is valid.
    #[error("no fraud detected")]
    NoFraudDetected,
}

/// The leaf committing to one encoded transition in its block.
pub fn transition_leaf(encoded: &[u8]) -> Hash {
    merkle::leaf_hash(encoded)
}

/// The Merkle root of a block of encoded transitions.
pub fn block_root<T: AsRef<[u8]>>(transitions: &[T]) -> Hash {
    let leaves: Vec<Hash> = transitions
        .iter()
        .map(|t| transition_leaf(t.as_ref()))
        .collect();
    merkle::compute_root(&leaves)
}

/// The inclusion proof of transition `index` of a block.
pub fn transition_proof<T: AsRef<[u8]>>(
    block_id: u64,
    transitions: &[T],
    index: u64,
) -> Result<TransitionProof, MerkleError> {
    let leaves: Vec<Hash> = transitions
        .iter()
        .map(|t| transition_leaf(t.as_ref()))
        .collect();
    let transition = usize::try_from(index)
        .ok()
        .and_then(|i| transitions.get(i))
        .ok_or(MerkleError::IndexOutOfRange {
            index,
            depth: merkle::depth_for(leaves.len().max(1)),
        })?;
    Ok(TransitionProof {
        block_id,
        index,
        transition: transition.as_ref().to_vec(),
        siblings: merkle::generate_proof(&leaves, index)?,
    })
}

fn check_inclusion(proof: &TransitionProof, block: &BlockCommitment) -> Result<(), DisputeError> {
    let included = proof.index < block.size
        && proof.siblings.len() == merkle::depth_for(block.size.max(1) as usize)
        && merkle::verify_proof(
            &block.root_hash,
            &transition_leaf(&proof.transition),
            proof.index,
            &proof.siblings,
        );
    if !included {
        return Err(DisputeError::NotIncluded {
            block: proof.block_id,
            index: proof.index,
        });
    }
    Ok(())
}

fn check_sequential(
    prior: &TransitionProof,
    prior_block: &BlockCommitment,
    disputed: &TransitionProof,
) -> Result<(), DisputeError> {
    let same_block = prior.block_id == disputed.block_id && prior.index + 1 == disputed.index;
    let block_boundary = prior.block_id + 1 == disputed.block_id
        && prior.index + 1 == prior_block.size
        && disputed.index == 0;
    if !(same_block || block_boundary) {
        return Err(DisputeError::NotSequential {
            prior_block: prior.block_id,
            prior_index: prior.index,
            block: disputed.block_id,
            index: disputed.index,
        });
    }
    Ok(())
}

fn check_leaf<T: StateLeaf>(
    tree: &'static str,
    proof: &EntityProof<T>,
    depth: usize,
) -> Result<(), DisputeError> {
    let valid = proof.siblings.len() == depth
        && merkle::verify_proof(
            &proof.state_root,
            &leaf_hash_of(proof.value.as_ref()),
            proof.index,
            &proof.siblings,
        );
    if !valid {
        return Err(DisputeError::InvalidProof {
            tree,
            index: proof.index,
        });
    }
    Ok(())
}

fn check_index(tree: &'static str, expected: Option<u32>, got: u64) -> Result<(), DisputeError> {
    match expected {
        Some(expected) if u64::from(expected) != got => Err(DisputeError::IndexMismatch {
            tree,
            expected: u64::from(expected),
            got,
        }),
        _ => Ok(()),
    }
}

/// The sub-tree root after replacing the proven leaf, if it changed.
fn updated_root<T>(proof: &EntityProof<T>, new_leaf: Hash) -> Hash {
    if new_leaf == ZERO_HASH {
        proof.state_root
    } else {
        merkle::compute_root_from_proof(&new_leaf, proof.index, &proof.siblings)
    }
}

/// Decides whether the transition in `disputed` is fraudulent, given the transition committed
/// immediately before it and witnesses of the state between the two.
///
/// Returns the fraud reason, or an error if the dispute must be refused.
pub fn dispute_transition<R: Registry>(
    prior: &TransitionProof,
    prior_block: &BlockCommitment,
    disputed: &TransitionProof,
    disputed_block: &BlockCommitment,
    proofs: &DisputeProofs,
    registry: &R,
) -> Result<FraudReason, DisputeError> {
    if disputed.block_id == 0 && disputed.index == 0 {
        check_inclusion(disputed, disputed_block)?;
        return match Transition::decode(&disputed.transition) {
            Ok(Transition::Init(init)) if init.state_root == empty_state_root() => {
                Err(DisputeError::NoFraudDetected)
            }
            _ => Ok(FraudReason::InvalidInitTransition),
        };
    }

    check_sequential(prior, prior_block, disputed)?;
    check_inclusion(prior, prior_block)?;
    check_inclusion(disputed, disputed_block)?;

    let (pre_state_root, _) =
        get_state_root_and_access_ids(&prior.transition).map_err(DisputeError::UndecodablePrior)?;
    let transition = match Transition::decode(&disputed.transition) {
        Ok(transition) => transition,
        Err(e) => {
            debug!(error = %e, "Disputed transition does not decode");
            return Ok(FraudReason::BadEncoding);
        }
    };
    // An out-of-range id has no leaf a witness could prove, so it is judged on the bytes alone.
    if let Err(e) = check_id_bounds(&transition) {
        info!(error = %e, "Disputed transition names an out-of-range id");
        return Ok(FraudReason::FailedToEvaluate(e.to_string()));
    }
    let post_state_root = transition.state_root();
    let ids = AccessIds::of(&transition);

    let account_root = match proofs.account_proofs.first() {
        Some(proof) => proof.state_root,
        None => {
            return Err(DisputeError::MissingAccountProof {
                expected: 1,
                got: 0,
            })
        }
    };
    if proofs
        .account_proofs
        .iter()
        .any(|p| p.state_root != account_root)
    {
        return Err(DisputeError::AccountRootMismatch);
    }
    let supplied_root = composite_state_root(
        &account_root,
        &proofs.strategy_proof.state_root,
        &proofs.staking_pool_proof.state_root,
        &proofs.global_info.hash(),
    );
    if supplied_root != pre_state_root {
        return Err(DisputeError::PreStateRootMismatch(pre_state_root));
    }

    for proof in &proofs.account_proofs {
        check_leaf("account", proof, ACCOUNT_TREE_DEPTH)?;
    }
    check_leaf("strategy", &proofs.strategy_proof, STRATEGY_TREE_DEPTH)?;
    check_leaf(
        "staking pool",
        &proofs.staking_pool_proof,
        STAKING_POOL_TREE_DEPTH,
    )?;

    let source = &proofs.account_proofs[0];
    if let Transition::Deposit(deposit) = &transition {
        if let Some(account) = &source.value {
            if account.account == deposit.account && source.index != u64::from(deposit.account_id)
            {
                return Ok(FraudReason::BadAccountId);
            }
        }
    }

    check_index("account", ids.account_id, source.index)?;
    let dest = match ids.account_id_dest {
        Some(dest_id) => {
            let dest = proofs
                .account_proofs
                .get(1)
                .ok_or(DisputeError::MissingAccountProof {
                    expected: 2,
                    got: proofs.account_proofs.len(),
                })?;
            check_index("account", Some(dest_id), dest.index)?;
            Some(dest)
        }
        None => None,
    };
    check_index("strategy", ids.strategy_id, proofs.strategy_proof.index)?;
    check_index("staking pool", ids.pool_id, proofs.staking_pool_proof.index)?;

    let state = TransitionState {
        accounts: [
            source.value.clone(),
            dest.and_then(|d| d.value.clone()),
        ],
        strategy: ids
            .strategy_id
            .and_then(|_| proofs.strategy_proof.value.clone()),
        staking_pool: ids
            .pool_id
            .and_then(|_| proofs.staking_pool_proof.value.clone()),
        global: proofs.global_info.clone(),
    };
    let hashes = match evaluate(&transition, &state, registry) {
        Ok(hashes) => hashes,
        Err(e) => {
            info!(error = %e, "Disputed transition fails to evaluate");
            return Ok(FraudReason::FailedToEvaluate(e.to_string()));
        }
    };

    let new_account_root = match dest {
        Some(dest) if hashes.accounts != [ZERO_HASH; 2] => {
            let leaf = |new: Hash, proof: &EntityProof<_>| {
                if new == ZERO_HASH {
                    leaf_hash_of(proof.value.as_ref())
                } else {
                    new
                }
            };
            let source_leaf = leaf(hashes.accounts[0], source);
            let dest_leaf = leaf(hashes.accounts[1], dest);
            merkle::compute_root_two_leaves(
                (&source_leaf, source.index, &source.siblings),
                (&dest_leaf, dest.index, &dest.siblings),
            )?
        }
        _ => updated_root(source, hashes.accounts[0]),
    };
    let new_global_hash = if hashes.global == ZERO_HASH {
        proofs.global_info.hash()
    } else {
        hashes.global
    };
    let recomputed = composite_state_root(
        &new_account_root,
        &updated_root(&proofs.strategy_proof, hashes.strategy),
        &updated_root(&proofs.staking_pool_proof, hashes.staking_pool),
        &new_global_hash,
    );

    if recomputed != post_state_root {
        info!(
            block = disputed.block_id,
            index = disputed.index,
            "Disputed transition claims an invalid post-state root"
        );
        return Ok(FraudReason::InvalidPostStateRoot);
    }
    Err(DisputeError::NoFraudDetected)
}
