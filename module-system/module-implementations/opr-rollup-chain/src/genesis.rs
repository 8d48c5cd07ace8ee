//! Genesis configuration and initialization.
use anyhow::Result;
use opr_rollup_interface::Address;
use opr_state::{Storage, WorkingSet};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{ChainStatus, RollupChain};

/// Initial configuration of the rollup chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupChainConfig {
    /// May pause, resume and replace the operator.
    pub owner: Address,
    /// May commit blocks.
    pub operator: Address,
    /// The custody address deposits are moved to.
    pub chain_address: Address,
    /// Receives withdrawn protocol fees.
    pub protocol_fee_receiver: Address,
    /// Base-ledger blocks during which a committed block can be disputed.
    pub challenge_period: u64,
    /// Blocks a deposit or epoch update may wait before the chain can be halted.
    pub max_priority_delay: u64,
    /// Base-ledger blocks per staking epoch.
    pub blocks_per_epoch: u64,
}

impl RollupChain {
    /// Stores the configuration and starts the chain in the active state.
    pub fn init_module<S: Storage>(
        &self,
        config: &RollupChainConfig,
        working_set: &mut WorkingSet<S>,
    ) -> Result<()> {
        anyhow::ensure!(!config.owner.is_zero(), "The owner must be set at genesis");
        anyhow::ensure!(
            !config.operator.is_zero(),
            "The operator must be set at genesis"
        );
        anyhow::ensure!(
            !config.chain_address.is_zero(),
            "The chain address must be set at genesis"
        );
        anyhow::ensure!(
            config.blocks_per_epoch > 0,
            "An epoch must span at least one block"
        );

        self.owner.set(&config.owner, working_set);
        self.operator.set(&config.operator, working_set);
        self.chain_address.set(&config.chain_address, working_set);
        self.protocol_fee_receiver
            .set(&config.protocol_fee_receiver, working_set);
        self.challenge_period
            .set(&config.challenge_period, working_set);
        self.max_priority_delay
            .set(&config.max_priority_delay, working_set);
        self.blocks_per_epoch
            .set(&config.blocks_per_epoch, working_set);
        self.executed_count.set(&0, working_set);
        self.status.set(&ChainStatus::Active, working_set);

        info!(
            operator = %config.operator,
            challenge_period = config.challenge_period,
            max_priority_delay = config.max_priority_delay,
            "Initialized rollup chain"
        );
        Ok(())
    }
}
