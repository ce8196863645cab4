//! Network balance report

use tracing::debug;

use stakecraft_core::{
    eth_to_wei, DepositType, MinipoolDetails, MinipoolStatus, NetworkBalances, StateSnapshot, U256,
};

/// User-owned ETH held by one minipool, and whether it counts as staking
pub fn minipool_user_balance(mp: &MinipoolDetails, snapshot: &StateSnapshot) -> (U256, bool) {
    if mp.is_vacant || mp.status == MinipoolStatus::Dissolved {
        return (U256::ZERO, false);
    }
    if matches!(mp.status, MinipoolStatus::Initialized | MinipoolStatus::Prelaunch) {
        return (mp.user_deposit_balance, false);
    }

    let epoch = snapshot.epoch();
    let Some(validator) = snapshot.validator(&mp.pubkey) else {
        return (mp.user_deposit_balance, false);
    };
    if validator.activation_epoch >= epoch {
        return (mp.user_deposit_balance, false);
    }

    let staking = validator.exit_epoch > epoch;
    // Full deposits still waiting for their refund carry 16 ETH of user
    // deposit outside the minipool
    if mp.user_deposit_balance.is_zero() && mp.deposit_type == DepositType::Full {
        return (mp.user_share_of_balance.saturating_sub(eth_to_wei(16)), staking);
    }
    (mp.user_share_of_balance, staking)
}

/// Total and staking ETH backing rETH at the snapshot.
///
/// `smoothing_pool_share` is the pool stakers' approximate share of the
/// smoothing pool.
pub fn calculate_network_balances(
    snapshot: &StateSnapshot,
    smoothing_pool_share: U256,
) -> NetworkBalances {
    let network = &snapshot.network;

    let mut minipools_total = U256::ZERO;
    let mut minipools_staking = U256::ZERO;
    for mp in &snapshot.minipools {
        let (balance, staking) = minipool_user_balance(mp, snapshot);
        minipools_total += balance;
        if staking {
            minipools_staking += balance;
        }
    }

    let mut distributor_total = U256::ZERO;
    let mut node_credit = U256::ZERO;
    for node in &snapshot.nodes {
        distributor_total += node.distributor_balance_user_eth;
        node_credit += node.deposit_credit_balance;
    }

    debug!(
        "Balances at block {}: deposit pool {}, minipools {} ({} staking), rETH contract {}, distributors {}, smoothing pool {}, node credit {}",
        snapshot.execution_block,
        network.deposit_pool_balance,
        minipools_total,
        minipools_staking,
        network.reth_contract_balance,
        distributor_total,
        smoothing_pool_share,
        node_credit
    );

    let total_eth = (network.deposit_pool_balance
        + minipools_total
        + network.reth_contract_balance
        + distributor_total
        + smoothing_pool_share)
        .saturating_sub(node_credit);

    NetworkBalances {
        block: snapshot.execution_block,
        slot_timestamp: snapshot.slot_time(),
        total_eth,
        staking_eth: minipools_staking,
        reth_supply: network.reth_supply,
    }
}
