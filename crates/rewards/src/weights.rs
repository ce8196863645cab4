//! Effective RPL stake and node weight
//!
//! All values are 18-decimal fixed point. The logarithm is computed with the
//! same iterative binary expansion every oracle node uses, so results agree
//! to the wei.

use std::collections::HashMap;

use stakecraft_core::{eth_to_wei, Address, MinipoolStatus, StateSnapshot, ONE_ETH, U256};

/// Collateral cap applied to effective stake (150% of bonded ETH)
pub const MAX_COLLATERAL_FRACTION: U256 =
    U256::from_limbs([1_500_000_000_000_000_000, 0, 0, 0]);

/// log2(e) in fixed point
const LOG2_E: U256 = U256::from_limbs([1_442_695_040_888_963_407, 0, 0, 0]);

/// 13.6137 in fixed point
const WEIGHT_OFFSET: U256 = U256::from_limbs([13_613_700_000_000_000_000, 0, 0, 0]);

const LOG2_ITERATIONS: usize = 60;

/// Fixed-point base-2 logarithm. `x` must be at least 1.0.
pub fn log2(x: U256) -> U256 {
    let whole = x / ONE_ETH;
    if whole.is_zero() {
        return U256::ZERO;
    }
    let n = whole.bit_len() - 1;
    let mut out = ONE_ETH * U256::from(n);

    let mut y = x >> n;
    if y == ONE_ETH {
        return out;
    }

    let two = ONE_ETH * U256::from(2u8);
    let mut delta = ONE_ETH >> 1usize;
    for _ in 0..LOG2_ITERATIONS {
        y = y * y / ONE_ETH;
        if y >= two {
            out += delta;
            y >>= 1usize;
        }
        delta >>= 1usize;
    }
    out
}

/// Fixed-point natural logarithm
pub fn ln(x: U256) -> U256 {
    ONE_ETH * log2(x) / LOG2_E
}

/// Scale `value` by the fraction of the interval the node has existed for
pub fn scale_by_participation(
    value: U256,
    registration_time: u64,
    slot_time: u64,
    interval_duration: u64,
) -> U256 {
    let eligible = slot_time.saturating_sub(registration_time);
    if eligible >= interval_duration || interval_duration == 0 {
        return value;
    }
    value * U256::from(eligible) / U256::from(interval_duration)
}

/// Borrowed and bonded ETH of a node's minipools that count towards RPL
/// rewards: staking, present on the beacon chain and not exited by the
/// snapshot epoch.
pub fn eligible_eth(snapshot: &StateSnapshot, node: &Address) -> (U256, U256) {
    let epoch = snapshot.epoch();
    let mut borrowed = U256::ZERO;
    let mut bonded = U256::ZERO;
    for mp in snapshot.minipools_for_node(node) {
        if mp.status != MinipoolStatus::Staking {
            continue;
        }
        let Some(validator) = snapshot.validator(&mp.pubkey) else {
            continue;
        };
        if validator.exit_epoch <= epoch {
            continue;
        }
        borrowed += mp.user_deposit_balance;
        bonded += mp.node_deposit_balance;
    }
    (borrowed, bonded)
}

/// Per-node values with their network total
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeValues {
    pub values: HashMap<Address, U256>,
    pub total: U256,
}

impl NodeValues {
    pub fn get(&self, node: &Address) -> U256 {
        self.values.get(node).copied().unwrap_or_default()
    }

    fn insert(&mut self, node: Address, value: U256) {
        self.total += value;
        self.values.insert(node, value);
    }
}

/// Effective RPL stake of every node, clamped to the collateral bounds and
/// scaled by participation
pub fn effective_stakes(snapshot: &StateSnapshot, max_collateral_fraction: U256) -> NodeValues {
    let network = &snapshot.network;
    let price = network.rpl_price;
    let slot_time = snapshot.slot_time();
    let mut out = NodeValues::default();

    for node in &snapshot.nodes {
        let (borrowed, bonded) = eligible_eth(snapshot, &node.address);

        let stake = if price.is_zero() {
            U256::ZERO
        } else {
            let min = borrowed * network.min_collateral_fraction / price;
            let max = bonded * max_collateral_fraction / price;
            if node.rpl_stake < min {
                U256::ZERO
            } else {
                node.rpl_stake.min(max)
            }
        };

        let stake = scale_by_participation(
            stake,
            node.registration_time,
            slot_time,
            network.interval_duration,
        );
        out.insert(node.address, stake);
    }
    out
}

/// Weight of one node's stake against its borrowed ETH.
///
/// Linear up to 15% collateral, logarithmic above it.
pub fn node_weight(borrowed: U256, rpl_stake: U256, rpl_price: U256) -> U256 {
    if borrowed.is_zero() {
        return U256::ZERO;
    }
    let staked_value = rpl_stake * rpl_price / ONE_ETH;
    let percent = staked_value * eth_to_wei(100) / borrowed;
    if percent <= eth_to_wei(15) {
        return staked_value * U256::from(100u8);
    }

    let log_term = U256::from(2u8) * ln(percent - eth_to_wei(13));
    (WEIGHT_OFFSET + log_term) * borrowed / ONE_ETH
}

/// Weight of every node, scaled by participation
pub fn node_weights(snapshot: &StateSnapshot) -> NodeValues {
    let network = &snapshot.network;
    let price = network.rpl_price;
    let slot_time = snapshot.slot_time();
    let mut out = NodeValues::default();

    for node in &snapshot.nodes {
        let (borrowed, _) = eligible_eth(snapshot, &node.address);
        let min = if price.is_zero() {
            U256::MAX
        } else {
            borrowed * network.min_collateral_fraction / price
        };

        let weight = if node.rpl_stake < min || borrowed.is_zero() {
            U256::ZERO
        } else {
            scale_by_participation(
                node_weight(borrowed, node.rpl_stake, price),
                node.registration_time,
                slot_time,
                network.interval_duration,
            )
        };
        out.insert(node.address, weight);
    }
    out
}

/// Share of the collateral RPL pool for one node.
///
/// Blends stake-proportional and weight-proportional rewards; the weight
/// share grows by one sixth per interval from interval 18 onwards.
pub fn node_collateral_rewards(
    reward_index: u64,
    collateral_rewards: U256,
    stake: U256,
    total_stake: U256,
    weight: U256,
    total_weight: U256,
) -> U256 {
    if stake.is_zero() || weight.is_zero() {
        return U256::ZERO;
    }
    let c = reward_index.saturating_sub(17).clamp(1, 6);
    let six = U256::from(6u8);

    let by_weight =
        collateral_rewards * weight * U256::from(c) / (total_weight * six);
    if c == 6 {
        return by_weight;
    }
    let by_stake =
        U256::from(6 - c) * collateral_rewards * stake / (total_stake * six);
    by_weight + by_stake
}
