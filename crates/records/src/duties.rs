//! Pending attestation duties and scoring

use std::collections::BTreeMap;

use stakecraft_core::{eth_to_wei, AttestationInfo, ValidatorIndex, ONE_ETH, U256};

/// Committee position -> tracked validator
pub(crate) type Positions = BTreeMap<usize, ValidatorIndex>;

/// Duties collected during one update that have not been matched yet.
///
/// Keyed by slot, then committee index.
#[derive(Debug, Default)]
pub(crate) struct PendingDuties {
    slots: BTreeMap<u64, BTreeMap<u64, Positions>>,
}

impl PendingDuties {
    pub fn insert(&mut self, slot: u64, committee: u64, positions: Positions) {
        if positions.is_empty() {
            return;
        }
        self.slots.entry(slot).or_default().insert(committee, positions);
    }

    pub fn has_slot(&self, slot: u64) -> bool {
        self.slots.contains_key(&slot)
    }

    /// Remove and return the validators whose bits are set in `attestation`
    pub fn take_attested(&mut self, attestation: &AttestationInfo) -> Vec<ValidatorIndex> {
        let Some(committees) = self.slots.get_mut(&attestation.slot) else {
            return Vec::new();
        };
        let Some(positions) = committees.get_mut(&attestation.committee_index) else {
            return Vec::new();
        };

        let attested: Vec<usize> = positions
            .keys()
            .copied()
            .filter(|&p| attestation.bit_at(p))
            .collect();
        let validators = attested
            .iter()
            .filter_map(|p| positions.remove(p))
            .collect();

        if positions.is_empty() {
            committees.remove(&attestation.committee_index);
        }
        if committees.is_empty() {
            self.slots.remove(&attestation.slot);
        }
        validators
    }

    /// Duties still waiting for an attestation
    pub fn len(&self) -> usize {
        self.slots
            .values()
            .flat_map(|c| c.values())
            .map(|p| p.len())
            .sum()
    }
}

/// Score for one successful attestation: `fee + bond * (1 - fee) / 32 ETH`
pub fn attestation_score(bond: U256, fee: U256) -> U256 {
    ONE_ETH.saturating_sub(fee) * bond / eth_to_wei(32) + fee
}

#[cfg(test)]
mod tests {
    use super::*;

    fn att(slot: u64, committee: u64, positions: &[usize], size: usize) -> AttestationInfo {
        AttestationInfo {
            slot,
            committee_index: committee,
            aggregation_bits: AttestationInfo::bits_for(positions, size).unwrap(),
        }
    }

    #[test]
    fn test_take_attested_removes_matches() {
        let mut duties = PendingDuties::default();
        duties.insert(10, 0, Positions::from([(1, 100), (4, 101)]));
        duties.insert(10, 2, Positions::from([(0, 102)]));
        assert_eq!(duties.len(), 3);

        let found = duties.take_attested(&att(10, 0, &[1, 2], 8));
        assert_eq!(found, vec![100]);
        assert_eq!(duties.len(), 2);

        // Same attestation again finds nothing
        assert!(duties.take_attested(&att(10, 0, &[1], 8)).is_empty());

        let found = duties.take_attested(&att(10, 0, &[4], 8));
        assert_eq!(found, vec![101]);
        assert!(duties.has_slot(10));

        duties.take_attested(&att(10, 2, &[0], 4));
        assert!(!duties.has_slot(10));
        assert_eq!(duties.len(), 0);
    }

    #[test]
    fn test_take_attested_unknown_slot_or_committee() {
        let mut duties = PendingDuties::default();
        duties.insert(10, 0, Positions::from([(0, 100)]));
        assert!(duties.take_attested(&att(11, 0, &[0], 4)).is_empty());
        assert!(duties.take_attested(&att(10, 1, &[0], 4)).is_empty());
        assert_eq!(duties.len(), 1);
    }

    #[test]
    fn test_empty_positions_ignored() {
        let mut duties = PendingDuties::default();
        duties.insert(10, 0, Positions::new());
        assert!(!duties.has_slot(10));
    }

    #[test]
    fn test_score_full_bond_no_fee() {
        // A solo 32 ETH bond with zero commission scores exactly 1 ETH
        assert_eq!(attestation_score(eth_to_wei(32), U256::ZERO), ONE_ETH);
    }

    #[test]
    fn test_score_leb8() {
        // 8 ETH bond at 14%: 0.14 + 0.86 * 8/32 = 0.355
        let fee = U256::from(140_000_000_000_000_000u64);
        assert_eq!(
            attestation_score(eth_to_wei(8), fee),
            U256::from(355_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_score_leb16() {
        // 16 ETH bond at 5%: 0.05 + 0.95 * 16/32 = 0.525
        let fee = U256::from(50_000_000_000_000_000u64);
        assert_eq!(
            attestation_score(eth_to_wei(16), fee),
            U256::from(525_000_000_000_000_000u64)
        );
    }
}
