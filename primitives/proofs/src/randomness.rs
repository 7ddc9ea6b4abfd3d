use crate::ChainEpoch;

/// Number of epochs between the chain head and the epoch the sealing ticket is
/// drawn from. Equal to the chain finality, the sealed sector cannot depend on
/// randomness that may still be reorganized away.
pub const SEAL_RANDOMNESS_LOOKBACK: ChainEpoch = 900;

/// Specifies a domain for randomness generation.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum DomainSeparationTag {
    TicketProduction,
    ElectionProofProduction,
    WinningPoStChallengeSeed,
    WindowedPoStChallengeSeed,
    SealRandomness,
    InteractiveSealChallengeSeed,
    WindowedPoStDeadlineAssignment,
    MarketDealCronSeed,
    PoStChainCommit,
}

impl DomainSeparationTag {
    /// Numeric value of the tag, as understood by the chain nodes.
    pub fn value(&self) -> i64 {
        match self {
            DomainSeparationTag::TicketProduction => 1,
            DomainSeparationTag::ElectionProofProduction => 2,
            DomainSeparationTag::WinningPoStChallengeSeed => 3,
            DomainSeparationTag::WindowedPoStChallengeSeed => 4,
            DomainSeparationTag::SealRandomness => 5,
            DomainSeparationTag::InteractiveSealChallengeSeed => 6,
            DomainSeparationTag::WindowedPoStDeadlineAssignment => 7,
            DomainSeparationTag::MarketDealCronSeed => 8,
            DomainSeparationTag::PoStChainCommit => 9,
        }
    }

    /// Returns the domain separation tag as a byte array.
    pub fn as_bytes(&self) -> [u8; 8] {
        self.value().to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::DomainSeparationTag;

    #[test]
    fn seal_randomness_tag() {
        assert_eq!(DomainSeparationTag::SealRandomness.value(), 5);
        assert_eq!(
            DomainSeparationTag::SealRandomness.as_bytes(),
            [0, 0, 0, 0, 0, 0, 0, 5]
        );
    }
}
