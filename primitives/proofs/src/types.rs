use core::fmt::Display;

/// Identifier of an on-chain actor, the storage provider owning a sector.
pub type ActorId = u64;

pub type SectorNumber = u64;

/// Chain height, may be negative when sampling randomness close to genesis.
pub type ChainEpoch = i64;

/// Raw bytes of a piece, data or replica commitment.
pub type RawCommitment = [u8; 32];

/// Byte representation of randomness seed, it's used for challenge generation.
pub type Ticket = [u8; 32];

/// Sector identifier, unique across the whole network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct SectorId {
    /// Storage provider owning the sector.
    pub miner: ActorId,
    /// Sector number, unique per storage provider.
    pub number: SectorNumber,
}

impl SectorId {
    pub fn new(miner: ActorId, number: SectorNumber) -> Self {
        Self { miner, number }
    }
}

impl Display for SectorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "s-t0{}-{}", self.miner, self.number)
    }
}

/// A sector together with the proof it is being sealed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct SectorRef {
    pub id: SectorId,
    pub proof_type: RegisteredSealProof,
}

#[allow(non_camel_case_types)]
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
#[cfg_attr(feature = "clap", derive(::clap::ValueEnum))]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
/// References:
/// * <https://github.com/filecoin-project/rust-filecoin-proofs-api/blob/b44e7cecf2a120aa266b6886628e869ba67252af/src/registry.rs#L18>
pub enum RegisteredSealProof {
    #[cfg_attr(feature = "clap", clap(name = "2KiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "2KiB"))]
    StackedDRG2KiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "8MiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "8MiB"))]
    StackedDRG8MiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "512MiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "512MiB"))]
    StackedDRG512MiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "32GiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "32GiB"))]
    StackedDRG32GiBV1P1,
    #[cfg_attr(feature = "clap", clap(name = "64GiB"))]
    #[cfg_attr(feature = "serde", serde(alias = "64GiB"))]
    StackedDRG64GiBV1P1,
}

impl RegisteredSealProof {
    pub fn sector_size(&self) -> SectorSize {
        match self {
            RegisteredSealProof::StackedDRG2KiBV1P1 => SectorSize::_2KiB,
            RegisteredSealProof::StackedDRG8MiBV1P1 => SectorSize::_8MiB,
            RegisteredSealProof::StackedDRG512MiBV1P1 => SectorSize::_512MiB,
            RegisteredSealProof::StackedDRG32GiBV1P1 => SectorSize::_32GiB,
            RegisteredSealProof::StackedDRG64GiBV1P1 => SectorSize::_64GiB,
        }
    }

    /// Number of SDR layers produced while encoding a replica of this proof type.
    pub fn layers(&self) -> u64 {
        match self {
            RegisteredSealProof::StackedDRG2KiBV1P1
            | RegisteredSealProof::StackedDRG8MiBV1P1
            | RegisteredSealProof::StackedDRG512MiBV1P1 => 2,
            RegisteredSealProof::StackedDRG32GiBV1P1 | RegisteredSealProof::StackedDRG64GiBV1P1 => {
                11
            }
        }
    }
}

/// SectorSize indicates one of a set of possible sizes in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum SectorSize {
    _2KiB,
    _8MiB,
    _512MiB,
    _32GiB,
    _64GiB,
}

impl SectorSize {
    /// Returns the size of a sector in bytes
    /// <https://github.com/filecoin-project/ref-fvm/blob/5659196fa94accdf1e7f10e00586a8166c44a60d/shared/src/sector/mod.rs#L40>
    pub fn bytes(&self) -> u64 {
        match self {
            SectorSize::_2KiB => 2 << 10,
            SectorSize::_8MiB => 8 << 20,
            SectorSize::_512MiB => 512 << 20,
            SectorSize::_32GiB => 32 << 30,
            SectorSize::_64GiB => 64 << 30,
        }
    }
}

impl Display for SectorSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            SectorSize::_2KiB => "2KiB",
            SectorSize::_8MiB => "8MiB",
            SectorSize::_512MiB => "512MiB",
            SectorSize::_32GiB => "32GiB",
            SectorSize::_64GiB => "64GiB",
        };
        f.write_str(s)
    }
}
