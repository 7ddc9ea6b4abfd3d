use primitives_proofs::{RegisteredSealProof, SectorSize};
use serde::{Deserialize, Serialize};

/// Default number of failed attempts after which a task is abandoned.
pub const DEFAULT_MAX_FAILURES: u32 = 2;

/// Default number of times a sector can be sent back to the SDR stage.
pub const DEFAULT_MAX_SDR_RESETS: u32 = 2;

/// Default percentage of the sealing storage that must stay free.
pub const DEFAULT_MIN_FREE_STORAGE_PERCENTAGE: u8 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("minimum free storage percentage must be below 100, got {0}")]
    InvalidFreeStoragePercentage(u8),
    #[error("max failures must be at least 1")]
    NoFailuresAllowed,
}

/// Network the worker seals for, it decides the resources an SDR task claims.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(::clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum NetworkProfile {
    #[default]
    Mainnet,
    /// Development network, sealing tiny sectors on modest machines.
    Devnet,
}

impl NetworkProfile {
    /// Proof the resource claim of a task is computed for.
    pub fn seal_proof(&self) -> RegisteredSealProof {
        match self {
            NetworkProfile::Mainnet => RegisteredSealProof::StackedDRG32GiBV1P1,
            NetworkProfile::Devnet => RegisteredSealProof::StackedDRG2KiBV1P1,
        }
    }

    pub fn sector_size(&self) -> SectorSize {
        self.seal_proof().sector_size()
    }

    pub fn cpu(&self) -> u32 {
        match self {
            NetworkProfile::Mainnet => 4,
            NetworkProfile::Devnet => 1,
        }
    }

    pub fn ram(&self) -> u64 {
        match self {
            NetworkProfile::Mainnet => (64 << 30) + (256 << 20),
            NetworkProfile::Devnet => 1 << 30,
        }
    }
}

/// Configuration of the SDR stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdrTaskConfig {
    pub network: NetworkProfile,

    /// Maximum number of SDR tasks running at once on a machine, 0 means no
    /// limit.
    pub max_tasks: usize,

    /// Failed attempts after which the scheduler gives up on a task.
    pub max_failures: u32,

    /// How many times a sector can be sent back to the SDR stage after a
    /// failure detected by a later stage.
    pub max_sdr_resets: u32,

    /// Percentage of the sealing storage that must stay free after the SDR
    /// cache is allocated.
    pub min_free_storage_percentage: u8,
}

impl Default for SdrTaskConfig {
    fn default() -> Self {
        Self {
            network: NetworkProfile::default(),
            max_tasks: 0,
            max_failures: DEFAULT_MAX_FAILURES,
            max_sdr_resets: DEFAULT_MAX_SDR_RESETS,
            min_free_storage_percentage: DEFAULT_MIN_FREE_STORAGE_PERCENTAGE,
        }
    }
}

impl SdrTaskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_free_storage_percentage >= 100 {
            return Err(ConfigError::InvalidFreeStoragePercentage(
                self.min_free_storage_percentage,
            ));
        }

        if self.max_failures == 0 {
            return Err(ConfigError::NoFailuresAllowed);
        }

        Ok(())
    }
}
