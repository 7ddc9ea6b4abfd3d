//! The SDR task: computes the data commitment of a sector, draws its ticket,
//! runs the replica encoding and records the results.

use std::{fmt::Display, sync::Arc};

use async_trait::async_trait;
use primitives_proofs::{RegisteredSealProof, SectorId};

use crate::{
    chain::ChainError,
    config::SdrTaskConfig,
    db::{DBError, PipelineDB},
    encoder::{EncoderError, ReplicaEncoder},
    layout::{compute_commitment, LayoutError},
    poller::{PollerError, SealPoller},
    task::{AddTaskFn, Resources, StillOwned, TaskId, TaskInterface, TaskTypeDetails},
    ticket::TicketResolver,
    types::SdrOutcome,
};

/// Name the SDR task type is registered under.
pub const SDR_TASK_NAME: &str = "SDR";

/// Computes the sealing storage an SDR task claims for a sector of the given
/// proof type.
pub type StorageSizing = Arc<dyn Fn(RegisteredSealProof) -> u64 + Send + Sync>;

/// Storage needed by the SDR cache of a sector, the layers plus the data tree,
/// grown so that `min_free_percentage` of the storage stays free.
pub fn sdr_cache_sizing(min_free_percentage: u8) -> StorageSizing {
    let free = u64::from(min_free_percentage.min(99));
    Arc::new(move |seal_proof: RegisteredSealProof| {
        let sector_size = seal_proof.sector_size().bytes();
        let cache = seal_proof.layers() * sector_size + 2 * sector_size;
        cache * 100 / (100 - free)
    })
}

/// Broad kind of an SDR failure, it decides how the scheduler reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The chain node or the store failed, the next attempt may succeed.
    TransientDependencyFailure,
    /// The declared pieces don't fit the sector.
    InvalidLayout,
    /// The pipeline state isn't what the task expects.
    InvariantViolation,
    /// The replica encoding failed.
    EncodingFailure,
    /// Another machine took the task over.
    OwnershipLost,
}

/// Step of the SDR task an error happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdrStep {
    LoadSector,
    LoadPieces,
    ComputeCommD,
    ResolveTicket,
    Encode,
    Commit,
}

impl Display for SdrStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let step = match self {
            SdrStep::LoadSector => "loading the sector",
            SdrStep::LoadPieces => "loading the pieces",
            SdrStep::ComputeCommD => "computing CommD",
            SdrStep::ResolveTicket => "resolving the ticket",
            SdrStep::Encode => "encoding",
            SdrStep::Commit => "committing",
        };
        f.write_str(step)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SdrTaskError {
    #[error("task {task_id}: {} failed: {source}", SdrStep::LoadSector)]
    Assignment { task_id: TaskId, source: DBError },

    #[error("{sector}: {step} failed: {source}")]
    Store {
        sector: SectorId,
        step: SdrStep,
        source: DBError,
    },

    #[error("{sector}: {} failed: {source}", SdrStep::ComputeCommD)]
    Layout {
        sector: SectorId,
        source: LayoutError,
    },

    #[error("{sector}: {} failed: {source}", SdrStep::ResolveTicket)]
    Chain {
        sector: SectorId,
        source: ChainError,
    },

    #[error("{sector}: {} failed: {source}", SdrStep::Encode)]
    Encoding {
        sector: SectorId,
        source: EncoderError,
    },

    #[error("{sector}: encoder did not finish: {source}")]
    EncoderAborted {
        sector: SectorId,
        source: tokio::task::JoinError,
    },

    #[error("{sector}: {} updated {updated} sectors instead of 1", SdrStep::Commit)]
    Commit { sector: SectorId, updated: usize },

    #[error("{sector}: ownership lost before {step}")]
    OwnershipLost { sector: SectorId, step: SdrStep },
}

impl SdrTaskError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SdrTaskError::Assignment {
                source: DBError::UnexpectedTaskAssignment { .. },
                ..
            } => ErrorCategory::InvariantViolation,
            SdrTaskError::Assignment { .. } | SdrTaskError::Store { .. } => {
                ErrorCategory::TransientDependencyFailure
            }
            SdrTaskError::Chain { .. } => ErrorCategory::TransientDependencyFailure,
            SdrTaskError::Layout { .. } => ErrorCategory::InvalidLayout,
            SdrTaskError::Encoding { .. } | SdrTaskError::EncoderAborted { .. } => {
                ErrorCategory::EncodingFailure
            }
            SdrTaskError::Commit { .. } => ErrorCategory::InvariantViolation,
            SdrTaskError::OwnershipLost { .. } => ErrorCategory::OwnershipLost,
        }
    }

    /// Whether the scheduler should run the task again.
    ///
    /// Encoding failures are retried too, the scheduler gives up after
    /// `max_failures` attempts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientDependencyFailure | ErrorCategory::EncodingFailure
        )
    }
}

pub struct SdrTask {
    db: Arc<PipelineDB>,
    tickets: TicketResolver,
    encoder: Arc<dyn ReplicaEncoder>,
    poller: Arc<SealPoller>,
    config: SdrTaskConfig,
    storage_sizing: StorageSizing,
}

impl SdrTask {
    pub fn new(
        db: Arc<PipelineDB>,
        tickets: TicketResolver,
        encoder: Arc<dyn ReplicaEncoder>,
        poller: Arc<SealPoller>,
        config: SdrTaskConfig,
        storage_sizing: StorageSizing,
    ) -> Self {
        Self {
            db,
            tickets,
            encoder,
            poller,
            config,
            storage_sizing,
        }
    }
}

#[async_trait]
impl TaskInterface for SdrTask {
    type Error = SdrTaskError;

    #[tracing::instrument(
        skip_all,
        fields(task_id = task_id, sp_id = tracing::field::Empty, sector = tracing::field::Empty)
    )]
    async fn do_task(
        &self,
        task_id: TaskId,
        still_owned: StillOwned<'_>,
    ) -> Result<bool, SdrTaskError> {
        let entry = self
            .db
            .sector_entry_for_task(task_id)
            .map_err(|source| SdrTaskError::Assignment { task_id, source })?;
        let sector_ref = entry.sector_ref();
        let sector = sector_ref.id;

        let span = tracing::Span::current();
        span.record("sp_id", sector.miner);
        span.record("sector", sector.number);

        let pieces = self
            .db
            .pieces(sector)
            .map_err(|source| SdrTaskError::Store {
                sector,
                step: SdrStep::LoadPieces,
                source,
            })?;

        let comm_d = compute_commitment(&pieces, sector_ref.proof_type)
            .map_err(|source| SdrTaskError::Layout { sector, source })?;
        tracing::debug!(pieces = pieces.len(), %comm_d, "computed data commitment");

        let (ticket, ticket_epoch) = self
            .tickets
            .resolve(sector.miner)
            .await
            .map_err(|source| SdrTaskError::Chain { sector, source })?;

        if !still_owned() {
            return Err(SdrTaskError::OwnershipLost {
                sector,
                step: SdrStep::Encode,
            });
        }

        let encoder = self.encoder.clone();
        tokio::task::spawn_blocking(move || encoder.encode(task_id, sector_ref, ticket, comm_d))
            .await
            .map_err(|source| SdrTaskError::EncoderAborted { sector, source })?
            .map_err(|source| SdrTaskError::Encoding { sector, source })?;

        if !still_owned() {
            return Err(SdrTaskError::OwnershipLost {
                sector,
                step: SdrStep::Commit,
            });
        }

        let outcome = SdrOutcome {
            ticket_epoch,
            ticket_value: ticket,
        };
        let updated = self
            .db
            .complete_sdr(sector, task_id, outcome)
            .map_err(|source| SdrTaskError::Store {
                sector,
                step: SdrStep::Commit,
                source,
            })?;
        if updated != 1 {
            return Err(SdrTaskError::Commit { sector, updated });
        }

        tracing::info!(ticket_epoch, "SDR completed");
        Ok(true)
    }

    fn can_accept(&self, ids: &[TaskId]) -> Option<TaskId> {
        ids.first().copied()
    }

    fn type_details(&self) -> TaskTypeDetails {
        let network = self.config.network;
        TaskTypeDetails {
            max: self.config.max_tasks,
            name: SDR_TASK_NAME,
            cost: Resources {
                cpu: network.cpu(),
                gpu: 0.0,
                ram: network.ram(),
                storage: (self.storage_sizing)(network.seal_proof()),
            },
            max_failures: self.config.max_failures,
            follows: vec![],
        }
    }

    fn adder(&self, add_task: AddTaskFn) {
        if let Err(err) = self.poller.set_sdr_adder(add_task) {
            tracing::error!(%err, "failed to register the SDR task adder");
        }
    }
}

impl SdrTask {
    /// Storage provider owning the sector the task works on, used to tag the
    /// task in listings.
    pub fn sp_id(&self, task_id: TaskId) -> Option<String> {
        match self.db.owner_for_task(task_id) {
            Ok(owner) => owner.map(|owner| owner.to_string()),
            Err(err) => {
                tracing::error!(%err, task_id, "getting the storage provider id failed");
                None
            }
        }
    }

    /// Sends a sector back to the SDR stage, see [`SealPoller::rearm_sdr`].
    pub fn rearm(&self, sector: SectorId) -> Result<(), PollerError> {
        self.poller.rearm_sdr(sector)
    }
}
