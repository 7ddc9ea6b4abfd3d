use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};

use primitives_commitment::Commitment;
use primitives_proofs::{SectorRef, Ticket};

use crate::task::TaskId;

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("encoder exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// Replication encoding (SDR labelling) of a sector.
///
/// Implementations are blocking, they are run on a blocking thread.
pub trait ReplicaEncoder: Send + Sync + 'static {
    fn encode(
        &self,
        task_id: TaskId,
        sector: SectorRef,
        ticket: Ticket,
        comm_d: Commitment,
    ) -> Result<(), EncoderError>;
}

/// Runs an external program to encode the replica.
///
/// The program is called with the configured arguments followed by:
///
/// ```text
/// --task-id <id> --miner <id> --sector <number> --seal-proof <proof>
/// --ticket <hex> --comm-d <cid> --cache-dir <path>
/// ```
///
/// The cache directory is created beforehand, one per sector, under the
/// configured cache root.
pub struct CommandEncoder {
    program: PathBuf,
    args: Vec<OsString>,
    cache_root: PathBuf,
}

impl CommandEncoder {
    pub fn new<P, C>(program: P, cache_root: C) -> Self
    where
        P: Into<PathBuf>,
        C: Into<PathBuf>,
    {
        Self {
            program: program.into(),
            args: vec![],
            cache_root: cache_root.into(),
        }
    }

    /// Adds an argument passed before the sector arguments.
    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cache_dir(&self, sector: &SectorRef) -> PathBuf {
        self.cache_root.join(sector.id.to_string())
    }

    fn command(
        &self,
        task_id: TaskId,
        sector: &SectorRef,
        ticket: Ticket,
        comm_d: Commitment,
        cache_dir: &Path,
    ) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--task-id")
            .arg(task_id.to_string())
            .arg("--miner")
            .arg(sector.id.miner.to_string())
            .arg("--sector")
            .arg(sector.id.number.to_string())
            .arg("--seal-proof")
            .arg(format!("{:?}", sector.proof_type))
            .arg("--ticket")
            .arg(hex::encode(ticket))
            .arg("--comm-d")
            .arg(comm_d.cid().to_string())
            .arg("--cache-dir")
            .arg(cache_dir);
        command
    }
}

impl ReplicaEncoder for CommandEncoder {
    fn encode(
        &self,
        task_id: TaskId,
        sector: SectorRef,
        ticket: Ticket,
        comm_d: Commitment,
    ) -> Result<(), EncoderError> {
        let cache_dir = self.cache_dir(&sector);
        std::fs::create_dir_all(&cache_dir)?;

        tracing::debug!(
            program = %self.program.display(),
            cache_dir = %cache_dir.display(),
            "running encoder"
        );
        let output = self
            .command(task_id, &sector, ticket, comm_d, &cache_dir)
            .output()?;

        if !output.status.success() {
            return Err(EncoderError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}
