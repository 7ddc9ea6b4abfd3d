//! A worker preparing sectors for sealing: it computes their data commitment,
//! draws their sealing ticket and runs the replica encoding.
#![warn(unused_crate_dependencies)]
#![deny(clippy::unwrap_used)]

mod run;
mod sector_file;

use std::path::{Path, PathBuf};

use clap::Parser;
use primitives_proofs::{ActorId, SectorId, SectorNumber};
use sealing_pipeline::{
    chain::{ChainError, LotusChainClient},
    config::{ConfigError, SdrTaskConfig},
    db::{DBError, PipelineDB},
    layout::{compute_commitment, LayoutError},
    poller::{PollerError, SealPoller},
    ticket::TicketResolver,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use crate::{run::RunArguments, sector_file::SectorFile};

/// Default Lotus node JSON-RPC endpoint.
pub(crate) const DEFAULT_LOTUS_URL: &str = "http://127.0.0.1:1234/rpc/v1";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
enum Cli {
    /// Compute the data commitment (CommD) of a sector file, offline.
    #[command(name = "commd")]
    CommD {
        /// JSON file describing the sector and its pieces.
        sector_file: PathBuf,
    },

    /// Resolve the sealing ticket a storage provider would draw right now.
    Ticket {
        /// Lotus node JSON-RPC endpoint.
        #[arg(long, default_value = DEFAULT_LOTUS_URL)]
        lotus_url: Url,
        /// Storage provider actor id.
        sp_id: ActorId,
    },

    /// Add a sector to the pipeline, waiting for the SDR stage.
    Import {
        /// RocksDB pipeline directory.
        #[arg(long)]
        database_directory: PathBuf,
        /// JSON file describing the sector and its pieces.
        sector_file: PathBuf,
    },

    /// Send a sealed-out sector back to the SDR stage.
    Rearm {
        /// RocksDB pipeline directory.
        #[arg(long)]
        database_directory: PathBuf,
        /// JSON file with the SDR task configuration.
        #[arg(long)]
        config: Option<PathBuf>,
        sp_id: ActorId,
        sector_number: SectorNumber,
    },

    /// Create the pending SDR tasks and run them.
    Run(RunArguments),
}

/// CLI components error handling implementor.
#[derive(Debug, thiserror::Error)]
pub(crate) enum WorkerError {
    #[error("FromEnv error: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::FromEnvError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    DB(#[from] DBError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Poller(#[from] PollerError),
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    // Logger initialization.
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .init();

    match Cli::parse() {
        Cli::CommD { sector_file } => {
            let sector = SectorFile::load(&sector_file)?;
            let comm_d = compute_commitment(&sector.pieces, sector.seal_proof)?;
            let output = serde_json::json!({
                "comm_d": comm_d.cid().to_string(),
                "sector_size": sector.seal_proof.sector_size().bytes(),
            });
            println!("{output:#}");
        }
        Cli::Ticket { lotus_url, sp_id } => {
            let chain = std::sync::Arc::new(LotusChainClient::new(&lotus_url)?);
            let (ticket, epoch) = TicketResolver::new(chain).resolve(sp_id).await?;
            let output = serde_json::json!({
                "epoch": epoch,
                "ticket": hex::encode(ticket),
            });
            println!("{output:#}");
        }
        Cli::Import {
            database_directory,
            sector_file,
        } => {
            let sector = SectorFile::load(&sector_file)?;
            // Sectors that can never be laid out are refused upfront
            let comm_d = compute_commitment(&sector.pieces, sector.seal_proof)?;

            std::fs::create_dir_all(&database_directory)?;
            let db = PipelineDB::new(&database_directory)?;
            db.insert_sector(&sector.entry(), &sector.pieces)?;
            tracing::info!(
                sector = %sector.entry().sector_id(),
                pieces = sector.pieces.len(),
                %comm_d,
                "sector imported"
            );
        }
        Cli::Rearm {
            database_directory,
            config,
            sp_id,
            sector_number,
        } => {
            let config = load_config(config.as_deref())?;
            let db = std::sync::Arc::new(PipelineDB::new(&database_directory)?);
            SealPoller::new(db, &config).rearm_sdr(SectorId::new(sp_id, sector_number))?;
        }
        Cli::Run(arguments) => {
            let configuration: run::RunConfiguration = arguments.try_into()?;
            configuration.run().await?;
        }
    }

    Ok(())
}

/// Loads the SDR task configuration, falling back to the defaults when no
/// file is given.
pub(crate) fn load_config(path: Option<&Path>) -> Result<SdrTaskConfig, WorkerError> {
    let config: SdrTaskConfig = match path {
        Some(path) => {
            serde_json::from_reader(std::io::BufReader::new(std::fs::File::open(path)?))?
        }
        None => SdrTaskConfig::default(),
    };
    config.validate()?;
    Ok(config)
}
