use std::{path::PathBuf, sync::Arc};

use sealing_pipeline::{
    chain::LotusChainClient,
    config::{NetworkProfile, SdrTaskConfig},
    db::PipelineDB,
    encoder::CommandEncoder,
    poller::{local_task_adder, SealPoller},
    sdr::{sdr_cache_sizing, SdrTask},
    task::{TaskId, TaskInterface},
    ticket::TicketResolver,
};
use tokio::task::JoinSet;
use url::Url;

use crate::{load_config, WorkerError, DEFAULT_LOTUS_URL};

/// Arguments of the `run` command.
#[derive(Debug, clap::Args)]
pub(crate) struct RunArguments {
    /// RocksDB pipeline directory.
    #[arg(long)]
    database_directory: PathBuf,

    /// Lotus node JSON-RPC endpoint.
    #[arg(long, default_value = DEFAULT_LOTUS_URL)]
    lotus_url: Url,

    /// Program running the replica encoding.
    #[arg(long)]
    encoder: PathBuf,

    /// Argument passed to the encoder before the sector arguments, can be repeated.
    #[arg(long = "encoder-arg", allow_hyphen_values = true)]
    encoder_args: Vec<String>,

    /// Directory the sector caches are created in.
    #[arg(long)]
    cache_directory: PathBuf,

    /// JSON file with the SDR task configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Network profile, overrides the one in the configuration file.
    #[arg(long, value_enum)]
    network: Option<NetworkProfile>,
}

/// A validated `run` configuration, created using [`RunConfiguration::try_from`].
pub(crate) struct RunConfiguration {
    database_directory: PathBuf,
    lotus_url: Url,
    encoder: PathBuf,
    encoder_args: Vec<String>,
    cache_directory: PathBuf,
    sdr: SdrTaskConfig,
}

impl TryFrom<RunArguments> for RunConfiguration {
    type Error = WorkerError;

    fn try_from(value: RunArguments) -> Result<Self, Self::Error> {
        let mut sdr = load_config(value.config.as_deref())?;
        if let Some(network) = value.network {
            sdr.network = network;
        }

        std::fs::create_dir_all(&value.database_directory)?;
        std::fs::create_dir_all(&value.cache_directory)?;

        Ok(Self {
            database_directory: value.database_directory,
            lotus_url: value.lotus_url,
            encoder: value.encoder,
            encoder_args: value.encoder_args,
            cache_directory: value.cache_directory,
            sdr,
        })
    }
}

impl RunConfiguration {
    /// Polls the pipeline once and runs every SDR task created for it, along
    /// with the ones a previous run left unfinished.
    pub async fn run(self) -> Result<(), WorkerError> {
        let db = Arc::new(PipelineDB::new(&self.database_directory)?);
        let chain = Arc::new(LotusChainClient::new(&self.lotus_url)?);
        let encoder = self
            .encoder_args
            .into_iter()
            .fold(
                CommandEncoder::new(self.encoder, self.cache_directory),
                CommandEncoder::arg,
            );

        let poller = Arc::new(SealPoller::new(db.clone(), &self.sdr));
        let task = Arc::new(SdrTask::new(
            db.clone(),
            TicketResolver::new(chain),
            Arc::new(encoder),
            poller.clone(),
            self.sdr.clone(),
            sdr_cache_sizing(self.sdr.min_free_storage_percentage),
        ));
        task.adder(local_task_adder(db));

        // Tasks left over by a previous run go first
        let mut pending = poller.resume_sdr()?;
        let resumed = pending.len();
        pending.extend(poller.poll_sdr()?);
        let details = task.type_details();
        tracing::info!(
            tasks = pending.len(),
            resumed,
            name = details.name,
            cpu = details.cost.cpu,
            ram = details.cost.ram,
            storage = details.cost.storage,
            "polled the pipeline"
        );

        let mut running = JoinSet::new();
        while let Some(task_id) = task.can_accept(&pending) {
            pending.retain(|id| *id != task_id);

            // 0 means no limit
            if details.max != 0 && running.len() >= details.max {
                join_next(&mut running).await;
            }

            let task = task.clone();
            let max_failures = details.max_failures;
            running.spawn(async move { run_task(&task, task_id, max_failures).await });
        }
        while join_next(&mut running).await {}

        Ok(())
    }
}

/// Waits for a running task, returns `false` once none is left.
async fn join_next(running: &mut JoinSet<()>) -> bool {
    match running.join_next().await {
        Some(Err(err)) => {
            tracing::error!(%err, "SDR task panicked");
            true
        }
        Some(Ok(())) => true,
        None => false,
    }
}

/// Runs a task until it succeeds, fails for good or runs out of attempts.
async fn run_task(task: &SdrTask, task_id: TaskId, max_failures: u32) {
    let sp_id = task.sp_id(task_id);
    let mut failures = 0;
    loop {
        match task.do_task(task_id, &|| true).await {
            Ok(_) => {
                tracing::info!(task_id, ?sp_id, "SDR task done");
                return;
            }
            Err(err) => {
                failures += 1;
                tracing::error!(
                    task_id,
                    ?sp_id,
                    %err,
                    category = ?err.category(),
                    retryable = err.is_retryable(),
                    failures,
                    "SDR task failed"
                );
                if !err.is_retryable() || failures >= max_failures {
                    tracing::warn!(task_id, "giving up on the SDR task");
                    return;
                }
            }
        }
    }
}
