use std::{path::Path, sync::Mutex};

use primitives_proofs::{ActorId, SectorId, SectorRef};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options as DBOptions,
    WriteBatchWithTransaction, DB as RocksDB,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    task::TaskId,
    types::{PieceRecord, SdrOutcome, SectorPipelineEntry},
};

#[derive(Debug, thiserror::Error)]
pub enum DBError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    RocksDB(#[from] rocksdb::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("sector {0} is already in the pipeline")]
    SectorExists(SectorId),

    #[error("expected task {task_id} to be assigned to 1 sector, found {found}")]
    UnexpectedTaskAssignment { task_id: TaskId, found: usize },

    #[error("task id counter holds {0} bytes, expected 8")]
    InvalidTaskCounter(usize),

    #[error("conditional write lock was poisoned")]
    LockPoisoned,
}

/// Column family holding a [`SectorPipelineEntry`] per sector, keyed by
/// [`sector_key`].
const SDR_PIPELINE_CF: &str = "sdr_pipeline";

/// Column family holding the [`PieceRecord`]s of the sectors, keyed by
/// [`piece_key`].
const SDR_INITIAL_PIECES_CF: &str = "sdr_initial_pieces";

const COLUMN_FAMILIES: [&str; 2] = [SDR_PIPELINE_CF, SDR_INITIAL_PIECES_CF];

/// Key of the last allocated task id, in the default column family.
const TASK_ID_COUNTER_KEY: &[u8] = b"task_id_counter";

/// `sp_id ++ sector_number`, both big endian so the keys sort numerically.
fn sector_key(sector_id: SectorId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&sector_id.miner.to_be_bytes());
    key[8..].copy_from_slice(&sector_id.number.to_be_bytes());
    key
}

/// [`sector_key`] followed by the big endian piece index, iterating over a
/// sector prefix yields the pieces ordered by their index.
fn piece_key(sector_id: SectorId, piece_index: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(&sector_key(sector_id));
    key[16..].copy_from_slice(&piece_index.to_be_bytes());
    key
}

/// Durable state of the sealing pipeline.
///
/// Reads are lock-free, writes conditioned on the current state of a sector
/// are serialized so that two of them can never both succeed on stale data.
pub struct PipelineDB {
    database: RocksDB,
    conditional_writes: Mutex<()>,
}

impl PipelineDB {
    pub fn new<P>(path: P) -> Result<Self, DBError>
    where
        P: AsRef<Path>,
    {
        let mut opts = DBOptions::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = COLUMN_FAMILIES
            .into_iter()
            .map(|cf_name| ColumnFamilyDescriptor::new(cf_name, DBOptions::default()));

        Ok(Self {
            database: RocksDB::open_cf_descriptors(&opts, path, cfs)?,
            conditional_writes: Mutex::new(()),
        })
    }

    #[track_caller]
    fn cf_handle(&self, name: &str) -> &ColumnFamily {
        self.database
            .cf_handle(name)
            .expect("column family should have been initialized on database startup")
    }

    fn get_json<V>(&self, cf_name: &str, key: &[u8]) -> Result<Option<V>, DBError>
    where
        V: DeserializeOwned,
    {
        let Some(slice) = self.database.get_pinned_cf(self.cf_handle(cf_name), key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(slice.as_ref())?))
    }

    fn put_json<V>(&self, cf_name: &str, key: &[u8], value: &V) -> Result<(), DBError>
    where
        V: Serialize,
    {
        let json = serde_json::to_vec(value)?;
        Ok(self.database.put_cf(self.cf_handle(cf_name), key, json)?)
    }

    /// Adds a sector waiting to be sealed, along with its pieces.
    pub fn insert_sector(
        &self,
        entry: &SectorPipelineEntry,
        pieces: &[PieceRecord],
    ) -> Result<(), DBError> {
        let sector_id = entry.sector_id();
        let _guard = self
            .conditional_writes
            .lock()
            .map_err(|_| DBError::LockPoisoned)?;

        if self
            .get_json::<SectorPipelineEntry>(SDR_PIPELINE_CF, &sector_key(sector_id))?
            .is_some()
        {
            return Err(DBError::SectorExists(sector_id));
        }

        let mut batch = WriteBatchWithTransaction::<false>::default();
        let pieces_cf = self.cf_handle(SDR_INITIAL_PIECES_CF);
        for piece in pieces {
            batch.put_cf(
                pieces_cf,
                piece_key(sector_id, piece.piece_index),
                serde_json::to_vec(piece)?,
            );
        }
        batch.put_cf(
            self.cf_handle(SDR_PIPELINE_CF),
            sector_key(sector_id),
            serde_json::to_vec(entry)?,
        );

        Ok(self.database.write(batch)?)
    }

    pub fn sector(&self, sector_id: SectorId) -> Result<Option<SectorPipelineEntry>, DBError> {
        self.get_json(SDR_PIPELINE_CF, &sector_key(sector_id))
    }

    /// Returns every sector of the pipeline matching `filter`.
    fn sectors_where<F>(&self, filter: F) -> Result<Vec<SectorPipelineEntry>, DBError>
    where
        F: Fn(&SectorPipelineEntry) -> bool,
    {
        let iterator = self
            .database
            .iterator_cf(self.cf_handle(SDR_PIPELINE_CF), IteratorMode::Start);

        let mut sectors = vec![];
        for item in iterator {
            let (_, value) = item?;
            let entry: SectorPipelineEntry = serde_json::from_slice(&value)?;
            if filter(&entry) {
                sectors.push(entry);
            }
        }
        Ok(sectors)
    }

    /// Returns the sectors assigned to the SDR task `task_id`.
    pub fn sectors_for_task(&self, task_id: TaskId) -> Result<Vec<SectorPipelineEntry>, DBError> {
        self.sectors_where(|entry| entry.task_id_sdr == Some(task_id))
    }

    /// Returns the only sector assigned to the SDR task `task_id`, failing if
    /// there's none or more than one.
    pub fn sector_entry_for_task(&self, task_id: TaskId) -> Result<SectorPipelineEntry, DBError> {
        let mut sectors = self.sectors_for_task(task_id)?;
        if sectors.len() != 1 {
            return Err(DBError::UnexpectedTaskAssignment {
                task_id,
                found: sectors.len(),
            });
        }
        Ok(sectors.remove(0))
    }

    pub fn sector_for_task(&self, task_id: TaskId) -> Result<SectorRef, DBError> {
        Ok(self.sector_entry_for_task(task_id)?.sector_ref())
    }

    /// Returns the storage provider owning the sector assigned to `task_id`.
    pub fn owner_for_task(&self, task_id: TaskId) -> Result<Option<ActorId>, DBError> {
        Ok(self
            .sectors_for_task(task_id)?
            .first()
            .map(|entry| entry.sp_id))
    }

    /// Returns the sectors waiting for an SDR task to be created.
    pub fn pending_sdr(&self) -> Result<Vec<SectorPipelineEntry>, DBError> {
        self.sectors_where(SectorPipelineEntry::needs_sdr)
    }

    /// Returns the tasks assigned to sectors that haven't finished the SDR
    /// stage yet, e.g. because the worker running them stopped or gave up.
    pub fn in_flight_sdr(&self) -> Result<Vec<TaskId>, DBError> {
        let mut task_ids = self
            .sectors_where(|entry| !entry.after_sdr)?
            .into_iter()
            .filter_map(|entry| entry.task_id_sdr)
            .collect::<Vec<_>>();
        task_ids.sort_unstable();
        task_ids.dedup();
        Ok(task_ids)
    }

    /// Returns the pieces of a sector, ordered by their index.
    pub fn pieces(&self, sector_id: SectorId) -> Result<Vec<PieceRecord>, DBError> {
        let prefix = sector_key(sector_id);
        let iterator = self.database.iterator_cf(
            self.cf_handle(SDR_INITIAL_PIECES_CF),
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let mut pieces = vec![];
        for item in iterator {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            pieces.push(serde_json::from_slice(&value)?);
        }
        Ok(pieces)
    }

    /// Applies `update` to the sector and stores the result if `update`
    /// returns `true`. Returns whether the sector was written.
    ///
    /// The read and the write happen under the conditional write lock, this
    /// is the compare-and-swap every state transition goes through.
    pub fn update_sector<F>(&self, sector_id: SectorId, update: F) -> Result<bool, DBError>
    where
        F: FnOnce(&mut SectorPipelineEntry) -> bool,
    {
        let _guard = self
            .conditional_writes
            .lock()
            .map_err(|_| DBError::LockPoisoned)?;

        let key = sector_key(sector_id);
        let Some(mut entry) = self.get_json::<SectorPipelineEntry>(SDR_PIPELINE_CF, &key)? else {
            return Ok(false);
        };

        if !update(&mut entry) {
            return Ok(false);
        }

        self.put_json(SDR_PIPELINE_CF, &key, &entry)?;
        Ok(true)
    }

    /// Binds the SDR task `task_id` to a sector, as long as the sector still
    /// needs one.
    pub fn assign_sdr_task(&self, sector_id: SectorId, task_id: TaskId) -> Result<bool, DBError> {
        self.update_sector(sector_id, |entry| {
            if !entry.needs_sdr() {
                return false;
            }
            entry.task_id_sdr = Some(task_id);
            true
        })
    }

    /// Records the results of the SDR stage and releases the task.
    ///
    /// Only applies while the sector is still assigned to `task_id` and the
    /// stage didn't complete yet, returns the number of sectors updated.
    pub fn complete_sdr(
        &self,
        sector_id: SectorId,
        task_id: TaskId,
        outcome: SdrOutcome,
    ) -> Result<usize, DBError> {
        let updated = self.update_sector(sector_id, |entry| {
            if entry.task_id_sdr != Some(task_id) || entry.after_sdr {
                return false;
            }
            entry.after_sdr = true;
            entry.ticket_epoch = Some(outcome.ticket_epoch);
            entry.ticket_value = Some(outcome.ticket_value);
            entry.task_id_sdr = None;
            true
        })?;

        Ok(usize::from(updated))
    }

    /// Allocates a new task id, ids start at 1.
    pub fn next_task_id(&self) -> Result<TaskId, DBError> {
        let _guard = self
            .conditional_writes
            .lock()
            .map_err(|_| DBError::LockPoisoned)?;

        let last = match self.database.get_pinned(TASK_ID_COUNTER_KEY)? {
            Some(bytes) => {
                let bytes = <[u8; 8]>::try_from(bytes.as_ref())
                    .map_err(|_| DBError::InvalidTaskCounter(bytes.len()))?;
                TaskId::from_be_bytes(bytes)
            }
            None => 0,
        };

        let next = last + 1;
        self.database
            .put(TASK_ID_COUNTER_KEY, next.to_be_bytes())?;
        Ok(next)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Barrier};

    use cid::Cid;
    use primitives_commitment::{Commitment, CommitmentKind};
    use primitives_proofs::RegisteredSealProof;
    use tempfile::tempdir;

    use super::*;

    pub(crate) fn piece(piece_index: u64, piece_size: u64, data_raw_size: u64) -> PieceRecord {
        let piece_cid: Cid =
            Commitment::new([piece_index as u8 + 1; 32], CommitmentKind::Piece).cid();
        PieceRecord {
            piece_index,
            piece_cid,
            piece_size,
            data_raw_size,
        }
    }

    pub(crate) fn entry(sp_id: ActorId, sector_number: u64) -> SectorPipelineEntry {
        SectorPipelineEntry::new(
            sp_id,
            sector_number,
            RegisteredSealProof::StackedDRG2KiBV1P1,
        )
    }

    const OUTCOME: SdrOutcome = SdrOutcome {
        ticket_epoch: 100,
        ticket_value: [9; 32],
    };

    #[test]
    fn insert_and_read_sector() {
        let tmp_dir = tempdir().unwrap();
        let db = PipelineDB::new(tmp_dir.path()).unwrap();

        let sector = entry(1000, 1);
        // Out of order on purpose, 256 also sorts after 2 only if keys are big endian
        let pieces = [piece(2, 128, 127), piece(0, 256, 254), piece(256, 128, 1)];
        db.insert_sector(&sector, &pieces).unwrap();

        assert_eq!(db.sector(sector.sector_id()).unwrap(), Some(sector.clone()));
        let indices = db
            .pieces(sector.sector_id())
            .unwrap()
            .into_iter()
            .map(|piece| piece.piece_index)
            .collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 2, 256]);

        assert!(matches!(
            db.insert_sector(&sector, &[]),
            Err(DBError::SectorExists(_))
        ));
    }

    #[test]
    fn pieces_of_neighbour_sectors_do_not_mix() {
        let tmp_dir = tempdir().unwrap();
        let db = PipelineDB::new(tmp_dir.path()).unwrap();

        db.insert_sector(&entry(1000, 1), &[piece(0, 128, 127)])
            .unwrap();
        db.insert_sector(&entry(1000, 2), &[piece(0, 256, 254), piece(1, 128, 127)])
            .unwrap();
        db.insert_sector(&entry(1001, 1), &[]).unwrap();

        assert_eq!(db.pieces(SectorId::new(1000, 1)).unwrap().len(), 1);
        assert_eq!(db.pieces(SectorId::new(1000, 2)).unwrap().len(), 2);
        assert!(db.pieces(SectorId::new(1001, 1)).unwrap().is_empty());
        assert!(db.pieces(SectorId::new(999, 1)).unwrap().is_empty());
    }

    #[test]
    fn task_assignment() {
        let tmp_dir = tempdir().unwrap();
        let db = PipelineDB::new(tmp_dir.path()).unwrap();

        let first = entry(1000, 1);
        let second = entry(1000, 2);
        db.insert_sector(&first, &[]).unwrap();
        db.insert_sector(&second, &[]).unwrap();
        assert_eq!(db.pending_sdr().unwrap().len(), 2);

        assert!(matches!(
            db.sector_for_task(7),
            Err(DBError::UnexpectedTaskAssignment {
                task_id: 7,
                found: 0
            })
        ));
        assert_eq!(db.owner_for_task(7).unwrap(), None);

        assert!(db.assign_sdr_task(first.sector_id(), 7).unwrap());
        // Already assigned
        assert!(!db.assign_sdr_task(first.sector_id(), 8).unwrap());
        // Unknown sector
        assert!(!db.assign_sdr_task(SectorId::new(1, 1), 8).unwrap());

        assert_eq!(db.sector_for_task(7).unwrap(), first.sector_ref());
        assert_eq!(db.owner_for_task(7).unwrap(), Some(1000));
        assert_eq!(db.pending_sdr().unwrap(), vec![second.clone()]);

        assert!(db.assign_sdr_task(second.sector_id(), 7).unwrap());
        assert!(matches!(
            db.sector_for_task(7),
            Err(DBError::UnexpectedTaskAssignment {
                task_id: 7,
                found: 2
            })
        ));
    }

    #[test]
    fn complete_sdr_is_conditional() {
        let tmp_dir = tempdir().unwrap();
        let db = PipelineDB::new(tmp_dir.path()).unwrap();

        let sector = entry(1000, 1);
        db.insert_sector(&sector, &[]).unwrap();
        let id = sector.sector_id();

        // Not assigned yet
        assert_eq!(db.complete_sdr(id, 1, OUTCOME).unwrap(), 0);

        assert!(db.assign_sdr_task(id, 1).unwrap());
        assert_eq!(db.complete_sdr(id, 2, OUTCOME).unwrap(), 0);
        assert_eq!(db.complete_sdr(id, 1, OUTCOME).unwrap(), 1);
        assert_eq!(db.complete_sdr(id, 1, OUTCOME).unwrap(), 0);

        let stored = db.sector(id).unwrap().unwrap();
        assert!(stored.after_sdr);
        assert_eq!(stored.task_id_sdr, None);
        assert_eq!(stored.ticket_epoch, Some(100));
        assert_eq!(stored.ticket_value, Some([9; 32]));
        assert!(db.pending_sdr().unwrap().is_empty());
    }

    #[test]
    fn in_flight_tasks_outlive_the_worker() {
        let tmp_dir = tempdir().unwrap();
        let first = entry(1000, 1);
        let second = entry(1000, 2);
        let third = entry(1001, 1);
        {
            let db = PipelineDB::new(tmp_dir.path()).unwrap();
            db.insert_sector(&first, &[]).unwrap();
            db.insert_sector(&second, &[]).unwrap();
            db.insert_sector(&third, &[]).unwrap();
            assert!(db.in_flight_sdr().unwrap().is_empty());

            assert!(db.assign_sdr_task(first.sector_id(), 3).unwrap());
            assert!(db.assign_sdr_task(second.sector_id(), 1).unwrap());
            assert_eq!(db.complete_sdr(second.sector_id(), 1, OUTCOME).unwrap(), 1);
            assert!(db.assign_sdr_task(third.sector_id(), 2).unwrap());
        }

        let db = PipelineDB::new(tmp_dir.path()).unwrap();
        assert_eq!(db.in_flight_sdr().unwrap(), vec![2, 3]);
        // Assigned sectors are not pending, only in flight
        assert!(db.pending_sdr().unwrap().is_empty());
    }

    #[test]
    fn racing_completions_only_one_wins() {
        let tmp_dir = tempdir().unwrap();
        let db = Arc::new(PipelineDB::new(tmp_dir.path()).unwrap());

        let sector = entry(1000, 1);
        db.insert_sector(&sector, &[]).unwrap();
        assert!(db.assign_sdr_task(sector.sector_id(), 1).unwrap());

        let attempts = 8;
        let barrier = Arc::new(Barrier::new(attempts));
        let handles = (0..attempts)
            .map(|_| {
                let db = db.clone();
                let barrier = barrier.clone();
                let id = sector.sector_id();
                std::thread::spawn(move || {
                    barrier.wait();
                    db.complete_sdr(id, 1, OUTCOME).unwrap()
                })
            })
            .collect::<Vec<_>>();

        let updated = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .sum::<usize>();
        assert_eq!(updated, 1);
    }

    #[test]
    fn task_ids_survive_restarts() {
        let tmp_dir = tempdir().unwrap();
        {
            let db = PipelineDB::new(tmp_dir.path()).unwrap();
            assert_eq!(db.next_task_id().unwrap(), 1);
            assert_eq!(db.next_task_id().unwrap(), 2);
        }

        let db = PipelineDB::new(tmp_dir.path()).unwrap();
        assert_eq!(db.next_task_id().unwrap(), 3);
    }
}
