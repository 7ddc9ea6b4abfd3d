use std::sync::{Arc, Mutex};

use primitives_proofs::SectorId;

use crate::{
    config::SdrTaskConfig,
    db::{DBError, PipelineDB},
    task::{AddTaskFn, TaskId},
};

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error(transparent)]
    DB(#[from] DBError),

    #[error("sector {0} is not in the pipeline")]
    SectorNotFound(SectorId),

    #[error("sector {0} did not complete the SDR stage")]
    SdrNotCompleted(SectorId),

    #[error("sector {sector} was already sent back to SDR {resets} times")]
    ResetLimitReached { sector: SectorId, resets: u32 },

    #[error("sector {0} changed while being updated")]
    Conflict(SectorId),

    #[error("task adder lock was poisoned")]
    LockPoisoned,
}

/// Watches the pipeline and creates the tasks sectors are waiting for.
pub struct SealPoller {
    db: Arc<PipelineDB>,
    max_sdr_resets: u32,
    sdr_adder: Mutex<Option<AddTaskFn>>,
}

impl SealPoller {
    pub fn new(db: Arc<PipelineDB>, config: &SdrTaskConfig) -> Self {
        Self {
            db,
            max_sdr_resets: config.max_sdr_resets,
            sdr_adder: Mutex::new(None),
        }
    }

    pub fn set_sdr_adder(&self, add_task: AddTaskFn) -> Result<(), PollerError> {
        *self
            .sdr_adder
            .lock()
            .map_err(|_| PollerError::LockPoisoned)? = Some(add_task);
        Ok(())
    }

    /// Creates an SDR task for every sector waiting for one, returns the ids
    /// of the created tasks.
    ///
    /// A sector picked up by someone else in the meantime is skipped, the task
    /// created for it is discarded.
    #[tracing::instrument(skip_all)]
    pub fn poll_sdr(&self) -> Result<Vec<TaskId>, PollerError> {
        let Some(add_task) = self
            .sdr_adder
            .lock()
            .map_err(|_| PollerError::LockPoisoned)?
            .clone()
        else {
            tracing::debug!("no SDR task adder registered yet");
            return Ok(vec![]);
        };

        let mut created = vec![];
        for entry in self.db.pending_sdr()? {
            let sector_id = entry.sector_id();
            let task_id =
                add_task(&mut |task_id: TaskId| self.db.assign_sdr_task(sector_id, task_id))?;

            match task_id {
                Some(task_id) => {
                    tracing::info!(%sector_id, task_id, "created SDR task");
                    created.push(task_id);
                }
                None => tracing::debug!(%sector_id, "sector was assigned concurrently"),
            }
        }

        Ok(created)
    }

    /// Returns the SDR tasks that were assigned but never completed, so a
    /// restarted worker can pick them up again.
    ///
    /// Call it before [`SealPoller::poll_sdr`], the tasks created there are
    /// in flight as well.
    #[tracing::instrument(skip_all)]
    pub fn resume_sdr(&self) -> Result<Vec<TaskId>, PollerError> {
        let in_flight = self.db.in_flight_sdr()?;
        for task_id in &in_flight {
            tracing::info!(task_id, "resuming SDR task");
        }
        Ok(in_flight)
    }

    /// Sends a sector back to the SDR stage after a later stage found its
    /// layers to be broken.
    ///
    /// The ticket is dropped so the next attempt draws a fresh one. A sector
    /// can only be sent back a limited number of times.
    #[tracing::instrument(skip(self))]
    pub fn rearm_sdr(&self, sector_id: SectorId) -> Result<(), PollerError> {
        let entry = self
            .db
            .sector(sector_id)?
            .ok_or(PollerError::SectorNotFound(sector_id))?;

        if !entry.after_sdr {
            return Err(PollerError::SdrNotCompleted(sector_id));
        }

        if entry.sdr_resets >= self.max_sdr_resets {
            return Err(PollerError::ResetLimitReached {
                sector: sector_id,
                resets: entry.sdr_resets,
            });
        }

        let max_sdr_resets = self.max_sdr_resets;
        let updated = self.db.update_sector(sector_id, |entry| {
            if !entry.after_sdr || entry.sdr_resets >= max_sdr_resets {
                return false;
            }
            entry.after_sdr = false;
            entry.ticket_epoch = None;
            entry.ticket_value = None;
            entry.task_id_sdr = None;
            entry.sdr_resets += 1;
            true
        })?;

        if !updated {
            return Err(PollerError::Conflict(sector_id));
        }

        tracing::warn!(resets = entry.sdr_resets + 1, "sector sent back to SDR");
        Ok(())
    }
}

/// Task adder allocating ids from the pipeline database, for workers running
/// without an external scheduler.
pub fn local_task_adder(db: Arc<PipelineDB>) -> AddTaskFn {
    Arc::new(move |bind: &mut dyn FnMut(TaskId) -> Result<bool, DBError>| {
        let task_id = db.next_task_id()?;
        Ok(bind(task_id)?.then_some(task_id))
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{
        db::tests::{entry, piece},
        types::SdrOutcome,
    };

    fn setup() -> (tempfile::TempDir, Arc<PipelineDB>, SealPoller) {
        let tmp_dir = tempdir().unwrap();
        let db = Arc::new(PipelineDB::new(tmp_dir.path()).unwrap());
        let poller = SealPoller::new(db.clone(), &SdrTaskConfig::default());
        (tmp_dir, db, poller)
    }

    #[test]
    fn nothing_is_created_without_an_adder() {
        let (_tmp_dir, db, poller) = setup();
        db.insert_sector(&entry(1000, 1), &[piece(0, 128, 127)])
            .unwrap();

        assert!(poller.poll_sdr().unwrap().is_empty());
        assert_eq!(db.pending_sdr().unwrap().len(), 1);
    }

    #[test]
    fn creates_a_task_per_pending_sector() {
        let (_tmp_dir, db, poller) = setup();
        db.insert_sector(&entry(1000, 1), &[]).unwrap();
        db.insert_sector(&entry(1000, 2), &[]).unwrap();
        poller.set_sdr_adder(local_task_adder(db.clone())).unwrap();

        let created = poller.poll_sdr().unwrap();
        assert_eq!(created, vec![1, 2]);
        assert_eq!(db.sector_for_task(1).unwrap().id, SectorId::new(1000, 1));
        assert_eq!(db.sector_for_task(2).unwrap().id, SectorId::new(1000, 2));

        // Everything is assigned already
        assert!(poller.poll_sdr().unwrap().is_empty());
    }

    #[test]
    fn discarded_tasks_are_not_reported() {
        let (_tmp_dir, db, poller) = setup();
        db.insert_sector(&entry(1000, 1), &[]).unwrap();

        // Scheduler whose binding always loses the race
        let racing_db = db.clone();
        poller
            .set_sdr_adder(Arc::new(
                move |bind: &mut dyn FnMut(TaskId) -> Result<bool, DBError>| {
                    racing_db.assign_sdr_task(SectorId::new(1000, 1), 99)?;
                    Ok(bind(1)?.then_some(1))
                },
            ))
            .unwrap();

        assert!(poller.poll_sdr().unwrap().is_empty());
        assert_eq!(db.sector_for_task(99).unwrap().id, SectorId::new(1000, 1));
    }

    #[test]
    fn unfinished_tasks_are_resumed() {
        let (_tmp_dir, db, poller) = setup();
        db.insert_sector(&entry(1000, 1), &[]).unwrap();
        db.insert_sector(&entry(1000, 2), &[]).unwrap();
        poller.set_sdr_adder(local_task_adder(db.clone())).unwrap();
        assert!(poller.resume_sdr().unwrap().is_empty());

        assert_eq!(poller.poll_sdr().unwrap(), vec![1, 2]);
        let outcome = SdrOutcome {
            ticket_epoch: 10,
            ticket_value: [1; 32],
        };
        assert_eq!(db.complete_sdr(SectorId::new(1000, 2), 2, outcome).unwrap(), 1);

        // Task 1 never finished, a new poll doesn't create it again
        assert!(poller.poll_sdr().unwrap().is_empty());
        assert_eq!(poller.resume_sdr().unwrap(), vec![1]);
        assert_eq!(db.sector_for_task(1).unwrap().id, SectorId::new(1000, 1));
    }

    #[test]
    fn rearm_after_late_failure() {
        let (_tmp_dir, db, poller) = setup();
        let sector = entry(1000, 1);
        let id = sector.sector_id();
        db.insert_sector(&sector, &[]).unwrap();

        assert!(matches!(
            poller.rearm_sdr(SectorId::new(1, 1)),
            Err(PollerError::SectorNotFound(_))
        ));
        assert!(matches!(
            poller.rearm_sdr(id),
            Err(PollerError::SdrNotCompleted(_))
        ));

        let outcome = SdrOutcome {
            ticket_epoch: 10,
            ticket_value: [1; 32],
        };
        for resets in 1..=2 {
            let task_id = resets as TaskId;
            assert!(db.assign_sdr_task(id, task_id).unwrap());
            assert_eq!(db.complete_sdr(id, task_id, outcome).unwrap(), 1);

            poller.rearm_sdr(id).unwrap();
            let stored = db.sector(id).unwrap().unwrap();
            assert!(stored.needs_sdr());
            assert_eq!(stored.ticket_value, None);
            assert_eq!(stored.ticket_epoch, None);
            assert_eq!(stored.sdr_resets, resets);
        }

        assert!(db.assign_sdr_task(id, 3).unwrap());
        assert_eq!(db.complete_sdr(id, 3, outcome).unwrap(), 1);
        assert!(matches!(
            poller.rearm_sdr(id),
            Err(PollerError::ResetLimitReached { resets: 2, .. })
        ));
        assert!(db.sector(id).unwrap().unwrap().after_sdr);
    }
}
