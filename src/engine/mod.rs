mod error;
mod free_time;
mod guard;
mod mutations;
mod planning;
mod queries;

pub use error::EngineError;
pub use free_time::{free_gaps, merge_overlapping, overlaps_any, subtract_intervals};
pub use mutations::{ApplySummary, BookingDraft, RequestDraft};
pub use planning::AllocateOptions;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::config::ScheduleConfig;
use crate::model::*;
use crate::wal::Wal;

pub type SharedFacilityState = Arc<RwLock<FacilityState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed: {e}");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// In-memory club schedule backed by the WAL.
///
/// Bookings live in per-facility timelines, each behind its own lock, so
/// commits to different facilities proceed in parallel. Teams and requests
/// are plain maps; catalog changes are serialized by `catalog`.
pub struct Engine {
    pub(super) facilities: DashMap<Ulid, SharedFacilityState>,
    /// Lowercased name → facility id.
    pub(super) facility_names: DashMap<String, Ulid>,
    /// Booking id → facility id.
    pub(super) booking_to_facility: DashMap<Ulid, Ulid>,
    pub(super) teams: DashMap<Ulid, Team>,
    pub(super) requests: DashMap<Ulid, Request>,
    pub(super) catalog: Mutex<()>,
    pub(super) next_seq: AtomicU64,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) schedule: ScheduleConfig,
}

/// Apply a facility-scoped event. Caller holds the facility's write lock.
pub(super) fn apply_to_facility(
    fs: &mut FacilityState,
    event: &Event,
    booking_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::BookingCommitted { booking } => {
            fs.remove_booking(booking.id);
            fs.insert_booking(booking.clone());
            booking_index.insert(booking.id, fs.id);
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(b) = fs.bookings.iter_mut().find(|b| b.id == *id) {
                b.status = *status;
            }
        }
        Event::BookingDeleted { id, .. } => {
            fs.remove_booking(*id);
            booking_index.remove(id);
        }
        Event::FacilityRenamed { name, .. } => fs.name = name.clone(),
        Event::TeamDeleted { id } => {
            for b in fs.bookings.iter_mut().filter(|b| b.team_id == Some(*id)) {
                b.team_id = None;
            }
        }
        _ => {}
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Engine {
    pub fn new(wal_path: PathBuf, schedule: ScheduleConfig) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            facilities: DashMap::new(),
            facility_names: DashMap::new(),
            booking_to_facility: DashMap::new(),
            teams: DashMap::new(),
            requests: DashMap::new(),
            catalog: Mutex::new(()),
            next_seq: AtomicU64::new(1),
            wal_tx,
            schedule,
        };
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            events = events.len(),
            facilities = engine.facilities.len(),
            teams = engine.teams.len(),
            requests = engine.requests.len(),
            "engine state restored from WAL"
        );
        Ok(engine)
    }

    pub fn schedule_config(&self) -> &ScheduleConfig {
        &self.schedule
    }

    // We're the sole owner of every Arc during replay, so try_write always
    // succeeds. Never block here: this may run inside an async context.
    fn replay_event(&self, event: &Event) {
        let with_facility = |id: &Ulid, f: &dyn Fn(&mut FacilityState)| {
            if let Some(fs) = self.get_facility(id) {
                let mut guard = fs.try_write().expect("replay: uncontended write");
                f(&mut guard);
            }
        };
        match event {
            Event::BookingCommitted { booking } => {
                if let Some(old) = self.facility_of_booking(&booking.id)
                    && old != booking.facility_id
                {
                    with_facility(&old, &|fs| {
                        fs.remove_booking(booking.id);
                    });
                }
                with_facility(&booking.facility_id, &|fs| {
                    apply_to_facility(fs, event, &self.booking_to_facility)
                });
            }
            Event::BookingStatusChanged { facility_id, .. }
            | Event::BookingDeleted { facility_id, .. } => {
                with_facility(facility_id, &|fs| {
                    apply_to_facility(fs, event, &self.booking_to_facility)
                });
            }
            Event::FacilityRenamed { id, name } => {
                with_facility(id, &|fs| {
                    self.facility_names.remove(&name_key(&fs.name));
                    self.facility_names.insert(name_key(name), fs.id);
                    apply_to_facility(fs, event, &self.booking_to_facility);
                });
            }
            Event::TeamDeleted { .. } => {
                self.apply_catalog(event);
                for entry in self.facilities.iter() {
                    let mut guard = entry.value().try_write().expect("replay: uncontended write");
                    apply_to_facility(&mut guard, event, &self.booking_to_facility);
                }
            }
            _ => self.apply_catalog(event),
        }
    }

    /// Apply an event that touches only the catalog maps.
    pub(super) fn apply_catalog(&self, event: &Event) {
        match event {
            Event::FacilityCreated { id, name, kind } => {
                let fs = FacilityState::new(*id, name.clone(), *kind);
                self.facilities.insert(*id, Arc::new(RwLock::new(fs)));
                self.facility_names.insert(name_key(name), *id);
            }
            Event::FacilityDeleted { id } => {
                self.facilities.remove(id);
                self.facility_names.retain(|_, v| v != id);
                for mut team in self.teams.iter_mut() {
                    if team.usual_facility == Some(*id) {
                        team.usual_facility = None;
                    }
                }
                for mut request in self.requests.iter_mut() {
                    if request.preferred_facility == Some(*id) {
                        request.preferred_facility = None;
                    }
                }
            }
            Event::TeamSaved { team } => {
                self.teams.insert(team.id, team.clone());
            }
            Event::TeamDeleted { id } => {
                self.teams.remove(id);
            }
            Event::RequestSaved { request } => {
                self.next_seq
                    .fetch_max(request.seq.max(request.revision) + 1, Ordering::SeqCst);
                self.requests.insert(request.id, request.clone());
            }
            Event::RequestResolved {
                id,
                status,
                booking_id,
                reason,
            } => {
                if let Some(mut request) = self.requests.get_mut(id) {
                    request.status = *status;
                    request.booking_id = *booking_id;
                    request.rejection_reason = *reason;
                }
            }
            Event::RequestDeleted { id } => {
                self.requests.remove(id);
            }
            Event::FacilityRenamed { .. }
            | Event::BookingCommitted { .. }
            | Event::BookingStatusChanged { .. }
            | Event::BookingDeleted { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply to the locked facility.
    pub(super) async fn persist_and_apply(
        &self,
        fs: &mut FacilityState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_facility(fs, event, &self.booking_to_facility);
        Ok(())
    }

    /// WAL-append, then apply to the catalog maps.
    pub(super) async fn persist_catalog(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_catalog(event);
        Ok(())
    }

    pub fn get_facility(&self, id: &Ulid) -> Option<SharedFacilityState> {
        self.facilities.get(id).map(|e| e.value().clone())
    }

    pub fn facility_id_by_name(&self, name: &str) -> Option<Ulid> {
        self.facility_names.get(&name_key(name)).map(|e| *e.value())
    }

    pub fn facility_of_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_facility.get(booking_id).map(|e| *e.value())
    }

    /// Write-lock a facility, failing if it was deleted while we waited.
    pub(super) async fn write_facility(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<FacilityState>, EngineError> {
        let fs = self.get_facility(&id).ok_or(EngineError::NotFound(id))?;
        let guard = fs.write_owned().await;
        if !self.facilities.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }
}
