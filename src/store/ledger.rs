use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{RestrictionStore, StoreError};

pub type SharedRoomLedger = Arc<RwLock<RoomLedger>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every append that is already queued when the first one
/// arrives joins the same batch and shares a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
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
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-buffered bytes do not leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Event application ────────────────────────────────────

/// Apply a restriction event to one room's ledger and the id indexes.
/// Caller holds the ledger's write lock.
fn apply_restriction(
    ledger: &mut RoomLedger,
    event: &Event,
    restriction_to_room: &DashMap<RestrictionId, RoomId>,
    reservation_restriction: &DashMap<ReservationId, RestrictionId>,
) {
    match event {
        Event::RestrictionAdded { restriction } => {
            ledger.insert(*restriction);
            restriction_to_room.insert(restriction.id, restriction.room_id);
            if let Some(reservation_id) = restriction.reservation_id() {
                reservation_restriction.insert(reservation_id, restriction.id);
            }
        }
        Event::RestrictionRemoved { id, .. } => {
            if let Some(removed) = ledger.remove(*id)
                && let Some(reservation_id) = removed.reservation_id()
            {
                reservation_restriction.remove(&reservation_id);
            }
            restriction_to_room.remove(id);
        }
        Event::RoomCreated { .. }
        | Event::ReservationCreated { .. }
        | Event::ReservationUpdated { .. }
        | Event::ReservationDeleted { .. }
        | Event::Sequences { .. } => {}
    }
}

fn event_room_id(event: &Event) -> Option<RoomId> {
    match event {
        Event::RestrictionAdded { restriction } => Some(restriction.room_id),
        Event::RestrictionRemoved { room_id, .. } => Some(*room_id),
        _ => None,
    }
}

struct RoomEntry {
    room: Room,
    ledger: SharedRoomLedger,
}

/// Shared state behind a [`LedgerStore`]. Mutations run against it on
/// their own task.
struct LedgerState {
    rooms: DashMap<RoomId, RoomEntry>,
    reservations: DashMap<ReservationId, Reservation>,
    /// Reverse lookup: restriction id → room id.
    restriction_to_room: DashMap<RestrictionId, RoomId>,
    /// Reservation id → its reservation restriction.
    reservation_restriction: DashMap<ReservationId, RestrictionId>,
    next_room_id: AtomicU32,
    next_restriction_id: AtomicU64,
    next_reservation_id: AtomicU64,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// append can slip between the state capture and the file swap.
    write_gate: RwLock<()>,
}

/// Reference restriction store: per-room sorted ledgers in memory, every
/// mutation committed to an append-only WAL before it is applied.
///
/// A mutation runs to completion even if its caller stops waiting, so the
/// in-memory state never falls behind the WAL.
pub struct LedgerStore {
    state: Arc<LedgerState>,
}

impl LedgerStore {
    /// Replay the WAL at `path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let replay = Wal::replay(path)?;
        if replay.discarded_tail {
            warn!(
                "ledger {}: discarded torn or corrupt tail after {} bytes",
                path.display(),
                replay.valid_len
            );
            Wal::truncate(path, replay.valid_len)?;
        }
        let wal = Wal::resume(path, replay.events.len() as u64)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let restriction_to_room = DashMap::new();
        let reservation_restriction = DashMap::new();
        let mut rooms: HashMap<RoomId, (Room, RoomLedger)> = HashMap::new();
        let reservations = DashMap::new();
        let (mut next_room, mut next_restriction, mut next_reservation) = (1u32, 1u64, 1u64);

        for event in &replay.events {
            match event {
                Event::RoomCreated { id, name } => {
                    rooms.insert(*id, (Room { id: *id, name: name.clone() }, RoomLedger::default()));
                    next_room = next_room.max(id + 1);
                }
                Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                    next_reservation = next_reservation.max(reservation.id + 1);
                    reservations.insert(reservation.id, reservation.clone());
                }
                Event::ReservationDeleted { id } => {
                    reservations.remove(id);
                }
                Event::Sequences {
                    next_room_id,
                    next_restriction_id,
                    next_reservation_id,
                } => {
                    next_room = next_room.max(*next_room_id);
                    next_restriction = next_restriction.max(*next_restriction_id);
                    next_reservation = next_reservation.max(*next_reservation_id);
                }
                other => {
                    if let Event::RestrictionAdded { restriction } = other {
                        next_restriction = next_restriction.max(restriction.id + 1);
                    }
                    let Some(room_id) = event_room_id(other) else { continue };
                    match rooms.get_mut(&room_id) {
                        Some((_, ledger)) => apply_restriction(
                            ledger,
                            other,
                            &restriction_to_room,
                            &reservation_restriction,
                        ),
                        None => warn!("ledger replay: restriction event for unknown room {room_id}"),
                    }
                }
            }
        }

        info!(
            "ledger {}: {} rooms, {} reservations, {} restrictions",
            path.display(),
            rooms.len(),
            reservations.len(),
            restriction_to_room.len()
        );

        let rooms = rooms
            .into_iter()
            .map(|(id, (room, ledger))| {
                (id, RoomEntry { room, ledger: Arc::new(RwLock::new(ledger)) })
            })
            .collect();

        let state = LedgerState {
            rooms,
            reservations,
            restriction_to_room,
            reservation_restriction,
            next_room_id: AtomicU32::new(next_room),
            next_restriction_id: AtomicU64::new(next_restriction),
            next_reservation_id: AtomicU64::new(next_reservation),
            wal_tx,
            write_gate: RwLock::new(()),
        };
        Ok(Self { state: Arc::new(state) })
    }

    /// Run a mutation on its own task and wait for it. Dropping the returned
    /// future (a deadline, a disconnected caller) leaves the task running, so
    /// the WAL append and the in-memory apply are never split.
    async fn detached<T, F, Fut>(&self, mutation: F) -> Result<T, StoreError>
    where
        F: FnOnce(Arc<LedgerState>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(mutation(self.state.clone()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("ledger task failed: {e}")))?
    }

    /// Add a room to the reference data. Rooms are listed in creation order.
    pub async fn create_room(&self, name: &str) -> Result<Room, StoreError> {
        let name = name.to_string();
        self.detached(|state| async move { state.create_room(name).await })
            .await
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        self.detached(|state| async move { state.compact().await }).await
    }

    /// WAL records written since the last compaction.
    pub async fn appends_since_compact(&self) -> Result<u64, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.state
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))
    }
}

impl LedgerState {
    /// Send an event to the group-commit writer and wait until it is durable.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// WAL-append, then apply to the ledger the caller has locked.
    async fn persist_restriction(&self, ledger: &mut RoomLedger, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_restriction(ledger, event, &self.restriction_to_room, &self.reservation_restriction);
        Ok(())
    }

    fn room_ledger(&self, room_id: RoomId) -> Result<SharedRoomLedger, StoreError> {
        self.rooms
            .get(&room_id)
            .map(|e| e.ledger.clone())
            .ok_or(StoreError::RoomNotFound(room_id))
    }

    async fn create_room(&self, name: String) -> Result<Room, StoreError> {
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(StoreError::LimitExceeded("room name too long"));
        }
        if self.rooms.len() >= MAX_ROOMS {
            return Err(StoreError::LimitExceeded("too many rooms"));
        }
        let _gate = self.write_gate.read().await;
        let id = self.next_room_id.fetch_add(1, Ordering::SeqCst);
        self.wal_append(&Event::RoomCreated { id, name: name.clone() })
            .await?;
        let room = Room { id, name };
        self.rooms.insert(
            id,
            RoomEntry {
                room: room.clone(),
                ledger: Arc::new(RwLock::new(RoomLedger::default())),
            },
        );
        Ok(room)
    }

    async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.write_gate.write().await;

        let mut events = vec![Event::Sequences {
            next_room_id: self.next_room_id.load(Ordering::SeqCst),
            next_restriction_id: self.next_restriction_id.load(Ordering::SeqCst),
            next_reservation_id: self.next_reservation_id.load(Ordering::SeqCst),
        }];

        let mut rooms: Vec<(Room, SharedRoomLedger)> = self
            .rooms
            .iter()
            .map(|e| (e.room.clone(), e.ledger.clone()))
            .collect();
        rooms.sort_by_key(|(room, _)| room.id);
        events.extend(rooms.iter().map(|(room, _)| Event::RoomCreated {
            id: room.id,
            name: room.name.clone(),
        }));

        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationCreated { reservation }),
        );

        for (_, ledger) in &rooms {
            let guard = ledger.read().await;
            events.extend(
                guard
                    .restrictions
                    .iter()
                    .map(|restriction| Event::RestrictionAdded { restriction: *restriction }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(())
    }

    async fn find_restrictions(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<Vec<Restriction>, StoreError> {
        let ledger = self.room_ledger(room_id)?;
        let guard = ledger.read().await;
        Ok(guard.overlapping(&range).copied().collect())
    }

    async fn insert_block(&self, room_id: RoomId, day: NaiveDate) -> Result<RestrictionId, StoreError> {
        let _gate = self.write_gate.read().await;
        let ledger = self.room_ledger(room_id)?;
        let mut guard = ledger.write().await;
        let id = self.next_restriction_id.fetch_add(1, Ordering::SeqCst);
        let event = Event::RestrictionAdded {
            restriction: Restriction {
                id,
                room_id,
                range: DateRange::single(day),
                kind: RestrictionKind::Block,
            },
        };
        self.persist_restriction(&mut guard, &event).await?;
        Ok(id)
    }

    async fn delete_block(&self, id: RestrictionId) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        let room_id = self
            .restriction_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::RestrictionNotFound(id))?;
        let ledger = self.room_ledger(room_id)?;
        let mut guard = ledger.write().await;
        match guard.get(id) {
            None => return Err(StoreError::RestrictionNotFound(id)),
            Some(r) if !r.is_block() => return Err(StoreError::NotABlock(id)),
            Some(_) => {}
        }
        self.persist_restriction(&mut guard, &Event::RestrictionRemoved { id, room_id })
            .await
    }

    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        check_guest(&new.guest)?;
        let _gate = self.write_gate.read().await;
        if !self.rooms.contains_key(&new.room_id) {
            return Err(StoreError::RoomNotFound(new.room_id));
        }
        let reservation = Reservation {
            id: self.next_reservation_id.fetch_add(1, Ordering::SeqCst),
            guest: new.guest,
            room_id: new.room_id,
            stay: new.stay,
            processed: false,
            created_at: Utc::now(),
        };
        self.wal_append(&Event::ReservationCreated { reservation: reservation.clone() })
            .await?;
        self.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn update_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        check_guest(&reservation.guest)?;
        let _gate = self.write_gate.read().await;
        let mut updated = self
            .reservations
            .get(&reservation.id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::ReservationNotFound(reservation.id))?;
        updated.guest = reservation.guest;
        updated.processed = reservation.processed;
        self.wal_append(&Event::ReservationUpdated { reservation: updated.clone() })
            .await?;
        self.reservations.insert(updated.id, updated);
        Ok(())
    }

    /// Delete a reservation and, if it still has one, its restriction. Runs
    /// under the room's write lock so it serialises with
    /// `insert_reservation_restriction` for the same reservation.
    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        let room_id = self
            .reservations
            .get(&id)
            .map(|e| e.room_id)
            .ok_or(StoreError::ReservationNotFound(id))?;
        let ledger = self.room_ledger(room_id)?;
        let mut guard = ledger.write().await;
        if !self.reservations.contains_key(&id) {
            return Err(StoreError::ReservationNotFound(id));
        }
        let restriction = self.reservation_restriction.get(&id).map(|e| *e.value());
        if let Some(restriction_id) = restriction {
            self.persist_restriction(&mut guard, &Event::RestrictionRemoved { id: restriction_id, room_id })
                .await?;
        }
        self.wal_append(&Event::ReservationDeleted { id }).await?;
        self.reservations.remove(&id);
        Ok(())
    }

    async fn insert_reservation_restriction(
        &self,
        reservation_id: ReservationId,
    ) -> Result<RestrictionId, StoreError> {
        let _gate = self.write_gate.read().await;
        let room_id = self
            .reservations
            .get(&reservation_id)
            .map(|e| e.room_id)
            .ok_or(StoreError::ReservationNotFound(reservation_id))?;
        let ledger = self.room_ledger(room_id)?;
        let mut guard = ledger.write().await;
        // Re-read under the lock: a concurrent delete_reservation may have won.
        let stay = self
            .reservations
            .get(&reservation_id)
            .map(|e| e.stay)
            .ok_or(StoreError::ReservationNotFound(reservation_id))?;
        if let Some(existing) = guard.overlapping(&stay).next() {
            return Err(StoreError::Conflict {
                room_id,
                restriction_id: existing.id,
            });
        }
        let id = self.next_restriction_id.fetch_add(1, Ordering::SeqCst);
        let event = Event::RestrictionAdded {
            restriction: Restriction {
                id,
                room_id,
                range: stay,
                kind: RestrictionKind::Reservation { reservation_id },
            },
        };
        self.persist_restriction(&mut guard, &event).await?;
        Ok(id)
    }

    async fn delete_reservation_restriction(
        &self,
        reservation_id: ReservationId,
    ) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        let id = self
            .reservation_restriction
            .get(&reservation_id)
            .map(|e| *e.value())
            .ok_or(StoreError::ReservationNotFound(reservation_id))?;
        let room_id = self
            .restriction_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::RestrictionNotFound(id))?;
        let ledger = self.room_ledger(room_id)?;
        let mut guard = ledger.write().await;
        if self.reservation_restriction.get(&reservation_id).map(|e| *e.value()) != Some(id) {
            return Err(StoreError::ReservationNotFound(reservation_id));
        }
        self.persist_restriction(&mut guard, &Event::RestrictionRemoved { id, room_id })
            .await
    }
}

fn check_guest(guest: &GuestDetails) -> Result<(), StoreError> {
    let fields = [&guest.first_name, &guest.last_name, &guest.email, &guest.phone];
    if fields.iter().any(|f| f.len() > MAX_GUEST_FIELD_LEN) {
        return Err(StoreError::LimitExceeded("guest field too long"));
    }
    Ok(())
}

#[async_trait]
impl RestrictionStore for LedgerStore {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self.state.rooms.iter().map(|e| e.room.clone()).collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.state.rooms.get(&id).map(|e| e.room.clone()))
    }

    async fn find_restrictions(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<Vec<Restriction>, StoreError> {
        self.state.find_restrictions(room_id, range).await
    }

    async fn insert_block(&self, room_id: RoomId, day: NaiveDate) -> Result<RestrictionId, StoreError> {
        self.detached(|state| async move { state.insert_block(room_id, day).await })
            .await
    }

    async fn delete_block(&self, id: RestrictionId) -> Result<(), StoreError> {
        self.detached(|state| async move { state.delete_block(id).await })
            .await
    }

    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        self.detached(|state| async move { state.insert_reservation(new).await })
            .await
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.state.reservations.get(&id).map(|e| e.value().clone()))
    }

    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut out: Vec<Reservation> = self
            .state
            .reservations
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn update_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let reservation = reservation.clone();
        self.detached(|state| async move { state.update_reservation(reservation).await })
            .await
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        self.detached(|state| async move { state.delete_reservation(id).await })
            .await
    }

    async fn insert_reservation_restriction(
        &self,
        reservation: &Reservation,
    ) -> Result<RestrictionId, StoreError> {
        let reservation_id = reservation.id;
        self.detached(|state| async move { state.insert_reservation_restriction(reservation_id).await })
            .await
    }

    async fn delete_reservation_restriction(
        &self,
        reservation_id: ReservationId,
    ) -> Result<(), StoreError> {
        self.detached(|state| async move { state.delete_reservation_restriction(reservation_id).await })
            .await
    }
}
