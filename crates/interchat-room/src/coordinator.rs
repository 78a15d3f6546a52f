//! Room coordinator: the single owner of membership.
//!
//! Every join, leave and broadcast is an event on one queue, handled to
//! completion by one task before the next is read. Membership therefore needs
//! no lock, and a joining session never misses or duplicates a broadcast that
//! races its history replay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use interchat_core::{Failure, FailureReporter, Payload, SessionId};
use interchat_log::{DurableLog, EntryId};
use interchat_telemetry::metrics::{
    ROOM_BROADCASTS_TOTAL, ROOM_JOIN_FAILURES_TOTAL, ROOM_MEMBERS, ROOM_PUBLISH_FAILURES_TOTAL,
    ROOM_SLOW_MEMBER_DROPS_TOTAL,
};
use metrics::{counter, gauge};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RoomError;
use crate::session::SessionHandle;

/// What to do when a member's outbound queue is full during delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Wait for queue space without bound. A stuck member stalls the room
    /// until its outbound loop exits.
    Block,
    /// Wait up to `after`, then remove the member and end its session.
    Disconnect {
        /// Longest wait for queue space.
        after: Duration,
    },
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::Disconnect {
            after: Duration::from_secs(1),
        }
    }
}

/// Room configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomOptions {
    /// Room name.
    pub name: String,
    /// Past messages replayed to a joining session.
    pub history_capacity: usize,
    /// Capacity of the coordinator's event queue.
    pub event_queue_capacity: usize,
    /// Slow member handling.
    pub backpressure: BackpressurePolicy,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            name: "public".to_string(),
            history_capacity: 50,
            event_queue_capacity: 1024,
            backpressure: BackpressurePolicy::default(),
        }
    }
}

enum RoomEvent {
    Join {
        session: SessionHandle,
        ack: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        id: SessionId,
    },
    Broadcast {
        payload: Payload,
        ack: Option<oneshot::Sender<Result<EntryId, RoomError>>>,
    },
    MemberCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to a running room.
///
/// The coordinator loop runs until every handle has been dropped.
#[derive(Clone, Debug)]
pub struct Room {
    name: Arc<str>,
    events: mpsc::Sender<RoomEvent>,
}

impl Room {
    /// Room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replay history to `session`, then admit it.
    ///
    /// Resolves once the coordinator has handled the join. On error the
    /// session was not admitted and its handle has been dropped, which closes
    /// its queue.
    pub async fn join(&self, session: SessionHandle) -> Result<(), RoomError> {
        let (ack, rx) = oneshot::channel();
        self.send(RoomEvent::Join { session, ack }).await?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    /// Remove `id` from the room and close its queue. Unknown ids are
    /// ignored.
    pub async fn leave(&self, id: SessionId) {
        if self.send(RoomEvent::Leave { id }).await.is_err() {
            debug!(room = %self.name, "leave after room closed");
        }
    }

    /// Queue `payload` for persistence and fan-out without waiting for either.
    pub async fn broadcast(&self, payload: Payload) -> Result<(), RoomError> {
        self.send(RoomEvent::Broadcast { payload, ack: None }).await
    }

    /// Persist and fan out `payload`, resolving once every member has it
    /// queued.
    pub async fn publish(&self, payload: Payload) -> Result<EntryId, RoomError> {
        let (ack, rx) = oneshot::channel();
        self.send(RoomEvent::Broadcast {
            payload,
            ack: Some(ack),
        })
        .await?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    /// Current number of members.
    pub async fn member_count(&self) -> Result<usize, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomEvent::MemberCount { reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    async fn send(&self, event: RoomEvent) -> Result<(), RoomError> {
        self.events.send(event).await.map_err(|_| RoomError::Closed)
    }
}

/// The serialized event loop behind a [`Room`].
pub struct RoomCoordinator {
    name: Arc<str>,
    log: DurableLog,
    options: RoomOptions,
    reporter: Arc<dyn FailureReporter>,
    members: HashMap<SessionId, SessionHandle>,
    events: mpsc::Receiver<RoomEvent>,
}

impl RoomCoordinator {
    /// Build a coordinator and its first handle without starting the loop.
    pub fn new(
        log: DurableLog,
        options: RoomOptions,
        reporter: Arc<dyn FailureReporter>,
    ) -> (Self, Room) {
        let name: Arc<str> = Arc::from(options.name.as_str());
        let (tx, rx) = mpsc::channel(options.event_queue_capacity.max(1));
        let coordinator = Self {
            name: Arc::clone(&name),
            log,
            options,
            reporter,
            members: HashMap::new(),
            events: rx,
        };
        (coordinator, Room { name, events: tx })
    }

    /// Start the loop on a new task.
    pub fn spawn(
        log: DurableLog,
        options: RoomOptions,
        reporter: Arc<dyn FailureReporter>,
    ) -> (Room, JoinHandle<()>) {
        let (coordinator, room) = Self::new(log, options, reporter);
        let task = tokio::spawn(coordinator.run());
        (room, task)
    }

    /// Handle events in arrival order until every [`Room`] handle is gone.
    pub async fn run(mut self) {
        info!(room = %self.name, log = self.log.name(), "room coordinator started");
        while let Some(event) = self.events.recv().await {
            self.handle(event).await;
        }
        info!(room = %self.name, members = self.members.len(), "room coordinator stopped");
    }

    async fn handle(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Join { session, ack } => {
                let result = self.join(session).await;
                let _ = ack.send(result);
            }
            RoomEvent::Leave { id } => self.leave(&id),
            RoomEvent::Broadcast { payload, ack } => {
                let result = self.broadcast(payload).await;
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            RoomEvent::MemberCount { reply } => {
                let _ = reply.send(self.members.len());
            }
        }
    }

    async fn join(&mut self, session: SessionHandle) -> Result<(), RoomError> {
        let history = match self.log.read_last(self.options.history_capacity).await {
            Ok(history) => history,
            Err(e) => {
                counter!(ROOM_JOIN_FAILURES_TOTAL).increment(1);
                self.reporter.report(Failure::HistoryReadFailed {
                    room: self.name.to_string(),
                    session_id: session.id().clone(),
                    error: e.to_string(),
                });
                return Err(RoomError::HistoryReplay(e));
            }
        };

        // Stored newest-first; members see history oldest-first.
        for payload in history.into_iter().rev() {
            if let Err(e) = self.deliver(&session, payload).await {
                counter!(ROOM_JOIN_FAILURES_TOTAL).increment(1);
                warn!(room = %self.name, session_id = %session.id(), error = %e, "history replay failed");
                return Err(e);
            }
        }

        debug!(room = %self.name, session_id = %session.id(), "session joined");
        if let Some(previous) = self.members.insert(session.id().clone(), session) {
            debug!(room = %self.name, session_id = %previous.id(), "replaced existing membership");
        }
        self.record_members();
        Ok(())
    }

    fn leave(&mut self, id: &SessionId) {
        if self.members.remove(id).is_some() {
            debug!(room = %self.name, session_id = %id, "session left");
            self.record_members();
        }
    }

    async fn broadcast(&mut self, payload: Payload) -> Result<EntryId, RoomError> {
        let entry = match self.log.append(payload.clone()).await {
            Ok(entry) => entry,
            Err(e) => {
                counter!(ROOM_PUBLISH_FAILURES_TOTAL).increment(1);
                self.reporter.report(Failure::PublishFailed {
                    room: self.name.to_string(),
                    error: e.to_string(),
                });
                return Err(RoomError::Publish(e));
            }
        };
        counter!(ROOM_BROADCASTS_TOTAL).increment(1);

        let mut departed = Vec::new();
        for (id, member) in &self.members {
            match self.deliver(member, payload.clone()).await {
                Ok(()) => {}
                Err(RoomError::SlowMember(after)) => {
                    counter!(ROOM_SLOW_MEMBER_DROPS_TOTAL).increment(1);
                    warn!(room = %self.name, session_id = %id, ?after, "disconnecting slow member");
                    member.cancel();
                    departed.push(id.clone());
                }
                Err(_) => departed.push(id.clone()),
            }
        }

        if !departed.is_empty() {
            for id in &departed {
                let _ = self.members.remove(id);
            }
            self.record_members();
        }
        Ok(entry)
    }

    async fn deliver(&self, member: &SessionHandle, payload: Payload) -> Result<(), RoomError> {
        match member.queue.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(RoomError::QueueClosed),
            Err(TrySendError::Full(payload)) => match self.options.backpressure {
                BackpressurePolicy::Block => member
                    .queue
                    .send(payload)
                    .await
                    .map_err(|_| RoomError::QueueClosed),
                BackpressurePolicy::Disconnect { after } => {
                    member
                        .queue
                        .send_timeout(payload, after)
                        .await
                        .map_err(|e| match e {
                            SendTimeoutError::Timeout(_) => RoomError::SlowMember(after),
                            SendTimeoutError::Closed(_) => RoomError::QueueClosed,
                        })
                }
            },
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_members(&self) {
        gauge!(ROOM_MEMBERS, "room" => self.name.to_string()).set(self.members.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use interchat_core::CollectingReporter;
    use interchat_log::{LogError, LogOptions, MemoryLogStore};
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn payload(s: &str) -> Payload {
        Payload::copy_from_slice(s.as_bytes())
    }

    fn member(capacity: usize) -> (SessionHandle, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);
        (SessionHandle::new(SessionId::new(), tx, CancellationToken::new()), rx)
    }

    fn spawn_room(store: Arc<MemoryLogStore>, options: RoomOptions) -> (Room, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        let log = DurableLog::new(options.name.clone(), store, LogOptions::default());
        let (room, _task) = RoomCoordinator::spawn(log, options, reporter.clone());
        (room, reporter)
    }

    #[test]
    fn default_options() {
        let options = RoomOptions::default();
        assert_eq!(options.name, "public");
        assert_eq!(options.history_capacity, 50);
        assert_eq!(
            options.backpressure,
            BackpressurePolicy::Disconnect {
                after: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn join_replays_history_oldest_first() {
        let store = Arc::new(MemoryLogStore::new());
        let (room, _) = spawn_room(store, RoomOptions::default());
        for s in ["a", "b", "c"] {
            let _ = room.publish(payload(s)).await.unwrap();
        }

        let (handle, mut rx) = member(8);
        room.join(handle).await.unwrap();
        assert_eq!(rx.recv().await, Some(payload("a")));
        assert_eq!(rx.recv().await, Some(payload("b")));
        assert_eq!(rx.recv().await, Some(payload("c")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_once() {
        let (room, _) = spawn_room(Arc::new(MemoryLogStore::new()), RoomOptions::default());
        let (a, mut rx_a) = member(8);
        let (b, mut rx_b) = member(8);
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();

        let _ = room.publish(payload("hi")).await.unwrap();
        assert_eq!(rx_a.try_recv().unwrap(), payload("hi"));
        assert_eq!(rx_b.try_recv().unwrap(), payload("hi"));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_history_read_refuses_join() {
        let store = Arc::new(MemoryLogStore::new());
        store.set_fail_reads(true);
        let (room, reporter) = spawn_room(store, RoomOptions::default());

        let (handle, mut rx) = member(8);
        let id = handle.id().clone();
        let err = room.join(handle).await.unwrap_err();
        assert_matches!(err, RoomError::HistoryReplay(LogError::Unavailable(_)));
        assert_eq!(room.member_count().await.unwrap(), 0);
        // The refused handle was dropped, so the queue is closed.
        assert_eq!(rx.recv().await, None);
        assert_matches!(
            reporter.failures().as_slice(),
            [Failure::HistoryReadFailed { session_id, .. }] if *session_id == id
        );
    }

    #[tokio::test]
    async fn failed_append_delivers_nothing() {
        let store = Arc::new(MemoryLogStore::new());
        let (room, reporter) = spawn_room(store.clone(), RoomOptions::default());
        let (handle, mut rx) = member(8);
        room.join(handle).await.unwrap();

        store.set_fail_appends(true);
        let err = room.publish(payload("lost")).await.unwrap_err();
        assert_matches!(err, RoomError::Publish(_));
        assert!(rx.try_recv().is_err());
        assert_matches!(reporter.failures().as_slice(), [Failure::PublishFailed { .. }]);

        store.set_fail_appends(false);
        let _ = room.publish(payload("kept")).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), payload("kept"));
    }

    #[tokio::test]
    async fn leave_closes_queue_and_is_idempotent() {
        let (room, _) = spawn_room(Arc::new(MemoryLogStore::new()), RoomOptions::default());
        let (handle, mut rx) = member(8);
        let id = handle.id().clone();
        room.join(handle).await.unwrap();

        room.leave(id.clone()).await;
        room.leave(id).await;
        room.leave(SessionId::new()).await;
        assert_eq!(room.member_count().await.unwrap(), 0);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn closed_member_is_dropped_silently() {
        let (room, reporter) = spawn_room(Arc::new(MemoryLogStore::new()), RoomOptions::default());
        let (gone, rx_gone) = member(8);
        let (stays, mut rx_stays) = member(8);
        room.join(gone).await.unwrap();
        room.join(stays).await.unwrap();
        drop(rx_gone);

        let _ = room.publish(payload("x")).await.unwrap();
        assert_eq!(room.member_count().await.unwrap(), 1);
        assert_eq!(rx_stays.try_recv().unwrap(), payload("x"));
        assert!(reporter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_member_is_disconnected() {
        let options = RoomOptions {
            backpressure: BackpressurePolicy::Disconnect {
                after: Duration::from_millis(500),
            },
            ..RoomOptions::default()
        };
        let (room, _) = spawn_room(Arc::new(MemoryLogStore::new()), options);
        let (slow, _rx_slow) = member(1);
        let lifecycle = CancellationToken::new();
        let slow = SessionHandle::new(slow.id().clone(), slow.queue.clone(), lifecycle.clone());
        let (fast, mut rx_fast) = member(8);
        room.join(slow).await.unwrap();
        room.join(fast).await.unwrap();

        let _ = room.publish(payload("1")).await.unwrap();
        let _ = room.publish(payload("2")).await.unwrap();

        assert!(lifecycle.is_cancelled());
        assert_eq!(room.member_count().await.unwrap(), 1);
        assert_eq!(rx_fast.try_recv().unwrap(), payload("1"));
        assert_eq!(rx_fast.try_recv().unwrap(), payload("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_policy_waits_for_space() {
        let options = RoomOptions {
            backpressure: BackpressurePolicy::Block,
            ..RoomOptions::default()
        };
        let (room, _) = spawn_room(Arc::new(MemoryLogStore::new()), options);
        let (slow, mut rx_slow) = member(1);
        room.join(slow).await.unwrap();
        let _ = room.publish(payload("1")).await.unwrap();

        let pending = tokio::spawn({
            let room = room.clone();
            async move { room.publish(payload("2")).await }
        });
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!pending.is_finished());

        assert_eq!(rx_slow.recv().await, Some(payload("1")));
        let _ = pending.await.unwrap().unwrap();
        assert_eq!(rx_slow.recv().await, Some(payload("2")));
        assert_eq!(room.member_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn loop_ends_when_handles_drop() {
        let log = DurableLog::new("public", Arc::new(MemoryLogStore::new()), LogOptions::default());
        let (room, task) =
            RoomCoordinator::spawn(log, RoomOptions::default(), Arc::new(CollectingReporter::new()));
        let second = room.clone();
        drop(room);
        assert!(!task.is_finished());
        drop(second);
        task.await.unwrap();
    }
}
