//! The per-worker targeting context and dispatcher.
//!
//! A [`Websocket`] is created once per worker and reused for every event the
//! worker dispatches. The transport sets the sender, calls the event, and
//! resets the context before moving on:
//!
//! ```text
//!   idle ──set_sender──▶ active ──reset──▶ idle
//! ```
//!
//! Sender-scoped operations (`join`, `leave`, `login_using*`, `get_user_id`)
//! fail with [`Error::UnsetSender`] while idle.

use crate::auth::{self, Authenticatable};
use crate::error::Error;
use crate::handler::EventRegistry;
use crate::pipeline::{Middleware, Pipeline};
use crate::push::{Push, PushSink};
use crate::rooms::RoomStore;
use crate::target::{ConnectionId, Payload, Target};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Targeting state plus event dispatch for one worker.
pub struct Websocket {
    /// Connection that sent the current event.
    sender: Option<ConnectionId>,
    /// Whether the sender is excluded from delivery.
    is_broadcast: bool,
    /// Explicit recipients.
    to: Vec<Target>,
    /// Registered event handlers.
    handlers: EventRegistry,
    /// Middleware applied by `call`, in order.
    middleware: Vec<Arc<dyn Middleware>>,
    /// Room membership backend.
    rooms: Arc<dyn RoomStore>,
    /// Middleware executor.
    pipeline: Arc<dyn Pipeline>,
    /// Where `emit` hands resolved pushes.
    sink: Option<Arc<dyn PushSink>>,
}

impl Websocket {
    /// Create a context over a room store and a pipeline.
    #[must_use]
    pub fn new(rooms: Arc<dyn RoomStore>, pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            sender: None,
            is_broadcast: false,
            to: Vec::new(),
            handlers: EventRegistry::new(),
            middleware: Vec::new(),
            rooms,
            pipeline,
            sink: None,
        }
    }

    /// Attach the sink used by [`Websocket::emit`].
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn PushSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Exclude the sender from the next emitted message.
    pub fn broadcast(&mut self) -> &mut Self {
        self.is_broadcast = true;
        self
    }

    /// Replace the recipient list.
    pub fn to<T: Into<Target>>(&mut self, targets: impl IntoIterator<Item = T>) -> &mut Self {
        self.to = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Set the connection that sent the current event.
    pub fn set_sender(&mut self, sender: ConnectionId) -> &mut Self {
        self.sender = Some(sender);
        self
    }

    /// Connection that sent the current event.
    #[must_use]
    pub fn get_sender(&self) -> Option<ConnectionId> {
        self.sender
    }

    /// Current recipient list.
    #[must_use]
    pub fn get_to(&self) -> &[Target] {
        &self.to
    }

    /// Whether the sender is excluded from delivery.
    #[must_use]
    pub fn get_is_broadcast(&self) -> bool {
        self.is_broadcast
    }

    fn require_sender(&self) -> Result<ConnectionId, Error> {
        self.sender.ok_or(Error::UnsetSender)
    }

    /// Add the sender to one or more rooms.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnsetSender`] before `set_sender`, or with the
    /// room store's error.
    pub fn join<R: Into<String>>(
        &mut self,
        rooms: impl IntoIterator<Item = R>,
    ) -> Result<&mut Self, Error> {
        let sender = self.require_sender()?;
        let rooms: Vec<String> = rooms.into_iter().map(Into::into).collect();

        self.rooms.add(sender, &rooms)?;
        debug!(connection = %sender, rooms = ?rooms, "Joined rooms");

        Ok(self)
    }

    /// Remove the sender from one or more rooms.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnsetSender`] before `set_sender`, or with the
    /// room store's error.
    pub fn leave<R: Into<String>>(
        &mut self,
        rooms: impl IntoIterator<Item = R>,
    ) -> Result<&mut Self, Error> {
        let sender = self.require_sender()?;
        let rooms: Vec<String> = rooms.into_iter().map(Into::into).collect();

        self.rooms.delete(sender, &rooms)?;
        debug!(connection = %sender, rooms = ?rooms, "Left rooms");

        Ok(self)
    }

    /// Bind an authenticated user to the sender.
    ///
    /// # Errors
    ///
    /// Same as [`Websocket::join`].
    pub fn login_using<U: Authenticatable>(&mut self, user: &U) -> Result<&mut Self, Error> {
        self.login_using_id(user.auth_identifier())
    }

    /// Bind a user identifier to the sender.
    ///
    /// # Errors
    ///
    /// Same as [`Websocket::join`].
    pub fn login_using_id(&mut self, id: impl fmt::Display) -> Result<&mut Self, Error> {
        self.join([auth::user_room(id)])
    }

    /// Remove every identity bound to the sender.
    ///
    /// Other rooms are kept. A sender that is not logged in is left alone.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnsetSender`] before `set_sender`, or with the
    /// room store's error.
    pub fn logout(&mut self) -> Result<&mut Self, Error> {
        let sender = self.require_sender()?;
        let identities: Vec<String> = self
            .rooms
            .get_rooms(sender)?
            .into_iter()
            .filter(|room| auth::parse_user_room(room).is_some())
            .collect();

        if !identities.is_empty() {
            self.rooms.delete(sender, &identities)?;
            debug!(connection = %sender, rooms = ?identities, "Logged out");
        }

        Ok(self)
    }

    /// Append every connection of the given users to the recipient list.
    ///
    /// Users without a live connection contribute nothing.
    ///
    /// # Errors
    ///
    /// Returns the room store's error.
    pub fn to_user_id<I: fmt::Display>(
        &mut self,
        ids: impl IntoIterator<Item = I>,
    ) -> Result<&mut Self, Error> {
        for id in ids {
            let room = auth::user_room(id);
            let clients = self.rooms.get_clients(&room)?;
            trace!(room = %room, clients = clients.len(), "Resolved user connections");
            self.to.extend(clients.into_iter().map(Target::Connection));
        }
        Ok(self)
    }

    /// Append every connection of the given users to the recipient list.
    ///
    /// # Errors
    ///
    /// Returns the room store's error.
    pub fn to_user<U: Authenticatable>(
        &mut self,
        users: impl IntoIterator<Item = U>,
    ) -> Result<&mut Self, Error> {
        let ids: Vec<U::Id> = users.into_iter().map(|u| u.auth_identifier()).collect();
        self.to_user_id(ids)
    }

    /// User identifier bound to the sender, if any.
    ///
    /// When the sender was logged in more than once, the most recently
    /// joined identity room wins.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnsetSender`] before `set_sender`, or with the
    /// room store's error.
    pub fn get_user_id(&self) -> Result<Option<String>, Error> {
        let sender = self.require_sender()?;
        let rooms = self.rooms.get_rooms(sender)?;

        Ok(rooms
            .iter()
            .rev()
            .find_map(|room| auth::parse_user_room(room))
            .map(str::to_string))
    }

    /// Check whether a user has at least one live connection.
    ///
    /// # Errors
    ///
    /// Returns the room store's error.
    pub fn is_user_id_online(&self, id: impl fmt::Display) -> Result<bool, Error> {
        Ok(!self.rooms.get_clients(&auth::user_room(id))?.is_empty())
    }

    /// Resolve the current targets and hand the message to the push sink.
    ///
    /// The broadcast flag and recipient list are cleared afterwards, the
    /// sender is kept. Returns how many connections the sink delivered to.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::SinkNotConfigured`] without a sink, or with the
    /// room store's error.
    pub fn emit(&mut self, event: impl Into<String>, data: Value) -> Result<usize, Error> {
        let sink = self.sink.clone().ok_or(Error::SinkNotConfigured)?;
        let push = Push::resolve(
            self.rooms.as_ref(),
            self.sender,
            self.is_broadcast,
            &self.to,
            event,
            data,
        )?;

        self.is_broadcast = false;
        self.to.clear();

        Ok(sink.push(push))
    }

    /// Clear the sender, broadcast flag and recipient list.
    ///
    /// Handlers and middleware are kept.
    pub fn reset(&mut self) {
        self.sender = None;
        self.is_broadcast = false;
        self.to.clear();
    }

    /// Register an event handler.
    pub fn on<F>(&mut self, event: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&mut Websocket, Payload) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.handlers.on(event, handler);
        self
    }

    /// Check if a handler is registered for `event`.
    #[must_use]
    pub fn event_exists(&self, event: &str) -> bool {
        self.handlers.exists(event)
    }

    /// Set the middleware list applied by [`Websocket::call`].
    pub fn middleware(&mut self, middleware: Vec<Arc<dyn Middleware>>) -> &mut Self {
        self.middleware = middleware;
        self
    }

    /// Names of the configured middleware, in order.
    #[must_use]
    pub fn middleware_names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Dispatch an event through the middleware pipeline to its handler.
    ///
    /// Returns `Ok(None)` when no handler is registered for `event`.
    ///
    /// # Errors
    ///
    /// Middleware and handler failures are returned unchanged.
    pub fn call(&mut self, event: &str, data: Value) -> Result<Option<Value>, Error> {
        let Some(handler) = self.handlers.get(event) else {
            trace!(event = %event, "No handler registered");
            return Ok(None);
        };

        let mut payload = Payload::new(event, data);
        payload.sender = self.sender;

        let pipeline = Arc::clone(&self.pipeline);
        let middleware = self.middleware.clone();
        let mut destination = |payload: Payload| (*handler)(&mut *self, payload);

        pipeline
            .send(payload, &middleware, &mut destination)
            .map(Some)
    }
}

impl fmt::Debug for Websocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Websocket")
            .field("sender", &self.sender)
            .field("is_broadcast", &self.is_broadcast)
            .field("to", &self.to)
            .field("handlers", &self.handlers)
            .field("middleware", &self.middleware_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ChainPipeline, Destination, Next};
    use crate::rooms::{MemoryRoomStore, MockRoomStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct User {
        id: u64,
        lookups: AtomicUsize,
    }

    impl User {
        fn new(id: u64) -> Self {
            Self {
                id,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl Authenticatable for User {
        type Id = u64;

        fn auth_identifier(&self) -> u64 {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.id
        }
    }

    struct Named(&'static str);

    impl Middleware for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn handle(&self, payload: Payload, next: Next<'_>) -> Result<Value, Error> {
            next.run(payload)
        }
    }

    /// Records what it was asked to run, then calls the destination.
    #[derive(Default)]
    struct RecordingPipeline {
        sent: Mutex<Vec<(Payload, Vec<String>)>>,
    }

    impl Pipeline for RecordingPipeline {
        fn send<'a>(
            &self,
            payload: Payload,
            middleware: &'a [Arc<dyn Middleware>],
            destination: Destination<'a>,
        ) -> Result<Value, Error> {
            let names = middleware.iter().map(|m| m.name().to_string()).collect();
            self.sent.lock().unwrap().push((payload.clone(), names));
            destination(payload)
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        pushes: Mutex<Vec<Push>>,
    }

    impl PushSink for CollectingSink {
        fn push(&self, push: Push) -> usize {
            let count = push.recipients([]).len();
            self.pushes.lock().unwrap().push(push);
            count
        }
    }

    fn websocket(rooms: impl RoomStore + 'static) -> Websocket {
        Websocket::new(Arc::new(rooms), Arc::new(ChainPipeline))
    }

    fn names(rooms: &[&str]) -> Vec<String> {
        rooms.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_set_broadcast() {
        let mut ws = websocket(MockRoomStore::new());
        assert!(!ws.get_is_broadcast());

        ws.broadcast();
        assert!(ws.get_is_broadcast());

        ws.broadcast();
        assert!(ws.get_is_broadcast());
    }

    #[test]
    fn test_set_to_replaces() {
        let mut ws = websocket(MockRoomStore::new());

        ws.to(["foo"]);
        assert!(ws.get_to().contains(&Target::from("foo")));

        ws.to(["foo", "bar", "seafood"]);
        assert_eq!(
            ws.get_to(),
            &[Target::from("foo"), Target::from("bar"), Target::from("seafood")]
        );

        ws.to([ConnectionId(9)]);
        assert_eq!(ws.get_to(), &[Target::Connection(ConnectionId(9))]);
    }

    #[test]
    fn test_set_sender() {
        let mut ws = websocket(MockRoomStore::new());
        assert_eq!(ws.get_sender(), None);

        ws.set_sender(ConnectionId(1));
        assert_eq!(ws.get_sender(), Some(ConnectionId(1)));
    }

    #[test]
    fn test_join() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_add()
            .withf(|sender, rooms| *sender == ConnectionId(1) && rooms.iter().eq(["room"]))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1)).join(["room"]).unwrap();
    }

    #[test]
    fn test_join_all() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_add()
            .withf(|sender, rooms| {
                *sender == ConnectionId(1) && rooms.iter().eq(["room1", "room2"])
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1))
            .join(["room1", "room2"])
            .unwrap();
    }

    #[test]
    fn test_join_without_sender() {
        let mut rooms = MockRoomStore::new();
        rooms.expect_add().never();

        let mut ws = websocket(rooms);
        assert!(matches!(ws.join(["room"]), Err(Error::UnsetSender)));
    }

    #[test]
    fn test_leave() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_delete()
            .withf(|sender, rooms| *sender == ConnectionId(1) && rooms.iter().eq(["room"]))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1)).leave(["room"]).unwrap();
    }

    #[test]
    fn test_leave_all() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_delete()
            .withf(|sender, rooms| {
                *sender == ConnectionId(1) && rooms.iter().eq(["room1", "room2"])
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1))
            .leave(["room1", "room2"])
            .unwrap();
    }

    #[test]
    fn test_leave_without_sender() {
        let mut rooms = MockRoomStore::new();
        rooms.expect_delete().never();

        let mut ws = websocket(rooms);
        assert!(matches!(ws.leave(["room"]), Err(Error::UnsetSender)));
    }

    #[test]
    fn test_callbacks() {
        let mut ws = websocket(MockRoomStore::new());
        ws.on("foo", |_ws, _payload| Ok(json!("bar")));

        assert!(ws.event_exists("foo"));
        assert!(!ws.event_exists("bar"));
    }

    #[test]
    fn test_login_using() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_add()
            .withf(|sender, rooms| *sender == ConnectionId(1) && rooms.iter().eq(["uid_1"]))
            .times(1)
            .returning(|_, _| Ok(()));

        let user = User::new(1);
        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1)).login_using(&user).unwrap();

        assert_eq!(user.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_login_using_id() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_add()
            .withf(|sender, rooms| *sender == ConnectionId(1) && rooms.iter().eq(["uid_1"]))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1)).login_using_id(1).unwrap();
    }

    #[test]
    fn test_login_without_sender() {
        let mut rooms = MockRoomStore::new();
        rooms.expect_add().never();

        let mut ws = websocket(rooms);
        assert!(matches!(ws.login_using_id(1), Err(Error::UnsetSender)));
        assert!(matches!(
            ws.login_using(&User::new(1)),
            Err(Error::UnsetSender)
        ));
    }

    #[test]
    fn test_to_user_id() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_get_clients()
            .withf(|room| room == "uid_1")
            .times(1)
            .returning(|_| Ok(vec![ConnectionId(1)]));
        rooms
            .expect_get_clients()
            .withf(|room| room == "uid_2")
            .times(1)
            .returning(|_| Ok(vec![ConnectionId(2)]));
        rooms
            .expect_get_clients()
            .withf(|room| room == "uid_3")
            .times(1)
            .returning(|_| Ok(vec![ConnectionId(3)]));

        let mut ws = websocket(rooms);

        ws.to_user_id([1]).unwrap();
        assert!(ws.get_to().contains(&Target::Connection(ConnectionId(1))));

        ws.to_user_id([2, 3]).unwrap();
        assert!(ws.get_to().contains(&Target::Connection(ConnectionId(2))));
        assert!(ws.get_to().contains(&Target::Connection(ConnectionId(3))));
    }

    #[test]
    fn test_to_user_id_offline_user() {
        let mut rooms = MockRoomStore::new();
        rooms.expect_get_clients().returning(|_| Ok(Vec::new()));

        let mut ws = websocket(rooms);
        ws.to_user_id(["ghost"]).unwrap();
        assert!(ws.get_to().is_empty());
    }

    #[test]
    fn test_to_user() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_get_clients()
            .withf(|room| room == "uid_1")
            .times(1)
            .returning(|_| Ok(vec![ConnectionId(1)]));
        rooms
            .expect_get_clients()
            .withf(|room| room == "uid_2")
            .times(1)
            .returning(|_| Ok(vec![ConnectionId(2)]));
        rooms
            .expect_get_clients()
            .withf(|room| room == "uid_3")
            .times(1)
            .returning(|_| Ok(vec![ConnectionId(3)]));

        let mut ws = websocket(rooms);

        let user = User::new(1);
        ws.to_user([&user]).unwrap();
        assert!(ws.get_to().contains(&Target::Connection(ConnectionId(1))));
        assert_eq!(user.lookups.load(Ordering::SeqCst), 1);

        let user_a = User::new(2);
        let user_b = User::new(3);
        ws.to_user([&user_a, &user_b]).unwrap();
        assert!(ws.get_to().contains(&Target::Connection(ConnectionId(2))));
        assert!(ws.get_to().contains(&Target::Connection(ConnectionId(3))));
        assert_eq!(user_a.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(user_b.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_user_id() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_get_rooms()
            .withf(|sender| *sender == ConnectionId(1))
            .times(1)
            .returning(|_| Ok(vec!["uid_1".to_string()]));

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1));
        assert_eq!(ws.get_user_id().unwrap(), Some("1".to_string()));
    }

    #[test]
    fn test_get_user_id_prefers_latest_identity() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_get_rooms()
            .returning(|_| Ok(names(&["uid_1", "lobby", "uid_7", "games"])));

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1));
        assert_eq!(ws.get_user_id().unwrap(), Some("7".to_string()));
    }

    #[test]
    fn test_get_user_id_anonymous() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_get_rooms()
            .returning(|_| Ok(names(&["lobby"])));

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1));
        assert_eq!(ws.get_user_id().unwrap(), None);
    }

    #[test]
    fn test_get_user_id_without_sender() {
        let mut rooms = MockRoomStore::new();
        rooms.expect_get_rooms().never();

        let ws = websocket(rooms);
        assert!(matches!(ws.get_user_id(), Err(Error::UnsetSender)));
    }

    #[test]
    fn test_logout_leaves_every_identity() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_get_rooms()
            .withf(|sender| *sender == ConnectionId(1))
            .times(1)
            .returning(|_| Ok(names(&["uid_1", "lobby", "uid_7"])));
        rooms
            .expect_delete()
            .withf(|sender, rooms| {
                *sender == ConnectionId(1) && rooms.iter().eq(["uid_1", "uid_7"])
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1)).logout().unwrap();
    }

    #[test]
    fn test_logout_anonymous_is_noop() {
        let mut rooms = MockRoomStore::new();
        rooms
            .expect_get_rooms()
            .times(1)
            .returning(|_| Ok(names(&["lobby"])));
        rooms.expect_delete().never();

        let mut ws = websocket(rooms);
        ws.set_sender(ConnectionId(1)).logout().unwrap();
    }

    #[test]
    fn test_logout_without_sender() {
        let mut rooms = MockRoomStore::new();
        rooms.expect_get_rooms().never();
        rooms.expect_delete().never();

        let mut ws = websocket(rooms);
        assert!(matches!(ws.logout(), Err(Error::UnsetSender)));
    }

    #[test]
    fn test_logout_then_login_again() {
        let store = Arc::new(MemoryRoomStore::new());
        let mut ws = Websocket::new(store.clone(), Arc::new(ChainPipeline));
        ws.set_sender(ConnectionId(1));

        ws.login_using_id(1).unwrap().join(["lobby"]).unwrap();
        ws.logout().unwrap();
        assert_eq!(ws.get_user_id().unwrap(), None);
        assert_eq!(store.get_rooms(ConnectionId(1)).unwrap(), names(&["lobby"]));

        ws.login_using_id(2).unwrap();
        assert_eq!(ws.get_user_id().unwrap(), Some("2".to_string()));
        assert!(store.get_clients("uid_1").unwrap().is_empty());
    }

    #[test]
    fn test_is_user_id_online() {
        let store = MemoryRoomStore::new();
        store.add(ConnectionId(5), &names(&["uid_42"])).unwrap();

        let ws = websocket(store);
        assert!(ws.is_user_id_online(42).unwrap());
        assert!(!ws.is_user_id_online(43).unwrap());
    }

    #[test]
    fn test_reset() {
        let mut ws = websocket(MockRoomStore::new());
        ws.on("foo", |_ws, _payload| Ok(Value::Null));
        ws.set_sender(ConnectionId(1)).broadcast().to(["foo"]);

        ws.reset();

        assert_eq!(ws.get_sender(), None);
        assert!(!ws.get_is_broadcast());
        assert!(ws.get_to().is_empty());
        assert!(ws.event_exists("foo"));
    }

    #[test]
    fn test_pipeline() {
        let pipeline = Arc::new(RecordingPipeline::default());
        let mut ws = Websocket::new(Arc::new(MockRoomStore::new()), pipeline.clone());

        ws.middleware(vec![Arc::new(Named("foo")), Arc::new(Named("bar"))]);
        ws.on("connect", |_ws, _payload| Ok(json!("connect")));
        ws.set_sender(ConnectionId(1));

        let result = ws.call("connect", json!({"token": "abc"})).unwrap();

        assert_eq!(result, Some(json!("connect")));

        let sent = pipeline.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.event, "connect");
        assert_eq!(sent[0].0.sender, Some(ConnectionId(1)));
        assert_eq!(sent[0].0.data, json!({"token": "abc"}));
        assert_eq!(sent[0].1, vec!["foo", "bar"]);
    }

    #[test]
    fn test_call_unknown_event_skips_pipeline() {
        let pipeline = Arc::new(RecordingPipeline::default());
        let mut ws = Websocket::new(Arc::new(MockRoomStore::new()), pipeline.clone());

        assert_eq!(ws.call("missing", Value::Null).unwrap(), None);
        assert!(pipeline.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_uses_context() {
        let store = Arc::new(MemoryRoomStore::new());
        let mut ws = Websocket::new(store.clone(), Arc::new(ChainPipeline));

        ws.on("login", |ws, payload| {
            ws.login_using_id(&payload.data["id"])?;
            ws.join(["lobby"])?;
            Ok(json!(ws.get_user_id()?))
        });

        ws.set_sender(ConnectionId(8));
        let result = ws.call("login", json!({"id": 3})).unwrap();

        assert_eq!(result, Some(json!("3")));
        assert_eq!(store.get_clients("uid_3").unwrap(), vec![ConnectionId(8)]);
        assert_eq!(store.get_clients("lobby").unwrap(), vec![ConnectionId(8)]);
    }

    #[test]
    fn test_handler_failure_propagates() {
        let mut ws = websocket(MockRoomStore::new());
        ws.on("boom", |_ws, _payload| Err(Error::handler("exploded")));

        let err = ws.call("boom", Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "exploded");
    }

    #[test]
    fn test_handler_unset_sender_propagates() {
        let mut ws = websocket(MockRoomStore::new());
        ws.on("join", |ws, _payload| {
            ws.join(["lobby"])?;
            Ok(Value::Null)
        });

        assert!(matches!(ws.call("join", Value::Null), Err(Error::UnsetSender)));
    }

    #[test]
    fn test_emit_resolves_and_clears_targets() {
        let store = MemoryRoomStore::new();
        store.add(ConnectionId(1), &names(&["lobby"])).unwrap();
        store.add(ConnectionId(2), &names(&["lobby"])).unwrap();
        store.add(ConnectionId(3), &names(&["lobby"])).unwrap();

        let sink = Arc::new(CollectingSink::default());
        let mut ws = websocket(store).with_sink(sink.clone());

        ws.set_sender(ConnectionId(1));
        let delivered = ws.broadcast().to(["lobby"]).emit("chat", json!("hi")).unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(ws.get_sender(), Some(ConnectionId(1)));
        assert!(!ws.get_is_broadcast());
        assert!(ws.get_to().is_empty());

        let pushes = sink.pushes.lock().unwrap();
        assert_eq!(pushes[0].event, "chat");
        assert_eq!(
            pushes[0].recipients([]),
            vec![ConnectionId(2), ConnectionId(3)]
        );
    }

    #[test]
    fn test_emit_without_sink() {
        let mut ws = websocket(MockRoomStore::new());
        assert!(matches!(
            ws.emit("chat", Value::Null),
            Err(Error::SinkNotConfigured)
        ));
    }
}
