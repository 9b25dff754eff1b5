//! Event handlers and middleware served by Herald.
//!
//! Clients send `{"event": ..., "data": ...}` packets. The handlers below
//! cover login, room membership and messaging; everything goes through the
//! configured middleware list first.

use anyhow::{bail, Result};
use herald_core::{
    ChainPipeline, ConnectionId, Error, Middleware, Next, Payload, PushSink, RoomStore, Websocket,
    USER_ROOM_PREFIX,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Events that may be dispatched before a connection logs in.
const PUBLIC_EVENTS: &[&str] = &["connect", "disconnect", "login"];

/// Logs every event with its dispatch time.
pub struct TraceMiddleware;

impl Middleware for TraceMiddleware {
    fn name(&self) -> &str {
        "trace"
    }

    fn handle(&self, payload: Payload, next: Next<'_>) -> Result<Value, Error> {
        let event = payload.event.clone();
        let sender = payload.sender;
        let start = Instant::now();

        let result = next.run(payload);

        debug!(
            event = %event,
            sender = ?sender,
            ok = result.is_ok(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Dispatched event"
        );
        result
    }
}

/// Rejects non-public events from connections that have not logged in.
pub struct AuthenticateMiddleware {
    rooms: Arc<dyn RoomStore>,
}

impl AuthenticateMiddleware {
    /// Create the middleware over the shared room store.
    #[must_use]
    pub fn new(rooms: Arc<dyn RoomStore>) -> Self {
        Self { rooms }
    }

    fn is_logged_in(&self, sender: ConnectionId) -> Result<bool, Error> {
        Ok(self
            .rooms
            .get_rooms(sender)?
            .iter()
            .any(|room| room.starts_with(USER_ROOM_PREFIX)))
    }
}

impl Middleware for AuthenticateMiddleware {
    fn name(&self) -> &str {
        "authenticate"
    }

    fn handle(&self, payload: Payload, next: Next<'_>) -> Result<Value, Error> {
        if PUBLIC_EVENTS.contains(&payload.event.as_str()) {
            return next.run(payload);
        }

        match payload.sender {
            Some(sender) if self.is_logged_in(sender)? => next.run(payload),
            _ => Err(Error::rejected(self.name(), "login required")),
        }
    }
}

/// Resolve configured middleware names.
///
/// # Errors
///
/// Returns an error for unknown middleware names.
pub fn resolve_middleware(
    names: &[String],
    rooms: &Arc<dyn RoomStore>,
) -> Result<Vec<Arc<dyn Middleware>>> {
    names
        .iter()
        .map(|name| -> Result<Arc<dyn Middleware>> {
            match name.as_str() {
                "trace" => Ok(Arc::new(TraceMiddleware)),
                "authenticate" => Ok(Arc::new(AuthenticateMiddleware::new(rooms.clone()))),
                other => bail!("Unknown middleware: {other}"),
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    user_id: Value,
}

#[derive(Debug, Deserialize)]
struct RoomsRequest {
    rooms: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    #[serde(default)]
    room: Option<String>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperRequest {
    user_id: Value,
    text: String,
}

impl RoomsRequest {
    /// Identity rooms are written by `login` only.
    fn check_reserved(&self, event: &str) -> Result<(), Error> {
        match self.rooms.iter().find(|room| room.starts_with(USER_ROOM_PREFIX)) {
            Some(room) => Err(Error::rejected(event, format!("room {room} is reserved"))),
            None => Ok(()),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, Error> {
    serde_json::from_value(data).map_err(Error::handler)
}

/// Render a user id without JSON string quotes.
fn user_key(id: &Value) -> Result<String, Error> {
    match id {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::handler("user_id must be a non-empty string or a number")),
    }
}

/// Register every event handler on a context.
pub fn register_events(ws: &mut Websocket) {
    ws.on("connect", |ws, _payload| {
        Ok(json!({ "connection": ws.get_sender() }))
    });

    ws.on("disconnect", |_ws, _payload| Ok(Value::Null));

    ws.on("login", |ws, payload| {
        let request: LoginRequest = parse(payload.data)?;
        let user_id = user_key(&request.user_id)?;
        ws.login_using_id(&user_id)?;
        Ok(json!({ "user_id": user_id }))
    });

    ws.on("logout", |ws, _payload| {
        let user_id = ws.get_user_id()?;
        ws.logout()?;
        Ok(json!({ "user_id": user_id }))
    });

    ws.on("whoami", |ws, _payload| {
        Ok(json!({ "user_id": ws.get_user_id()? }))
    });

    ws.on("join", |ws, payload| {
        let request: RoomsRequest = parse(payload.data)?;
        request.check_reserved("join")?;
        ws.join(request.rooms.iter().map(String::as_str))?;
        Ok(json!({ "joined": request.rooms }))
    });

    ws.on("leave", |ws, payload| {
        let request: RoomsRequest = parse(payload.data)?;
        request.check_reserved("leave")?;
        ws.leave(request.rooms.iter().map(String::as_str))?;
        Ok(json!({ "left": request.rooms }))
    });

    ws.on("message", |ws, payload| {
        let request: MessageRequest = parse(payload.data)?;
        let from = ws.get_user_id()?;

        ws.broadcast();
        if let Some(room) = &request.room {
            ws.to([room.as_str()]);
        }

        let delivered = ws.emit(
            "message",
            json!({ "from": from, "room": request.room, "text": request.text }),
        )?;
        Ok(json!({ "delivered": delivered }))
    });

    ws.on("whisper", |ws, payload| {
        let request: WhisperRequest = parse(payload.data)?;
        let to = user_key(&request.user_id)?;
        let from = ws.get_user_id()?;

        if !ws.is_user_id_online(&to)? {
            return Ok(json!({ "delivered": 0, "online": false }));
        }

        let delivered = ws
            .to_user_id([&to])?
            .emit("whisper", json!({ "from": from, "text": request.text }))?;
        Ok(json!({ "delivered": delivered, "online": true }))
    });
}

/// Build a fully configured targeting context for one worker.
///
/// # Errors
///
/// Returns an error if the middleware list names unknown middleware.
pub fn build_websocket(
    rooms: Arc<dyn RoomStore>,
    sink: Arc<dyn PushSink>,
    middleware: &[String],
) -> Result<Websocket> {
    let resolved = resolve_middleware(middleware, &rooms)?;
    let mut ws = Websocket::new(rooms, Arc::new(ChainPipeline)).with_sink(sink);

    ws.middleware(resolved);
    register_events(&mut ws);

    info!(middleware = ?ws.middleware_names(), "Built dispatch context");
    Ok(ws)
}
