//! Transport-independent protocol state of one client connection.
//!
//! The socket adapter feeds inbound frames to [`Connection::handle_text`]
//! one at a time and drains the outbox into the socket. Room broadcasts
//! reach the outbox through a forwarder task owned by the connection.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::{ClientMessage, ErrorKind, ErrorPayload, EventKind, LeaveMessage, ServerMessage, User, UserMessage};
use crate::services::validation::{validate_session_id, SessionIdPolicy};
use crate::services::RateLimitDecision;
use crate::state::AppState;
use crate::websocket::{msg_content_handler, msg_join_handler, msg_presence_handler, msg_sync_handler};
use crate::ws::{ConnCtx, ConnState, RoomEvent};

pub struct Connection {
    app: Arc<AppState>,
    ctx: ConnCtx,
    outbox: mpsc::Sender<ServerMessage>,
    forwarder: Option<JoinHandle<()>>,
}

impl Connection {
    /// Accept a connection for `session_id`. A missing or malformed id is
    /// returned as the error to report before closing the transport.
    pub fn open(
        app: Arc<AppState>,
        session_id: Option<&str>,
        outbox: mpsc::Sender<ServerMessage>,
    ) -> Result<Self, ErrorPayload> {
        let policy = SessionIdPolicy::from_flag(app.config.session_id_allow_separators);
        let session_id = validate_session_id(session_id, policy)?;
        let ctx = ConnCtx::new(session_id);
        info!("Connection {} opened for session {}", ctx.conn_id, ctx.session_id);
        Ok(Self { app, ctx, outbox, forwarder: None })
    }

    pub fn id(&self) -> &str {
        &self.ctx.conn_id
    }

    pub fn session_id(&self) -> &str {
        &self.ctx.session_id
    }

    pub fn state(&self) -> ConnState {
        self.ctx.state
    }

    pub fn user(&self) -> Option<&User> {
        self.ctx.user.as_ref()
    }

    pub(crate) fn app(&self) -> &Arc<AppState> {
        &self.app
    }

    /// Handle one raw text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle(message).await,
            Err(payload) => {
                warn!("Connection {} sent an unparseable message", self.ctx.conn_id);
                self.ctx.touch(Instant::now());
                self.send(payload.into()).await;
            }
        }
    }

    pub async fn reject_binary(&mut self) {
        self.ctx.touch(Instant::now());
        self.send(ErrorPayload::new(ErrorKind::InvalidPayload, "Binary messages are not supported").into())
            .await;
    }

    pub async fn handle(&mut self, message: ClientMessage) {
        if self.ctx.state == ConnState::Disconnected {
            return;
        }
        self.ctx.touch(Instant::now());
        // Broadcasts carry the sender's current activity time
        if let Some(user) = self.ctx.user.as_mut() {
            user.touch(Utc::now());
        }
        let kind = message.kind();
        debug!("Connection {} received {}", self.ctx.conn_id, kind);

        let result = match message {
            ClientMessage::Join(msg) => msg_join_handler::handle_join_message(self, msg).await,
            ClientMessage::SyncRequest => msg_sync_handler::handle_sync_request(self).await,
            other => match self.ctx.user.clone() {
                None => Err(ErrorPayload::new(
                    ErrorKind::InvalidPayload,
                    format!("Join the session before sending '{}'", kind),
                )),
                Some(user) => self.dispatch_member_event(user, other).await,
            },
        };

        if let Err(payload) = result {
            warn!(
                "Rejected {} from connection {}: {:?} {}",
                kind, self.ctx.conn_id, payload.kind, payload.message
            );
            self.send(payload.into()).await;
        }
    }

    async fn dispatch_member_event(&mut self, user: User, message: ClientMessage) -> Result<(), ErrorPayload> {
        match message {
            ClientMessage::ContentChange(msg) => msg_content_handler::handle_content_change(self, user, msg).await,
            ClientMessage::LanguageChange(msg) => msg_content_handler::handle_language_change(self, user, msg).await,
            ClientMessage::CursorMove(msg) => msg_presence_handler::handle_cursor_move(self, user, msg).await,
            ClientMessage::SelectionChange(msg) => msg_presence_handler::handle_selection_change(self, user, msg).await,
            ClientMessage::TypingStatus(msg) => msg_presence_handler::handle_typing_status(self, user, msg).await,
            ClientMessage::Join(_) | ClientMessage::SyncRequest => Ok(()),
        }
    }

    /// Idle tick from the adapter.
    pub fn refresh_idle(&mut self, now: Instant) {
        if self.ctx.check_idle(now, self.app.config.idle_after()) {
            debug!("Connection {} is idle", self.ctx.conn_id);
        }
    }

    /// Queue a message for this client only.
    pub async fn send(&self, message: ServerMessage) {
        if self.outbox.send(message).await.is_err() {
            debug!("Outbox of connection {} is closed", self.ctx.conn_id);
        }
    }

    /// Publish to every other connection in the session's room.
    pub(crate) async fn publish(&self, message: ServerMessage) {
        let delivered = self.app.rooms.publish(&self.ctx.session_id, Some(&self.ctx.conn_id), message).await;
        debug!("Published to {} receivers in room {}", delivered, self.ctx.session_id);
    }

    pub(crate) fn check_rate(&self, event: EventKind) -> Result<(), ErrorPayload> {
        match self.app.rate_limiter.check(&self.ctx.conn_id, event) {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Limited { message } => Err(ErrorPayload::new(ErrorKind::RateLimitExceeded, message)),
        }
    }

    /// Take the stored copy of this connection's user after a write.
    pub(crate) fn refresh_user(&mut self, user: User) {
        if self.ctx.user.as_ref().is_some_and(|current| current.id == user.id) {
            self.ctx.user = Some(user);
        }
    }

    /// Become a member and start receiving room events.
    ///
    /// Messages already queued in the outbox are delivered before any
    /// room event buffered in `receiver`.
    pub(crate) fn bind(&mut self, user: User, receiver: broadcast::Receiver<RoomEvent>) {
        self.ctx.user = Some(user);
        self.ctx.state = ConnState::Joined;
        self.app.metrics.member_joined();
        self.forwarder = Some(self.spawn_forwarder(receiver));
    }

    fn spawn_forwarder(&self, mut receiver: broadcast::Receiver<RoomEvent>) -> JoinHandle<()> {
        let conn_id = self.ctx.conn_id.clone();
        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        // Skip messages from this connection to prevent echo
                        if event.origin.as_deref() == Some(conn_id.as_str()) {
                            continue;
                        }
                        if outbox.send((*event.message).clone()).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Connection {} lagged behind its room, dropped {} events", conn_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stop receiving room events and drop the room if it became empty.
    async fn unbind(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
            // Wait until the receiver is dropped so the room count is accurate
            let _ = forwarder.await;
        }
        self.app.rooms.release(&self.ctx.session_id).await;
        if self.ctx.user.take().is_some() {
            self.app.metrics.member_left();
        }
    }

    /// The session no longer lists this connection's user: it was swept or
    /// expired. Tell the client and fall back to connecting.
    pub(crate) async fn lost_membership(&mut self) {
        let Some(user_id) = self.ctx.user.as_ref().map(|user| user.id.clone()) else {
            return;
        };
        info!(
            "User {} is no longer in session {}, connection {} must rejoin",
            user_id, self.ctx.session_id, self.ctx.conn_id
        );
        self.unbind().await;
        self.ctx.state = ConnState::Connecting;
        self.send(ServerMessage::Leave(LeaveMessage { user_id })).await;
    }

    /// Leave the session and release every per-connection resource.
    /// Safe to call more than once.
    pub async fn disconnect(&mut self) {
        if self.ctx.state == ConnState::Disconnected {
            return;
        }

        if let Some(user) = self.ctx.user.clone() {
            let app = self.app.clone();
            let mut locked = app.sessions.lock(&self.ctx.session_id).await;
            match locked.remove_user(&user.id).await {
                Ok(Some(removed)) => {
                    self.publish(ServerMessage::UserLeft(UserMessage { user: removed })).await;
                }
                Ok(None) => debug!("User {} was already gone from session {}", user.id, self.ctx.session_id),
                Err(e) => error!("Failed to remove user {} from session {}: {}", user.id, self.ctx.session_id, e),
            }
            drop(locked);
            self.unbind().await;
        }

        self.app.rate_limiter.clear(&self.ctx.conn_id);
        self.ctx.state = ConnState::Disconnected;
        info!("Connection {} closed", self.ctx.conn_id);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
