//! Per-connection session task.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`]. The flow is:
//!   1. Read `Status` or `Login`; answer a status ping and stop there
//!   2. Optional encryption exchange and [`Authenticator`] check
//!   3. Capacity check, register the name, dial the first routed backend
//!   4. Loop: shuttle frames between client and backend, and act on
//!      redirect and kick commands from the session's handle
//!
//! A refused login ends with a localized `Disconnect` and is not an error.

use std::sync::Arc;

use rand::Rng;
use switchyard_protocol::{Codec, LinkFrame, PROTOCOL_VERSION, Packet, is_valid_player_name};
use switchyard_session::{
    AuthRequest, Authenticator, Backend, SessionCommand, SessionError, SessionHandle,
    SessionLifecycle, SessionState,
};
use switchyard_transport::{Connection, ConnectionId};
use tokio::sync::mpsc;

use crate::ProxyError;
use crate::connect::locale;
use crate::context::{ProxyContext, ProxyEvent};
use crate::link::{BackendLink, FramePump, MAX_FORWARD_LEN};
use crate::server::ProxyState;

/// Length of the symmetric key the client proposes in the encryption
/// exchange.
pub const SESSION_KEY_LEN: usize = 16;

const VERIFY_TOKEN_LEN: usize = 4;

/// Drop guard that removes the player from the registry when the session
/// task exits, however it exits.
struct Registration {
    handle: SessionHandle,
    context: ProxyContext,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.context.registry().unregister_session(&self.handle) {
            self.context.emit(ProxyEvent::PlayerLeft {
                player: self.handle.name().to_string(),
            });
        }
    }
}

/// State of a logged-in player.
struct Attached {
    name: String,
    host: String,
    candidates: Vec<String>,
    link: BackendLink,
    commands: mpsc::Receiver<SessionCommand>,
}

struct Session<C: Connection, A: Authenticator> {
    conn: Arc<C>,
    inbound: FramePump,
    state: Arc<ProxyState<A>>,
    lifecycle: SessionLifecycle,
    session_key: Option<Vec<u8>>,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C, A>(
    conn: C,
    state: Arc<ProxyState<A>>,
) -> Result<(), ProxyError>
where
    C: Connection,
    A: Authenticator,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");
    state.context.emit(ProxyEvent::SessionOpened { conn_id });

    let conn = Arc::new(conn);
    let mut session = Session {
        inbound: FramePump::spawn(Arc::clone(&conn)),
        conn,
        state,
        lifecycle: SessionLifecycle::new(),
        session_key: None,
    };

    let result = session.run().await;
    session.lifecycle.close();
    let _ = session.conn.close().await;
    tracing::debug!(%conn_id, "connection closed");
    result
}

impl<C: Connection, A: Authenticator> Session<C, A> {
    fn conn_id(&self) -> ConnectionId {
        self.conn.id()
    }

    async fn run(&mut self) -> Result<(), ProxyError> {
        // --- Step 1: Status or Login ---
        let (name, host) = match self.next_handshake_packet().await? {
            Packet::Status => return self.answer_status().await,
            Packet::Login {
                version,
                name,
                host,
            } => {
                if version != PROTOCOL_VERSION {
                    tracing::info!(
                        conn_id = %self.conn_id(),
                        client = version,
                        server = PROTOCOL_VERSION,
                        "protocol version mismatch"
                    );
                    return self.refuse(locale::OUTDATED).await;
                }
                if !is_valid_player_name(&name) {
                    tracing::info!(conn_id = %self.conn_id(), player = %name, "invalid player name");
                    return self.refuse(locale::INVALID_NAME).await;
                }
                (name, host)
            }
            other => {
                tracing::debug!(conn_id = %self.conn_id(), packet = ?other, "unexpected first packet");
                return self.refuse(locale::HANDSHAKE_FAILED).await;
            }
        };

        // --- Step 2: Encryption and identity ---
        if self.state.config.authenticate {
            self.lifecycle.transition(SessionState::Authenticating)?;
            if let Err(e) = self.authenticate(&name).await {
                tracing::info!(conn_id = %self.conn_id(), player = %name, error = %e, "authentication failed");
                return self.refuse(locale::AUTH_FAILED).await;
            }
        }

        // --- Step 3: Capacity, registration, first backend ---
        let context = &self.state.context;
        let max = usize::from(context.max_players());
        let (handle, commands) = SessionHandle::new(self.conn_id(), &name, &self.lifecycle);
        match context.registry().register_bounded(handle.clone(), max) {
            Ok(()) => {}
            Err(SessionError::ServerFull { .. }) => {
                tracing::info!(player = %name, max, "server full");
                return self.refuse(locale::SERVER_FULL).await;
            }
            Err(_) => return self.refuse(locale::ALREADY_ONLINE).await,
        }
        let _registration = Registration {
            handle,
            context: context.clone(),
        };
        self.lifecycle.transition(SessionState::Active)?;

        let candidates = self.state.router.route(&host);
        let Some(link) = self.connect_first(&candidates, &name, &host, None).await else {
            tracing::warn!(player = %name, host = %host, ?candidates, "no backend reachable");
            return self.refuse(locale::NO_BACKEND).await;
        };
        let backend = link.backend().name.clone();
        self.lifecycle.set_backend(Some(backend.clone()));

        self.send_packet(&Packet::LoginSuccess { name: name.clone() })
            .await?;
        tracing::info!(
            conn_id = %self.conn_id(),
            player = %name,
            backend = %backend,
            encrypted = self.session_key.is_some(),
            "player joined"
        );
        self.state.context.emit(ProxyEvent::PlayerJoined {
            player: name.clone(),
            backend,
        });

        // --- Step 4: Forwarding ---
        let mut attached = Attached {
            name,
            host,
            candidates,
            link,
            commands,
        };
        let result = self.forward(&mut attached).await;
        attached.link.close().await;
        result
    }

    /// Runs the encryption exchange and asks the authenticator about
    /// `name`.
    async fn authenticate(&mut self, name: &str) -> Result<(), ProxyError> {
        let verify_token: [u8; VERIFY_TOKEN_LEN] = rand::rng().random();
        self.send_packet(&Packet::EncryptionRequest {
            public_key: self.state.keys.public_key_der().to_vec(),
            verify_token: verify_token.to_vec(),
        })
        .await?;

        let Packet::EncryptionResponse {
            shared_secret,
            verify_token: echoed,
        } = self.next_handshake_packet().await?
        else {
            return Err(ProxyError::Handshake("expected EncryptionResponse".into()));
        };

        if self.state.keys.decrypt(&echoed)? != verify_token {
            return Err(SessionError::AuthFailed("verify token mismatch".into()).into());
        }
        let secret = self.state.keys.decrypt(&shared_secret)?;
        if secret.len() != SESSION_KEY_LEN {
            return Err(ProxyError::Handshake(format!(
                "session key is {} bytes, expected {SESSION_KEY_LEN}",
                secret.len()
            )));
        }

        let request = AuthRequest {
            name: name.to_string(),
            server_hash: self.state.keys.server_hash(&secret),
        };
        self.state.auth.authenticate(&request).await?;
        self.session_key = Some(secret);
        Ok(())
    }

    async fn forward(&mut self, attached: &mut Attached) -> Result<(), ProxyError> {
        loop {
            tokio::select! {
                frame = self.inbound.recv() => {
                    let Some(data) = frame else {
                        tracing::info!(player = %attached.name, "client disconnected");
                        return Ok(());
                    };
                    if data.len() > MAX_FORWARD_LEN {
                        tracing::warn!(
                            player = %attached.name,
                            len = data.len(),
                            max = MAX_FORWARD_LEN,
                            "dropping oversized client frame"
                        );
                        continue;
                    }
                    if let Err(e) = attached.link.send_data(&data).await {
                        tracing::warn!(player = %attached.name, error = %e, "backend write failed");
                        let reason = self.state.localizer.localize(locale::LOST_CONNECTION);
                        if !self.fall_back(attached, reason).await? {
                            return Ok(());
                        }
                    }
                }
                frame = attached.link.recv() => {
                    let reason = match frame {
                        Some(bytes) => match LinkFrame::decode(bytes, &self.state.codec) {
                            Ok(LinkFrame::Data(data)) => {
                                self.conn.send(&data).await?;
                                continue;
                            }
                            Ok(LinkFrame::Control(Packet::Disconnect { reason })) => reason,
                            Ok(LinkFrame::Control(other)) => {
                                tracing::debug!(player = %attached.name, packet = ?other, "ignoring backend packet");
                                continue;
                            }
                            Err(e) => {
                                tracing::debug!(player = %attached.name, error = %e, "undecodable backend frame");
                                continue;
                            }
                        },
                        None => self.state.localizer.localize(locale::LOST_CONNECTION),
                    };
                    if !self.fall_back(attached, reason).await? {
                        return Ok(());
                    }
                }
                command = attached.commands.recv() => match command {
                    Some(SessionCommand::Redirect { backend, reply }) => {
                        let outcome = self.redirect(attached, backend).await;
                        if let Some(reply) = reply {
                            let _ = reply.send(outcome);
                        }
                    }
                    Some(SessionCommand::Kick { reason }) => {
                        tracing::info!(player = %attached.name, %reason, "player kicked");
                        self.send_packet(&Packet::Disconnect { reason }).await?;
                        return Ok(());
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    /// Moves the player to `backend`. On failure the player stays on the
    /// current backend.
    async fn redirect(
        &mut self,
        attached: &mut Attached,
        backend: Backend,
    ) -> Result<(), SessionError> {
        let from = attached.link.backend().name.clone();
        if from == backend.name {
            tracing::debug!(player = %attached.name, backend = %from, "already on backend");
            return Ok(());
        }

        self.lifecycle.transition(SessionState::Redirecting)?;
        let opened = BackendLink::open(
            backend.clone(),
            &attached.name,
            &attached.host,
            self.state.config.backend_connect_timeout(),
            &self.state.codec,
        )
        .await;

        match opened {
            Ok(link) => {
                self.swap_link(attached, link).await;
                self.lifecycle.transition(SessionState::Active)?;
                Ok(())
            }
            Err(e) => {
                self.lifecycle.transition(SessionState::Active)?;
                tracing::warn!(
                    player = %attached.name,
                    from = %from,
                    to = %backend.name,
                    error = %e,
                    "redirect failed, staying on current backend"
                );
                self.state.context.emit(ProxyEvent::RedirectFailed {
                    player: attached.name.clone(),
                    backend: backend.name.clone(),
                    reason: e.to_string(),
                });
                Err(SessionError::BackendUnavailable {
                    backend: backend.name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// The current backend is gone or kicked the player with `reason`.
    /// Moves the player to another routed backend when the reason matches
    /// the kick pattern; otherwise passes `reason` on to the client.
    ///
    /// Returns `false` if the client was disconnected.
    async fn fall_back(
        &mut self,
        attached: &mut Attached,
        reason: String,
    ) -> Result<bool, ProxyError> {
        let current = attached.link.backend().name.clone();
        if self.state.kick_pattern.is_match(&reason) {
            self.lifecycle.transition(SessionState::Redirecting)?;
            let next = self
                .connect_first(
                    &attached.candidates,
                    &attached.name,
                    &attached.host,
                    Some(&current),
                )
                .await;
            self.lifecycle.transition(SessionState::Active)?;
            if let Some(link) = next {
                tracing::info!(player = %attached.name, from = %current, %reason, "falling back to another backend");
                self.swap_link(attached, link).await;
                return Ok(true);
            }
        }

        tracing::info!(player = %attached.name, backend = %current, %reason, "disconnected by backend");
        self.send_packet(&Packet::Disconnect { reason }).await?;
        Ok(false)
    }

    async fn swap_link(&mut self, attached: &mut Attached, link: BackendLink) {
        let to = link.backend().name.clone();
        let old = std::mem::replace(&mut attached.link, link);
        let from = old.backend().name.clone();
        old.close().await;

        self.lifecycle.set_backend(Some(to.clone()));
        tracing::info!(player = %attached.name, %from, %to, "player redirected");
        self.state.context.emit(ProxyEvent::Redirected {
            player: attached.name.clone(),
            from,
            to,
        });
    }

    /// Dials the first reachable candidate, skipping `skip`.
    async fn connect_first(
        &self,
        candidates: &[String],
        name: &str,
        host: &str,
        skip: Option<&str>,
    ) -> Option<BackendLink> {
        for candidate in candidates {
            if skip == Some(candidate.as_str()) {
                continue;
            }
            let Some(backend) = self.state.context.connectivity().backend(candidate) else {
                tracing::debug!(backend = %candidate, "routed backend is unknown");
                continue;
            };
            match BackendLink::open(
                backend,
                name,
                host,
                self.state.config.backend_connect_timeout(),
                &self.state.codec,
            )
            .await
            {
                Ok(link) => return Some(link),
                Err(e) => {
                    tracing::warn!(backend = %candidate, player = name, error = %e, "backend unreachable");
                }
            }
        }
        None
    }

    async fn next_handshake_packet(&mut self) -> Result<Packet, ProxyError> {
        let frame = match tokio::time::timeout(
            self.state.config.handshake_timeout(),
            self.inbound.recv(),
        )
        .await
        {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Err(ProxyError::Handshake(
                    "connection closed during handshake".into(),
                ));
            }
            Err(_) => return Err(ProxyError::Handshake("handshake timed out".into())),
        };
        Ok(self.state.codec.decode(&frame)?)
    }

    async fn answer_status(&self) -> Result<(), ProxyError> {
        let context = &self.state.context;
        self.send_packet(&Packet::StatusResponse {
            motd: context.motd().to_string(),
            online: context.player_count(),
            max_players: context.max_players(),
        })
        .await
    }

    /// Ends a login attempt with a localized reason.
    async fn refuse(&self, key: &str) -> Result<(), ProxyError> {
        let reason = self.state.localizer.localize(key);
        self.send_packet(&Packet::Disconnect { reason }).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), ProxyError> {
        let bytes = self.state.codec.encode(packet)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }
}
