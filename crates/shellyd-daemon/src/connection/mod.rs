//! Per-connection protocol state machine.
//!
//! One task per accepted WebSocket. Inbound messages are dispatched
//! serially; every outbound frame goes through a single writer task so
//! the wire carries a total order. The shell's reader thread delivers
//! chunks over a bounded channel that is polled in the same select loop.

mod phase;

pub use phase::{phase_name, PhaseInput, PhaseMachine, PhaseState};

use crate::collaborators::PairingDisplay;
use crate::pairing::PairingController;
use crate::settings;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::{SinkExt, StreamExt};
use shellyd_audit::AuditSink;
use shellyd_core::{Config, Paths};
use shellyd_keys::{verify_challenge_signature, KeyStore};
use shellyd_protocol::{
    codes, AuthChallengePayload, AuthResponsePayload, AuthResultPayload, CommandCompletePayload,
    Envelope, ErrorPayload, HelloPayload, LongRunningCommandPayload, MessageType,
    PairChallengePayload, PairRequestPayload, PairResponsePayload, PairVerifyPayload,
    RegisterPushTokenPayload, SettingsConfirmPayload, SettingsSyncPayload, SettingsUpdatePayload,
    SudoConfirmRequestPayload, SudoConfirmResponsePayload, SudoPasswordPayload,
    TerminalInputPayload, TerminalOutputPayload, TerminalResizePayload,
};
use shellyd_pty::{InputLineTracker, LineEvent, ShellConfig, ShellEvent, ShellSession};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A command is flagged long-running after this much wall time.
const LONG_RUNNING_AFTER: Duration = Duration::from_secs(15);

/// Outbound writer queue depth.
const OUTBOUND_QUEUE: usize = 64;

/// Everything a connection needs, passed explicitly at construction so
/// lifetimes are visible and nothing reaches for ambient globals.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub config: Arc<RwLock<Config>>,
    pub paths: Paths,
    pub keys: KeyStore,
    pub pairing: Arc<PairingController>,
    pub audit: AuditSink,
    /// Certificate fingerprint delivered in the pair response.
    pub certificate_fingerprint: Option<String>,
    /// Base64 ephemeral server Ed25519 public key.
    pub server_public_key: String,
    pub display: Arc<dyn PairingDisplay>,
    /// Host label shown in the pair challenge.
    pub host_label: String,
}

/// Whether the select loop keeps going after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close(&'static str),
}

#[derive(Clone)]
struct Outbound {
    tx: mpsc::Sender<Message>,
}

impl Outbound {
    async fn envelope<P: serde::Serialize>(&self, message_type: MessageType, payload: &P) {
        match Envelope::new(message_type, payload) {
            Ok(env) => self.send_envelope(env).await,
            Err(err) => warn!(error = %err, "Could not encode outbound envelope"),
        }
    }

    async fn empty(&self, message_type: MessageType) {
        self.send_envelope(Envelope::empty(message_type)).await;
    }

    async fn send_envelope(&self, env: Envelope) {
        match env.to_json() {
            Ok(json) => {
                if self.tx.send(Message::Text(json)).await.is_err() {
                    debug!("Outbound channel closed");
                }
            }
            Err(err) => warn!(error = %err, "Could not serialize outbound envelope"),
        }
    }

    async fn close(&self, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        };
        let _ = self.tx.send(Message::Close(Some(frame))).await;
    }
}

struct RunningCommand {
    command: String,
    started_at: Instant,
    started_wall: chrono::DateTime<chrono::Utc>,
    notified: bool,
}

struct PendingSudo {
    id: String,
    approved: bool,
}

struct Connection {
    deps: ConnectionDeps,
    out: Outbound,
    phase: PhaseMachine,
    pending_challenge: Option<Vec<u8>>,
    client_key: Option<Vec<u8>>,
    client_label: String,
    pending_pair: Option<(String, String)>,
    session_id: Option<String>,
    shell: Option<Arc<ShellSession>>,
    tracker: InputLineTracker,
    running: Option<RunningCommand>,
    pending_sudo: Option<PendingSudo>,
    /// Set right after a password write; cleared once a newline has gone
    /// through the output path. While set, output records stay out of
    /// the audit log.
    suppress_output_audit: bool,
    push_tokens: Vec<RegisterPushTokenPayload>,
}

/// Drive one upgraded WebSocket until it closes.
pub async fn handle_connection<S>(ws: WebSocketStream<S>, deps: ConnectionDeps)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut conn = Connection {
        deps,
        out: Outbound { tx },
        phase: PhaseMachine::new(),
        pending_challenge: None,
        client_key: None,
        client_label: String::new(),
        pending_pair: None,
        session_id: None,
        shell: None,
        tracker: InputLineTracker::new(),
        running: None,
        pending_sudo: None,
        suppress_output_audit: false,
        push_tokens: Vec::new(),
    };

    let mut shell_rx: Option<mpsc::Receiver<ShellEvent>> = None;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let cause: &str;
    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match conn.handle_text(&text, &mut shell_rx).await {
                            Flow::Continue => {}
                            Flow::Close(why) => { cause = why; break; }
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => conn.handle_binary(&bytes).await,
                    Some(Ok(Message::Close(_))) | None => { cause = "peer closed"; break; }
                    Some(Ok(_)) => {} // transport-level ping/pong frames
                    Some(Err(err)) => {
                        warn!(error = %err, "Transport error");
                        cause = "transport error";
                        break;
                    }
                }
            }
            event = recv_shell(&mut shell_rx) => {
                match event {
                    Some(ShellEvent::Output(chunk)) => conn.handle_shell_output(&chunk).await,
                    Some(ShellEvent::Exited) | None => {
                        conn.note_shell_exit().await;
                        cause = "shell exited";
                        break;
                    }
                }
            }
            _ = ticker.tick() => conn.tick().await,
        }
    }

    conn.teardown(cause).await;
    drop(conn);
    let _ = writer.await;
}

async fn recv_shell(rx: &mut Option<mpsc::Receiver<ShellEvent>>) -> Option<ShellEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Connection {
    fn state(&self) -> PhaseState {
        self.phase.state().clone()
    }

    fn advance(&mut self, input: PhaseInput) {
        if self.phase.consume(&input).is_err() {
            debug!(phase = phase_name(self.phase.state()), "Phase input ignored");
        }
    }

    async fn handle_text(
        &mut self,
        text: &str,
        shell_rx: &mut Option<mpsc::Receiver<ShellEvent>>,
    ) -> Flow {
        let env = match Envelope::from_json(text) {
            Ok(env) => env,
            Err(err) => {
                debug!(error = %err, "Malformed envelope");
                self.out
                    .envelope(
                        MessageType::Error,
                        &ErrorPayload::recoverable(codes::MALFORMED_FRAME, "could not parse envelope"),
                    )
                    .await;
                return Flow::Continue;
            }
        };

        if env.message_type == MessageType::Unknown {
            self.out
                .envelope(
                    MessageType::Error,
                    &ErrorPayload::recoverable(codes::UNKNOWN_TYPE, "unknown message type"),
                )
                .await;
            return Flow::Continue;
        }

        match self.state() {
            PhaseState::AwaitingHello => self.on_awaiting_hello(env).await,
            PhaseState::AwaitingPairVerify => self.on_awaiting_pair_verify(env).await,
            PhaseState::AwaitingAuthResponse => self.on_awaiting_auth_response(env, shell_rx).await,
            PhaseState::Open => self.on_open(env).await,
            PhaseState::Closing => Flow::Continue,
        }
    }

    // ---- awaiting-hello -------------------------------------------------

    async fn on_awaiting_hello(&mut self, env: Envelope) -> Flow {
        match env.message_type {
            MessageType::PairRequest => {
                let Ok(req) = env.decode_payload::<PairRequestPayload>() else {
                    return self.payload_mismatch().await;
                };
                let label = req.device_name.unwrap_or_else(|| "unknown device".to_string());

                match self.deps.pairing.begin(&req.public_key, &label) {
                    Ok(code) => {
                        self.client_label = label.clone();
                        self.pending_pair = Some((req.public_key, label.clone()));
                        self.deps.display.show(&code, &label);

                        let message = format!(
                            "Enter the 6-digit code shown on {}",
                            self.deps.host_label
                        );
                        self.out
                            .envelope(
                                MessageType::PairChallenge,
                                &PairChallengePayload {
                                    mac_name: self.deps.host_label.clone(),
                                    message,
                                },
                            )
                            .await;
                        self.advance(PhaseInput::PairRequested);
                        Flow::Continue
                    }
                    Err(err) => {
                        warn!(error = %err, "Rejected concurrent pair request");
                        self.out
                            .envelope(
                                MessageType::Error,
                                &ErrorPayload::fatal(
                                    codes::PAIRING_BUSY,
                                    "another pairing attempt is in progress",
                                ),
                            )
                            .await;
                        self.advance(PhaseInput::Rejected);
                        Flow::Close("pairing busy")
                    }
                }
            }
            MessageType::Hello => {
                let Ok(hello) = env.decode_payload::<HelloPayload>() else {
                    return self.payload_mismatch().await;
                };

                let authorized = self
                    .deps
                    .keys
                    .is_authorized(&hello.public_key)
                    .unwrap_or(false);
                let key_bytes = BASE64.decode(hello.public_key.trim()).ok();

                match (authorized, key_bytes) {
                    (true, Some(key_bytes)) => {
                        self.client_label = hello
                            .device_name
                            .unwrap_or_else(|| "unknown device".to_string());
                        self.client_key = Some(key_bytes);

                        let challenge: [u8; 32] = rand::random();
                        self.pending_challenge = Some(challenge.to_vec());

                        self.out
                            .envelope(
                                MessageType::AuthChallenge,
                                &AuthChallengePayload {
                                    challenge: BASE64.encode(challenge),
                                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                                    server_public_key: self.deps.server_public_key.clone(),
                                },
                            )
                            .await;
                        self.advance(PhaseInput::HelloAuthorized);
                        Flow::Continue
                    }
                    _ => {
                        info!("Rejected hello from unauthorized key");
                        self.out
                            .envelope(
                                MessageType::AuthResult,
                                &AuthResultPayload {
                                    success: false,
                                    session_token: None,
                                },
                            )
                            .await;
                        self.advance(PhaseInput::Rejected);
                        Flow::Close("unauthorized key")
                    }
                }
            }
            _ => self.out_of_phase_fatal().await,
        }
    }

    // ---- awaiting-pair-verify -------------------------------------------

    async fn on_awaiting_pair_verify(&mut self, env: Envelope) -> Flow {
        match env.message_type {
            MessageType::PairVerify => {
                let Ok(verify) = env.decode_payload::<PairVerifyPayload>() else {
                    return self.payload_mismatch().await;
                };

                let accepted = self.deps.pairing.verify(&verify.code);
                self.deps.display.dismiss();

                if accepted {
                    let (key, label) = match self.pending_pair.take() {
                        Some(pending) => pending,
                        None => (String::new(), String::new()),
                    };
                    match self.deps.keys.add(&key, &label) {
                        Ok(added) => {
                            info!(fingerprint = %added.fingerprint(), label = %label, "Paired new client key");
                            self.deps
                                .audit
                                .connection("-", &label, "pairing completed");
                            self.out
                                .envelope(
                                    MessageType::PairResponse,
                                    &PairResponsePayload {
                                        success: true,
                                        certificate_fingerprint: self
                                            .deps
                                            .certificate_fingerprint
                                            .clone(),
                                        message: None,
                                    },
                                )
                                .await;
                        }
                        Err(err) => {
                            warn!(error = %err, "Could not persist paired key");
                            self.out
                                .envelope(
                                    MessageType::PairResponse,
                                    &PairResponsePayload {
                                        success: false,
                                        certificate_fingerprint: None,
                                        message: Some("could not store the key".to_string()),
                                    },
                                )
                                .await;
                        }
                    }
                } else {
                    self.pending_pair = None;
                    self.out
                        .envelope(
                            MessageType::PairResponse,
                            &PairResponsePayload {
                                success: false,
                                certificate_fingerprint: None,
                                message: Some("invalid or expired code".to_string()),
                            },
                        )
                        .await;
                }

                self.advance(PhaseInput::PairResolved);
                // Either way the client reconnects with a real auth flow.
                Flow::Close("pairing resolved")
            }
            _ => self.out_of_phase_fatal().await,
        }
    }

    // ---- awaiting-auth-response -----------------------------------------

    async fn on_awaiting_auth_response(
        &mut self,
        env: Envelope,
        shell_rx: &mut Option<mpsc::Receiver<ShellEvent>>,
    ) -> Flow {
        match env.message_type {
            MessageType::AuthResponse => {
                let Ok(response) = env.decode_payload::<AuthResponsePayload>() else {
                    return self.payload_mismatch().await;
                };

                let verified = match (&self.client_key, &self.pending_challenge) {
                    (Some(key), Some(challenge)) => BASE64
                        .decode(response.signature.trim())
                        .ok()
                        .and_then(|sig| verify_challenge_signature(key, challenge, &sig).ok())
                        .unwrap_or(false),
                    _ => false,
                };
                // The challenge is single-use either way.
                self.pending_challenge = None;

                if !verified {
                    info!("Signature verification failed");
                    self.out
                        .envelope(
                            MessageType::AuthResult,
                            &AuthResultPayload {
                                success: false,
                                session_token: None,
                            },
                        )
                        .await;
                    self.advance(PhaseInput::Rejected);
                    return Flow::Close("signature verification failed");
                }

                let session_id = Uuid::new_v4().to_string();
                self.out
                    .envelope(
                        MessageType::AuthResult,
                        &AuthResultPayload {
                            success: true,
                            session_token: Some(session_id.clone()),
                        },
                    )
                    .await;

                let shell_config = {
                    let config = self.deps.config.read().await;
                    ShellConfig {
                        shell: config.shell.clone(),
                        rows: 24,
                        cols: 80,
                    }
                };

                match ShellSession::spawn(&shell_config) {
                    Ok((session, rx)) => {
                        self.session_id = Some(session_id.clone());
                        self.shell = Some(session);
                        *shell_rx = Some(rx);
                        self.advance(PhaseInput::Authenticated);

                        info!(session = %session_id, label = %self.client_label, "Session open");
                        self.deps
                            .audit
                            .connection(&session_id, &self.client_label, "established");

                        // settingsSync is the first server-initiated frame
                        // after a successful auth result.
                        self.send_settings_sync().await;
                        Flow::Continue
                    }
                    Err(err) => {
                        warn!(error = %err, "Shell session failed to start");
                        self.out
                            .envelope(
                                MessageType::Error,
                                &ErrorPayload::fatal(codes::SHELL_FAILED, "could not start shell"),
                            )
                            .await;
                        self.advance(PhaseInput::Rejected);
                        Flow::Close("shell failed")
                    }
                }
            }
            _ => self.out_of_phase_fatal().await,
        }
    }

    // ---- open ------------------------------------------------------------

    async fn on_open(&mut self, env: Envelope) -> Flow {
        match env.message_type {
            MessageType::TerminalInput => {
                // Prefer the typed payload; fall back to the raw envelope
                // payload for clients that skip the JSON wrapper.
                let bytes = match env.decode_payload::<TerminalInputPayload>() {
                    Ok(input) => input.data.into_bytes(),
                    Err(_) => match env.payload_bytes() {
                        Ok(raw) => raw,
                        Err(_) => return self.payload_mismatch().await,
                    },
                };
                self.write_to_shell(&bytes).await;
                Flow::Continue
            }
            MessageType::TerminalResize => {
                let Ok(resize) = env.decode_payload::<TerminalResizePayload>() else {
                    return self.payload_mismatch().await;
                };
                if let Some(shell) = &self.shell {
                    if let Err(err) = shell.resize(resize.rows, resize.cols) {
                        warn!(error = %err, "Resize failed");
                    }
                }
                Flow::Continue
            }
            MessageType::SudoConfirmResponse => {
                let Ok(response) = env.decode_payload::<SudoConfirmResponsePayload>() else {
                    return self.payload_mismatch().await;
                };
                self.on_sudo_confirm_response(response).await;
                Flow::Continue
            }
            MessageType::SudoPassword => {
                let Ok(password) = env.decode_payload::<SudoPasswordPayload>() else {
                    return self.payload_mismatch().await;
                };
                self.on_sudo_password(password).await;
                Flow::Continue
            }
            MessageType::SettingsUpdate => {
                let Ok(update) = env.decode_payload::<SettingsUpdatePayload>() else {
                    return self.payload_mismatch().await;
                };
                self.on_settings_update(update).await;
                Flow::Continue
            }
            MessageType::RegisterPushToken => {
                if let Ok(token) = env.decode_payload::<RegisterPushTokenPayload>() {
                    debug!(platform = ?token.platform, "Push token registered");
                    self.push_tokens.push(token);
                }
                Flow::Continue
            }
            MessageType::Ping => {
                self.out.empty(MessageType::Pong).await;
                Flow::Continue
            }
            MessageType::Pong | MessageType::Error => Flow::Continue,
            MessageType::Disconnect => {
                self.advance(PhaseInput::DisconnectRequested);
                Flow::Close("client disconnect")
            }
            _ => {
                self.out
                    .envelope(
                        MessageType::Error,
                        &ErrorPayload::recoverable(
                            codes::OUT_OF_PHASE,
                            &format!("unexpected message in {}", phase_name(self.phase.state())),
                        ),
                    )
                    .await;
                Flow::Continue
            }
        }
    }

    /// Binary frames in the open phase are raw terminal input.
    async fn handle_binary(&mut self, bytes: &[u8]) {
        if self.state() == PhaseState::Open {
            self.write_to_shell(bytes).await;
        }
    }

    async fn write_to_shell(&mut self, bytes: &[u8]) {
        if let Some(shell) = &self.shell {
            if let Err(err) = shell.write_input(bytes) {
                warn!(error = %err, "Shell write failed");
            }
        }

        for event in self.tracker.push_bytes(bytes) {
            match event {
                LineEvent::Committed(command) => {
                    if let Some(session_id) = &self.session_id {
                        self.deps
                            .audit
                            .command(session_id, &self.client_label, &command);
                    }
                    self.finish_running_command().await;
                    self.running = Some(RunningCommand {
                        command,
                        started_at: Instant::now(),
                        started_wall: chrono::Utc::now(),
                        notified: false,
                    });
                }
                LineEvent::Cleared => {
                    self.finish_running_command().await;
                }
            }
        }
    }

    async fn handle_shell_output(&mut self, chunk: &[u8]) {
        let sudo_interception = {
            let config = self.deps.config.read().await;
            config.enable_sudo_interception
        };

        // The confirm request must precede the output frame that carries
        // the prompt text.
        if sudo_interception
            && self.pending_sudo.is_none()
            && shellyd_pty::contains_sudo_prompt(chunk)
        {
            let id = Uuid::new_v4().to_string();
            let command = self
                .running
                .as_ref()
                .map(|rc| rc.command.clone())
                .unwrap_or_else(|| self.tracker.pending());

            debug!(request = %id, command = %command, "Sudo prompt detected");
            self.out
                .envelope(
                    MessageType::SudoConfirmRequest,
                    &SudoConfirmRequestPayload {
                        id: id.clone(),
                        command,
                    },
                )
                .await;
            self.pending_sudo = Some(PendingSudo {
                id,
                approved: false,
            });
        }

        self.out
            .envelope(
                MessageType::TerminalOutput,
                &TerminalOutputPayload {
                    data: BASE64.encode(chunk),
                },
            )
            .await;

        if self.suppress_output_audit {
            // The echo line following a password write never reaches the
            // audit log.
            if chunk.contains(&b'\n') {
                self.suppress_output_audit = false;
            }
        } else if let Some(session_id) = &self.session_id {
            self.deps
                .audit
                .output(session_id, &self.client_label, chunk);
        }
    }

    async fn on_sudo_confirm_response(&mut self, response: SudoConfirmResponsePayload) {
        let Some(pending) = &mut self.pending_sudo else {
            debug!("Sudo response without a pending request");
            return;
        };
        if pending.id != response.id {
            debug!(got = %response.id, want = %pending.id, "Sudo response id mismatch");
            return;
        }

        if response.approved {
            pending.approved = true;
        } else {
            // Denial cancels the prompting command with end-of-text.
            if let Some(shell) = &self.shell {
                if let Err(err) = shell.write_input(&[0x03]) {
                    warn!(error = %err, "Could not cancel sudo prompt");
                }
            }
            self.pending_sudo = None;
        }
    }

    async fn on_sudo_password(&mut self, payload: SudoPasswordPayload) {
        if let Some(pending) = &self.pending_sudo {
            if !pending.approved {
                debug!(request = %pending.id, "Password frame before explicit approval");
            }
        }
        if let Some(shell) = &self.shell {
            let mut line = payload.password.into_bytes();
            line.push(b'\n');
            if let Err(err) = shell.write_input(&line) {
                warn!(error = %err, "Password write failed");
            }
        }
        self.suppress_output_audit = true;
        self.pending_sudo = None;
    }

    async fn on_settings_update(&mut self, update: SettingsUpdatePayload) {
        let result = {
            let mut config = self.deps.config.write().await;
            match settings::apply(&mut config, &update.setting, &update.value) {
                Ok(applied) => {
                    if let Err(err) = config.save(&self.deps.paths) {
                        warn!(error = %err, "Could not persist settings update");
                    }
                    Ok(applied)
                }
                Err(err) => Err(err),
            }
        };

        let confirm = match result {
            Ok(applied) => {
                info!(setting = %update.setting, "Applied settings update");
                SettingsConfirmPayload {
                    setting: update.setting,
                    success: true,
                    reconnect_required: applied.reconnect_required,
                }
            }
            Err(err) => {
                warn!(error = %err, "Settings update rejected");
                SettingsConfirmPayload {
                    setting: update.setting,
                    success: false,
                    reconnect_required: false,
                }
            }
        };

        self.out
            .envelope(MessageType::SettingsConfirm, &confirm)
            .await;
    }

    async fn send_settings_sync(&mut self) {
        let settings = {
            let config = self.deps.config.read().await;
            serde_json::to_value(&*config).unwrap_or(serde_json::Value::Null)
        };
        self.out
            .envelope(MessageType::SettingsSync, &SettingsSyncPayload { settings })
            .await;
    }

    async fn finish_running_command(&mut self) {
        if let Some(rc) = self.running.take() {
            if rc.notified {
                self.out
                    .envelope(
                        MessageType::CommandComplete,
                        &CommandCompletePayload {
                            command: rc.command,
                        },
                    )
                    .await;
            }
        }
    }

    async fn tick(&mut self) {
        let should_notify = self
            .running
            .as_ref()
            .map(|rc| !rc.notified && rc.started_at.elapsed() >= LONG_RUNNING_AFTER)
            .unwrap_or(false);

        if should_notify {
            if let Some(rc) = &mut self.running {
                rc.notified = true;
                let payload = LongRunningCommandPayload {
                    command: rc.command.clone(),
                    started_at: rc.started_wall,
                };
                self.out
                    .envelope(MessageType::LongRunningCommand, &payload)
                    .await;
            }
        }
    }

    async fn note_shell_exit(&mut self) {
        self.advance(PhaseInput::ShellExited);
        self.finish_running_command().await;
    }

    async fn payload_mismatch(&mut self) -> Flow {
        self.out
            .envelope(
                MessageType::Error,
                &ErrorPayload::recoverable(codes::PAYLOAD_MISMATCH, "payload did not match type"),
            )
            .await;
        Flow::Continue
    }

    async fn out_of_phase_fatal(&mut self) -> Flow {
        self.out
            .envelope(
                MessageType::Error,
                &ErrorPayload::fatal(
                    codes::OUT_OF_PHASE,
                    &format!("unexpected message in {}", phase_name(self.phase.state())),
                ),
            )
            .await;
        self.advance(PhaseInput::Rejected);
        Flow::Close("out-of-phase message")
    }

    async fn teardown(&mut self, cause: &str) {
        if self.state() != PhaseState::Closing {
            self.advance(PhaseInput::TransportFailed);
        }

        if let Some(session_id) = &self.session_id {
            self.deps.audit.connection(
                session_id,
                &self.client_label,
                &format!("terminated: {}", cause),
            );
        }

        if let Some(shell) = self.shell.take() {
            let _ = tokio::task::spawn_blocking(move || shell.shutdown()).await;
        }

        self.out.close(cause).await;
        debug!(cause, "Connection torn down");
    }
}
