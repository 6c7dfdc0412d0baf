//! The bidirectional transport and its lifecycle.
//!
//! A transport owns one CLI child process and the three streams attached to
//! it. Three long-lived workers move bytes:
//!
//! - **inbound** reads stdout, classifies each record, runs the user message
//!   handler, offers the record to the broadcast sink, and routes control
//!   traffic (requests to the dispatcher, responses to the correlator);
//! - **outbound** drains the bounded outbound channel to stdin, one record
//!   per write, flushing after each;
//! - **stderr** drains stderr into a diagnostic buffer.
//!
//! A fourth short-lived task monitors the child and publishes its exit
//! status. The lifecycle is driven by the [`StateCell`] atomic; `is_closing`
//! is a separate flag every worker loop reads so shutdown becomes visible
//! without depending on state loads alone.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use agentlink::transport::{AgentTransport, SessionOptions};
//! use agentlink::envelope::InboundRecord;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = AgentTransport::new(
//!     "/work/project",
//!     Duration::from_secs(30),
//!     "/usr/local/bin/agent-cli",
//!     None,
//! )?;
//!
//! let handler = Arc::new(|record: InboundRecord| async move {
//!     println!("{record:?}");
//! });
//!
//! transport
//!     .start_session(Some("hello"), SessionOptions::default(), handler)
//!     .await?;
//! transport.wait_for_completion(Duration::from_secs(60)).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::control::dispatch::ControlDispatcher;
use crate::control::messages::{
    ControlResponsePayload, OutboundControlRequest, control_request_record,
    control_response_record, user_message_record,
};
use crate::control::pending::PendingRequests;
use crate::envelope::{InboundRecord, parse_record};
use crate::error::AgentLinkError;
use crate::framer::{RecordReader, write_record};
use crate::hooks::HookRegistry;
use crate::permissions::PermissionPolicy;

mod env;
mod launcher;
mod options;
mod sink;
mod state;

pub use env::{build_child_env, SAFE_ENV_VARS};
pub use launcher::{CommandLauncher, LaunchSpec, ProcessLauncher};
pub use options::SessionOptions;
pub use sink::{MessageIterator, MessageReceiver, MessageSink, OverflowPolicy};
pub use state::{StateCell, TransportState};

/// Window given to the outbound worker to flush pending records on close.
const OUTBOUND_FLUSH_WINDOW: Duration = Duration::from_millis(100);

/// Receives every regular conversation message, in arrival order
///
/// Any async function taking an [`InboundRecord`] works via the blanket
/// implementation.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called on the inbound worker for each regular message, before the
    /// record is offered to the broadcast sink.
    async fn on_record(&self, record: InboundRecord);
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(InboundRecord) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn on_record(&self, record: InboundRecord) {
        self(record).await
    }
}

/// Per-session resources, owned by the transport and released once on close
struct SessionHandles {
    outbound_tx: mpsc::Sender<String>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    sink: MessageSink,
    receiver: Option<MessageReceiver>,
    child_pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    workers: Vec<JoinHandle<()>>,
    session_id: Option<String>,
    shutdown_grace: Duration,
}

/// Bidirectional control-protocol transport over a CLI child process
///
/// The transport exclusively owns the child, its three streams, the outbound
/// channel producer, and all worker tasks. One transport drives exactly one
/// session: after `close` it is `Closed` and cannot be restarted.
pub struct AgentTransport {
    working_dir: PathBuf,
    default_timeout: Duration,
    cli_path: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
    registry: Arc<HookRegistry>,
    policy: StdMutex<Option<Arc<dyn PermissionPolicy>>>,
    dispatcher: StdMutex<Option<Arc<ControlDispatcher>>>,
    state: Arc<StateCell>,
    is_closing: Arc<AtomicBool>,
    pending: PendingRequests,
    session: StdMutex<Option<SessionHandles>>,
    session_error: Arc<StdMutex<Option<AgentLinkError>>>,
    exit_rx: StdMutex<Option<watch::Receiver<Option<ExitStatus>>>>,
    stderr_buffer: Arc<Mutex<String>>,
}

impl std::fmt::Debug for AgentTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTransport")
            .field("working_dir", &self.working_dir)
            .field("cli_path", &self.cli_path)
            .finish_non_exhaustive()
    }
}

impl AgentTransport {
    /// Create a transport.
    ///
    /// `working_dir` and `default_timeout` are required: an empty path or a
    /// zero timeout is rejected. `launcher` defaults to [`CommandLauncher`];
    /// pass a sandbox or container launcher to change how the child is
    /// spawned without touching anything else.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        default_timeout: Duration,
        cli_path: impl Into<PathBuf>,
        launcher: Option<Arc<dyn ProcessLauncher>>,
    ) -> Result<Self, AgentLinkError> {
        let working_dir = working_dir.into();
        if working_dir.as_os_str().is_empty() {
            return Err(AgentLinkError::IllegalState(
                "working_dir must not be empty".to_string(),
            ));
        }
        if default_timeout.is_zero() {
            return Err(AgentLinkError::IllegalState(
                "default_timeout must be positive".to_string(),
            ));
        }

        Ok(Self {
            working_dir,
            default_timeout,
            cli_path: cli_path.into(),
            launcher: launcher.unwrap_or_else(|| Arc::new(CommandLauncher)),
            registry: Arc::new(HookRegistry::new()),
            policy: StdMutex::new(None),
            dispatcher: StdMutex::new(None),
            state: Arc::new(StateCell::new()),
            is_closing: Arc::new(AtomicBool::new(false)),
            pending: PendingRequests::new(),
            session: StdMutex::new(None),
            session_error: Arc::new(StdMutex::new(None)),
            exit_rx: StdMutex::new(None),
            stderr_buffer: Arc::new(Mutex::new(String::new())),
        })
    }

    /// The hook registry advertised to the CLI at initialize time.
    pub fn hook_registry(&self) -> Arc<HookRegistry> {
        self.registry.clone()
    }

    /// Install the tool-permission policy. Without one, every tool is
    /// allowed.
    pub fn set_permission_policy(&self, policy: Arc<dyn PermissionPolicy>) {
        *self.policy.lock().expect("policy poisoned") = Some(policy);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransportState {
        self.state.load()
    }

    /// Whether the session is live: state `Connected` and the child has not
    /// exited.
    pub fn is_running(&self) -> bool {
        if self.state.load() != TransportState::Connected {
            return false;
        }
        let guard = self.exit_rx.lock().expect("exit slot poisoned");
        match guard.as_ref() {
            Some(rx) => rx.borrow().is_none(),
            None => false,
        }
    }

    /// The recorded worker-internal error, if any.
    pub fn session_error(&self) -> Option<String> {
        self.session_error
            .lock()
            .expect("session error poisoned")
            .as_ref()
            .map(|e| e.to_string())
    }

    /// Server info from an incoming `initialize` payload, if the CLI sent
    /// one. Purely opportunistic; never required for correctness.
    pub fn server_info(&self) -> Option<Value> {
        self.dispatcher
            .lock()
            .expect("dispatcher poisoned")
            .as_ref()
            .and_then(|d| d.server_info())
    }

    /// Start the session: spawn the child through the launcher, attach the
    /// workers, and move `Disconnected -> Connecting -> Connected`.
    ///
    /// With `initial_prompt` set, the prompt is enqueued as a user message
    /// right after the transition to `Connected`. A `None` prompt is allowed
    /// so a caller can make an `initialize` request the first record
    /// instead.
    pub async fn start_session(
        &self,
        initial_prompt: Option<&str>,
        options: SessionOptions,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), AgentLinkError> {
        if !self
            .state
            .transition(TransportState::Disconnected, TransportState::Connecting)
        {
            return Err(match self.state.load() {
                TransportState::Closed | TransportState::Closing => AgentLinkError::IllegalState(
                    "transport is closed and cannot be reused".to_string(),
                ),
                other => AgentLinkError::IllegalState(format!(
                    "session already started (state: {other})"
                )),
            });
        }

        match self.start_session_inner(initial_prompt, options, handler).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Launch failed: record it and revert to Disconnected
                *self.session_error.lock().expect("session error poisoned") =
                    Some(AgentLinkError::ProcessLaunch(e.to_string()));
                self.state
                    .transition(TransportState::Connecting, TransportState::Disconnected);
                Err(e)
            }
        }
    }

    async fn start_session_inner(
        &self,
        initial_prompt: Option<&str>,
        options: SessionOptions,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), AgentLinkError> {
        let env = build_child_env(&options.env);
        let mut spec = LaunchSpec {
            program: self.cli_path.clone(),
            args: options.cli_args(),
            cwd: self.working_dir.clone(),
            env,
        };
        if let Some(user) = &options.user {
            spec = spec.with_user(user);
        }

        let mut child = tokio::time::timeout(self.default_timeout, self.launcher.launch(spec))
            .await
            .map_err(|_| {
                AgentLinkError::ProcessLaunch(format!(
                    "launch timed out after {:?}",
                    self.default_timeout
                ))
            })??;

        let child_pid = child.id();
        debug!(pid = ?child_pid, "CLI child spawned");

        let stdin = child.stdin.take().ok_or_else(|| {
            AgentLinkError::ProcessLaunch("failed to capture stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AgentLinkError::ProcessLaunch("failed to capture stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            AgentLinkError::ProcessLaunch("failed to capture stderr".to_string())
        })?;

        let dispatcher = Arc::new(ControlDispatcher::new(
            self.registry.clone(),
            self.policy.lock().expect("policy poisoned").clone(),
        ));
        *self.dispatcher.lock().expect("dispatcher poisoned") = Some(dispatcher.clone());

        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(options.outbound_capacity);
        let (sink, receiver) = sink::channel(options.sink_capacity, options.overflow_policy);
        let stdin = Arc::new(Mutex::new(Some(stdin)));
        let (exit_tx, exit_rx) = watch::channel::<Option<ExitStatus>>(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        let mut workers = Vec::with_capacity(4);
        workers.push(self.spawn_inbound_worker(
            stdout,
            options.max_record_len,
            handler,
            sink.clone(),
            dispatcher,
            outbound_tx.clone(),
        ));
        workers.push(self.spawn_outbound_worker(outbound_rx, stdin.clone()));
        workers.push(Self::spawn_stderr_worker(stderr, self.stderr_buffer.clone()));
        workers.push(Self::spawn_monitor_worker(
            child,
            kill_rx,
            exit_tx,
            self.session_error.clone(),
        ));

        *self.exit_rx.lock().expect("exit slot poisoned") = Some(exit_rx);
        *self.session.lock().expect("session poisoned") = Some(SessionHandles {
            outbound_tx,
            stdin,
            sink,
            receiver: Some(receiver),
            child_pid,
            kill_tx: Some(kill_tx),
            workers,
            session_id: options.session_id.clone(),
            shutdown_grace: options.shutdown_grace,
        });

        if !self
            .state
            .transition(TransportState::Connecting, TransportState::Connected)
        {
            return Err(AgentLinkError::IllegalState(
                "transport closed during startup".to_string(),
            ));
        }
        debug!("session connected");

        if let Some(prompt) = initial_prompt {
            self.send_user_message(prompt, options.session_id.as_deref())?;
        }

        Ok(())
    }

    fn spawn_inbound_worker(
        &self,
        stdout: tokio::process::ChildStdout,
        max_record_len: usize,
        handler: Arc<dyn MessageHandler>,
        sink: MessageSink,
        dispatcher: Arc<ControlDispatcher>,
        outbound_tx: mpsc::Sender<String>,
    ) -> JoinHandle<()> {
        let is_closing = self.is_closing.clone();
        let pending = self.pending.clone();
        let session_error = self.session_error.clone();

        tokio::spawn(async move {
            let mut reader = RecordReader::new(stdout, max_record_len);
            debug!("inbound worker started");

            loop {
                if is_closing.load(Ordering::SeqCst) {
                    break;
                }
                let line = match reader.next_record().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("stdout closed");
                        break;
                    }
                    Err(AgentLinkError::MessageParse { reason, .. }) => {
                        // Oversized record; already drained, keep reading
                        warn!(reason = %reason, "dropping inbound record");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "fatal inbound read error");
                        *session_error.lock().expect("session error poisoned") = Some(e);
                        break;
                    }
                };

                let record = match parse_record(&line) {
                    Ok(record) => record,
                    Err(e) => {
                        // Malformed records never terminate the session
                        warn!(error = %e, "dropping malformed inbound record");
                        continue;
                    }
                };

                // Handler first, then the sink: deterministic ordering
                if matches!(record, InboundRecord::Regular(_)) {
                    handler.on_record(record.clone()).await;
                }
                sink.publish(record.clone()).await;

                match record {
                    InboundRecord::ControlResponse(payload) => {
                        let request_id = payload.request_id().to_string();
                        if !pending.complete(&request_id, payload).await {
                            debug!(request_id = %request_id, "response for unknown or expired request");
                        }
                    }
                    InboundRecord::ControlRequest(envelope) => {
                        let response = dispatcher.dispatch(envelope).await;
                        let record = control_response_record(&response).to_string();
                        if outbound_tx.send(record).await.is_err() {
                            error!("outbound channel closed, dropping control response");
                        }
                    }
                    InboundRecord::Regular(_) => {}
                }
            }

            sink.close();
            debug!("inbound worker finished");
        })
    }

    fn spawn_outbound_worker(
        &self,
        mut outbound_rx: mpsc::Receiver<String>,
        stdin: Arc<Mutex<Option<ChildStdin>>>,
    ) -> JoinHandle<()> {
        let session_error = self.session_error.clone();

        tokio::spawn(async move {
            debug!("outbound worker started");
            while let Some(record) = outbound_rx.recv().await {
                let mut guard = stdin.lock().await;
                let Some(writer) = guard.as_mut() else {
                    debug!("stdin released, outbound worker stopping");
                    break;
                };
                if let Err(e) = write_record(writer, &record).await {
                    error!(error = %e, "failed to write outbound record");
                    *session_error.lock().expect("session error poisoned") = Some(e);
                    break;
                }
            }
            debug!("outbound worker finished");
        })
    }

    fn spawn_stderr_worker(
        stderr: tokio::process::ChildStderr,
        buffer: Arc<Mutex<String>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let mut lines = BufReader::new(stderr).lines();
            debug!("stderr worker started");
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("CLI stderr: {line}");
                let mut buf = buffer.lock().await;
                buf.push_str(&line);
                buf.push('\n');
            }
            debug!("stderr worker finished");
        })
    }

    fn spawn_monitor_worker(
        mut child: tokio::process::Child,
        kill_rx: oneshot::Receiver<()>,
        exit_tx: watch::Sender<Option<ExitStatus>>,
        session_error: Arc<StdMutex<Option<AgentLinkError>>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    debug!("forceful kill requested");
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            match status {
                Ok(status) => {
                    debug!(?status, "child exited");
                    let _ = exit_tx.send(Some(status));
                }
                Err(e) => {
                    error!(error = %e, "failed to reap child");
                    *session_error.lock().expect("session error poisoned") =
                        Some(AgentLinkError::Io(e));
                    let _ = exit_tx.send(None);
                }
            }
        })
    }

    fn ensure_connected(&self) -> Result<(), AgentLinkError> {
        match self.state.load() {
            TransportState::Connected => Ok(()),
            TransportState::Closing | TransportState::Closed => {
                Err(AgentLinkError::TransportClosed)
            }
            other => Err(AgentLinkError::IllegalState(format!(
                "not connected (state: {other})"
            ))),
        }
    }

    /// Enqueue one serialized record for the outbound worker.
    ///
    /// Non-blocking: a full or closed channel surfaces as `EmitFailure`.
    fn enqueue(&self, record: String) -> Result<(), AgentLinkError> {
        let tx = {
            let guard = self.session.lock().expect("session poisoned");
            guard
                .as_ref()
                .map(|h| h.outbound_tx.clone())
                .ok_or(AgentLinkError::TransportClosed)?
        };
        tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AgentLinkError::EmitFailure("outbound channel full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AgentLinkError::EmitFailure("outbound channel closed".to_string())
            }
        })
    }

    /// Enqueue a user message.
    ///
    /// `session_id` falls back to the session default, then `"default"`.
    pub fn send_user_message(
        &self,
        content: &str,
        session_id: Option<&str>,
    ) -> Result<(), AgentLinkError> {
        self.ensure_connected()?;
        let session_default = {
            let guard = self.session.lock().expect("session poisoned");
            guard.as_ref().and_then(|h| h.session_id.clone())
        };
        let sid = session_id.map(str::to_string).or(session_default);
        self.enqueue(user_message_record(content, sid.as_deref()).to_string())
    }

    /// Enqueue a control response.
    pub fn send_response(&self, payload: &ControlResponsePayload) -> Result<(), AgentLinkError> {
        self.ensure_connected()?;
        self.enqueue(control_response_record(payload).to_string())
    }

    /// Escape hatch: enqueue a raw JSON record as-is.
    pub fn send_message(&self, record: &Value) -> Result<(), AgentLinkError> {
        self.ensure_connected()?;
        self.enqueue(record.to_string())
    }

    /// Send a control request and await its response body.
    ///
    /// The correlation entry is removed on completion, timeout, or session
    /// close, whichever fires first. `timeout` defaults to the transport's
    /// default timeout.
    pub async fn send_control_request(
        &self,
        request: OutboundControlRequest,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, AgentLinkError> {
        self.ensure_connected()?;

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx).await;

        let record = control_request_record(&request_id, &request).to_string();
        if let Err(e) = self.enqueue(record) {
            self.pending.cancel(&request_id).await;
            return Err(e);
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ControlResponsePayload::Success { response, .. })) => Ok(response),
            Ok(Ok(ControlResponsePayload::Error { error, .. })) => {
                Err(AgentLinkError::ControlError(error))
            }
            Ok(Err(_)) => Err(AgentLinkError::TransportClosed),
            Err(_) => {
                self.pending.cancel(&request_id).await;
                Err(AgentLinkError::RequestTimeout { request_id })
            }
        }
    }

    /// Advertise the hook configuration with an `initialize` request.
    pub async fn initialize(&self) -> Result<Option<Value>, AgentLinkError> {
        let request = OutboundControlRequest::Initialize {
            hooks: self.registry.build_hook_config(),
        };
        self.send_control_request(request, None).await
    }

    /// Ask the CLI to cooperatively stop the current turn.
    pub async fn request_interrupt(&self) -> Result<(), AgentLinkError> {
        self.send_control_request(OutboundControlRequest::Interrupt, None)
            .await
            .map(|_| ())
    }

    /// Change the permission mode mid-session.
    pub async fn set_permission_mode(&self, mode: &str) -> Result<(), AgentLinkError> {
        self.send_control_request(
            OutboundControlRequest::SetPermissionMode {
                mode: mode.to_string(),
            },
            None,
        )
        .await
        .map(|_| ())
    }

    /// Switch the active model mid-session.
    pub async fn set_model(&self, model: &str) -> Result<(), AgentLinkError> {
        self.send_control_request(
            OutboundControlRequest::SetModel {
                model: model.to_string(),
            },
            None,
        )
        .await
        .map(|_| ())
    }

    /// Take the broadcast-sink consumer. Available once per session.
    pub fn receive_messages(&self) -> Result<MessageReceiver, AgentLinkError> {
        let mut guard = self.session.lock().expect("session poisoned");
        let handles = guard.as_mut().ok_or_else(|| {
            AgentLinkError::IllegalState("session not started".to_string())
        })?;
        handles.receiver.take().ok_or_else(|| {
            AgentLinkError::IllegalState("message receiver already taken".to_string())
        })
    }

    /// Blocking iterator over inbound records.
    ///
    /// Drive it from a plain thread; each `next()` parks the caller until a
    /// record arrives or the session ends.
    pub fn message_iterator(&self) -> Result<MessageIterator, AgentLinkError> {
        let receiver = self.receive_messages()?;
        Ok(receiver.into_iterator(tokio::runtime::Handle::current()))
    }

    /// Wait for the child to exit.
    ///
    /// Returns `Ok(false)` on timeout without touching the child. A recorded
    /// session error is returned first; a non-zero exit surfaces as
    /// [`AgentLinkError::ProcessExit`] with captured stderr.
    pub async fn wait_for_completion(&self, timeout: Duration) -> Result<bool, AgentLinkError> {
        if let Some(err) = self
            .session_error
            .lock()
            .expect("session error poisoned")
            .take()
        {
            return Err(err);
        }

        let mut rx = {
            let guard = self.exit_rx.lock().expect("exit slot poisoned");
            guard.as_ref().cloned().ok_or_else(|| {
                AgentLinkError::IllegalState("session not started".to_string())
            })?
        };

        let status = tokio::time::timeout(timeout, async {
            loop {
                if let Some(status) = *rx.borrow() {
                    return Ok(status);
                }
                if rx.changed().await.is_err() {
                    return Err(AgentLinkError::TransportClosed);
                }
            }
        })
        .await;

        match status {
            Err(_) => Ok(false),
            Ok(Err(e)) => Err(e),
            Ok(Ok(status)) if status.success() => Ok(true),
            Ok(Ok(status)) => {
                let stderr = self.stderr_buffer.lock().await.clone();
                Err(AgentLinkError::ProcessExit {
                    code: status.code().unwrap_or(-1),
                    stderr,
                })
            }
        }
    }

    /// Move to `Closing` and ask the child to terminate.
    ///
    /// This is the lifecycle-level stop; for the cooperative in-band stop of
    /// the current turn use [`request_interrupt`](Self::request_interrupt).
    pub async fn interrupt(&self) -> Result<(), AgentLinkError> {
        if self.state.load() == TransportState::Closed {
            return Err(AgentLinkError::TransportClosed);
        }
        self.is_closing.store(true, Ordering::SeqCst);
        self.state.begin_close();
        let pid = {
            let guard = self.session.lock().expect("session poisoned");
            guard.as_ref().and_then(|h| h.child_pid)
        };
        terminate_graceful(pid);
        Ok(())
    }

    /// Shut down with the session's configured grace period (default 5 s).
    pub async fn close(&self) -> Result<(), AgentLinkError> {
        let grace = {
            let guard = self.session.lock().expect("session poisoned");
            guard
                .as_ref()
                .map(|h| h.shutdown_grace)
                .unwrap_or(options::DEFAULT_SHUTDOWN_GRACE)
        };
        self.close_gracefully(grace).await
    }

    /// Shut down, waiting up to `grace` for the child before a forceful
    /// kill. Idempotent: after the first call the state is `Closed` and
    /// subsequent calls are no-ops.
    pub async fn close_gracefully(&self, grace: Duration) -> Result<(), AgentLinkError> {
        if self.state.load() == TransportState::Closed {
            return Ok(());
        }

        // 1. Make shutdown visible to every worker loop
        self.is_closing.store(true, Ordering::SeqCst);
        // 2. State to Closing (no-op if a concurrent close got there first)
        self.state.begin_close();

        let handles = self.session.lock().expect("session poisoned").take();
        if let Some(mut handles) = handles {
            debug!("closing session");

            // 3. Complete the outbound sink; the worker drains what is left
            drop(handles.outbound_tx);
            // 4. Bounded flush window for pending outbound records
            tokio::time::sleep(OUTBOUND_FLUSH_WINDOW).await;
            // 5. Complete the broadcast sink
            handles.sink.close();

            // 6. Close stdin so the child sees EOF
            {
                let mut guard = handles.stdin.lock().await;
                if let Some(mut stdin) = guard.take() {
                    let _ = stdin.shutdown().await;
                }
            }

            // 7. Graceful terminate, escalating on expiry
            terminate_graceful(handles.child_pid);
            if !self.await_exit(grace).await {
                warn!("graceful termination expired, killing child");
                if let Some(kill_tx) = handles.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
                terminate_forceful(handles.child_pid);
                self.await_exit(Duration::from_secs(1)).await;
            }

            for worker in handles.workers.drain(..) {
                worker.abort();
            }
        }

        self.pending.drain().await;

        // 8. Terminal state
        self.state.finish_close();
        debug!("transport closed");
        Ok(())
    }

    async fn await_exit(&self, timeout: Duration) -> bool {
        let rx = {
            let guard = self.exit_rx.lock().expect("exit slot poisoned");
            guard.as_ref().cloned()
        };
        let Some(mut rx) = rx else { return true };

        tokio::time::timeout(timeout, async {
            loop {
                if rx.borrow().is_some() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }
}

/// Ask the child to exit: SIGTERM on unix, nothing elsewhere (the monitor
/// task's kill path covers forceful termination cross-platform).
fn terminate_graceful(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        debug!(pid, "sending SIGTERM");
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill the child outright: SIGKILL on unix.
fn terminate_forceful(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        warn!(pid, "sending SIGKILL");
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_handler() -> Arc<dyn MessageHandler> {
        Arc::new(|_record: InboundRecord| async move {})
    }

    fn transport() -> AgentTransport {
        AgentTransport::new(
            std::env::temp_dir(),
            Duration::from_secs(5),
            "agent-cli",
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_constructor_rejects_empty_working_dir() {
        let result = AgentTransport::new("", Duration::from_secs(5), "cli", None);
        assert!(matches!(
            result.unwrap_err(),
            AgentLinkError::IllegalState(_)
        ));
    }

    #[test]
    fn test_constructor_rejects_zero_timeout() {
        let result = AgentTransport::new("/tmp", Duration::ZERO, "cli", None);
        assert!(matches!(
            result.unwrap_err(),
            AgentLinkError::IllegalState(_)
        ));
    }

    #[test]
    fn test_initial_state() {
        let t = transport();
        assert_eq!(t.state(), TransportState::Disconnected);
        assert!(!t.is_running());
        assert!(t.session_error().is_none());
        assert!(t.server_info().is_none());
    }

    #[test]
    fn test_send_before_start_is_illegal_state() {
        let t = transport();
        assert!(matches!(
            t.send_user_message("hi", None).unwrap_err(),
            AgentLinkError::IllegalState(_)
        ));
        assert!(matches!(
            t.send_message(&json!({"type": "user"})).unwrap_err(),
            AgentLinkError::IllegalState(_)
        ));
    }

    #[tokio::test]
    async fn test_receive_before_start_is_illegal_state() {
        let t = transport();
        assert!(matches!(
            t.receive_messages().unwrap_err(),
            AgentLinkError::IllegalState(_)
        ));
    }

    #[tokio::test]
    async fn test_close_unstarted_transport() {
        let t = transport();
        t.close().await.unwrap();
        assert_eq!(t.state(), TransportState::Closed);
        // Idempotent
        t.close().await.unwrap();
        assert_eq!(t.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_start_after_close_fails() {
        let t = transport();
        t.close().await.unwrap();
        let err = t
            .start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentLinkError::IllegalState(_)));
    }

    #[tokio::test]
    async fn test_send_after_close_is_transport_closed() {
        let t = transport();
        t.close().await.unwrap();
        assert!(matches!(
            t.send_user_message("hi", None).unwrap_err(),
            AgentLinkError::TransportClosed
        ));
    }

    #[tokio::test]
    async fn test_launch_failure_reverts_to_disconnected() {
        let t = AgentTransport::new(
            std::env::temp_dir(),
            Duration::from_secs(5),
            "/nonexistent/agentlink-cli",
            None,
        )
        .unwrap();

        let err = t
            .start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentLinkError::ProcessLaunch(_)));
        assert_eq!(t.state(), TransportState::Disconnected);
        assert!(t.session_error().is_some());
    }

    // A launcher that ignores the launch spec and runs `cat`: everything
    // written to stdin comes straight back on stdout, which exercises the
    // full record path without a real CLI.
    #[cfg(unix)]
    struct CatLauncher;

    #[cfg(unix)]
    #[async_trait]
    impl ProcessLauncher for CatLauncher {
        async fn launch(&self, _spec: LaunchSpec) -> Result<tokio::process::Child, AgentLinkError> {
            tokio::process::Command::new("/bin/cat")
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| AgentLinkError::ProcessLaunch(e.to_string()))
        }
    }

    #[cfg(unix)]
    fn cat_transport() -> AgentTransport {
        AgentTransport::new(
            std::env::temp_dir(),
            Duration::from_secs(5),
            "cat",
            Some(Arc::new(CatLauncher)),
        )
        .unwrap()
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_echo_session_roundtrip_fifo() {
        let t = cat_transport();
        t.start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap();
        assert_eq!(t.state(), TransportState::Connected);
        assert!(t.is_running());

        let mut rx = t.receive_messages().unwrap();
        t.send_user_message("first", Some("s1")).unwrap();
        t.send_user_message("second", Some("s1")).unwrap();

        // cat echoes the records back in write order
        for expected in ["first", "second"] {
            match rx.recv().await.unwrap() {
                InboundRecord::Regular(value) => {
                    assert_eq!(value["message"]["content"], expected);
                    assert_eq!(value["session_id"], "s1");
                }
                other => panic!("unexpected record: {other:?}"),
            }
        }

        t.close().await.unwrap();
        assert_eq!(t.state(), TransportState::Closed);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_handler_sees_regular_messages() {
        use std::sync::atomic::AtomicUsize;

        let t = cat_transport();
        let seen = Arc::new(AtomicUsize::new(0));
        let handler = {
            let seen = seen.clone();
            Arc::new(move |_record: InboundRecord| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        t.start_session(Some("hello"), SessionOptions::default(), handler)
            .await
            .unwrap();

        let mut rx = t.receive_messages().unwrap();
        // The initial prompt comes back through cat
        let record = rx.recv().await.unwrap();
        assert!(matches!(record, InboundRecord::Regular(_)));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        t.close().await.unwrap();
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_graceful_close_terminates_child() {
        let t = cat_transport();
        t.start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap();
        assert!(t.is_running());

        t.close().await.unwrap();
        assert!(!t.is_running());
        assert_eq!(t.state(), TransportState::Closed);
        assert!(matches!(
            t.send_user_message("late", None).unwrap_err(),
            AgentLinkError::TransportClosed
        ));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_wait_for_completion_timeout_leaves_child_running() {
        let t = cat_transport();
        t.start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap();

        let done = t
            .wait_for_completion(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!done);
        assert!(t.is_running());
        t.close().await.unwrap();
    }

    // A launcher whose child exits immediately with a fixed code.
    #[cfg(unix)]
    struct ExitLauncher(i32);

    #[cfg(unix)]
    #[async_trait]
    impl ProcessLauncher for ExitLauncher {
        async fn launch(&self, _spec: LaunchSpec) -> Result<tokio::process::Child, AgentLinkError> {
            tokio::process::Command::new("/bin/sh")
                .arg("-c")
                .arg(format!("exit {}", self.0))
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| AgentLinkError::ProcessLaunch(e.to_string()))
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_wait_for_completion_clean_exit() {
        let t = AgentTransport::new(
            std::env::temp_dir(),
            Duration::from_secs(5),
            "exit0",
            Some(Arc::new(ExitLauncher(0))),
        )
        .unwrap();
        t.start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap();

        let done = t.wait_for_completion(Duration::from_secs(2)).await.unwrap();
        assert!(done);
        assert!(!t.is_running());
        t.close().await.unwrap();
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_wait_for_completion_nonzero_exit() {
        let t = AgentTransport::new(
            std::env::temp_dir(),
            Duration::from_secs(5),
            "exit3",
            Some(Arc::new(ExitLauncher(3))),
        )
        .unwrap();
        t.start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap();

        match t.wait_for_completion(Duration::from_secs(2)).await {
            Err(AgentLinkError::ProcessExit { code, .. }) => assert_eq!(code, 3),
            other => panic!("expected ProcessExit: {other:?}"),
        }
        t.close().await.unwrap();
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_control_request_roundtrip_through_echo() {
        let t = cat_transport();
        t.start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap();

        // cat echoes our control_request back at us; the dispatcher
        // acknowledges the unknown subtype, the ack is echoed again, and the
        // correlator completes our own request with it. One request, one
        // response, correlation map empty afterwards.
        let response = t
            .send_control_request(
                OutboundControlRequest::Interrupt,
                Some(Duration::from_secs(2)),
            )
            .await
            .unwrap();
        assert_eq!(response, Some(json!({})));
        assert!(t.pending.is_empty().await);

        t.close().await.unwrap();
    }

    // A launcher whose child swallows stdin and never writes: for exercising
    // timeouts.
    #[cfg(unix)]
    struct SilentLauncher;

    #[cfg(unix)]
    #[async_trait]
    impl ProcessLauncher for SilentLauncher {
        async fn launch(&self, _spec: LaunchSpec) -> Result<tokio::process::Child, AgentLinkError> {
            tokio::process::Command::new("/bin/sh")
                .arg("-c")
                .arg("cat > /dev/null")
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| AgentLinkError::ProcessLaunch(e.to_string()))
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_control_request_timeout_cleans_correlation() {
        let t = AgentTransport::new(
            std::env::temp_dir(),
            Duration::from_secs(5),
            "silent",
            Some(Arc::new(SilentLauncher)),
        )
        .unwrap();
        t.start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap();

        let err = t
            .send_control_request(
                OutboundControlRequest::Interrupt,
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentLinkError::RequestTimeout { .. }));
        assert!(t.pending.is_empty().await);

        t.close().await.unwrap();
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_malformed_record_not_fatal() {
        let t = cat_transport();
        t.start_session(None, SessionOptions::default(), noop_handler())
            .await
            .unwrap();

        let mut rx = t.receive_messages().unwrap();
        // Raw non-JSON line: dropped by the inbound worker
        t.send_message(&json!("not an object")).ok();
        t.enqueue("not json".to_string()).unwrap();
        t.send_user_message("still alive", None).unwrap();

        // The well-formed record after the garbage still arrives
        loop {
            match rx.recv().await.unwrap() {
                InboundRecord::Regular(value)
                    if value["message"]["content"] == "still alive" =>
                {
                    break;
                }
                _ => continue,
            }
        }
        assert!(t.session_error().is_none());
        assert!(t.is_running());
        t.close().await.unwrap();
    }
}
