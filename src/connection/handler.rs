// src/connection/handler.rs

//! Defines the `ConnectionHandler`, the per-connection state machine that drives
//! the receive → process → reply loop for one session.

use super::context::ServiceContext;
use super::session::Session;
use crate::core::SessionError;
use crate::core::metrics;
use crate::core::protocol::{BoxMessageStream, Message};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// The lifecycle state of a connection driver.
///
/// `Created` is the initial state, `Ended` the unique terminal one. Everything in
/// between is the repeatable running cycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created = 0,
    Source = 1,
    SourceWait = 2,
    Process = 3,
    SinkWait = 4,
    EndSession = 5,
    Ended = 6,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => State::Created,
            1 => State::Source,
            2 => State::SourceWait,
            3 => State::Process,
            4 => State::SinkWait,
            5 => State::EndSession,
            _ => State::Ended,
        }
    }

    /// True for every state between `Created` and `Ended`.
    pub fn is_running(self) -> bool {
        !matches!(self, State::Created | State::Ended)
    }
}

/// A one-shot callback run when a driver reaches `State::Ended`.
pub type CleanupHook = Box<dyn FnOnce() + Send + 'static>;

/// The part of a driver that only the worker currently stepping it may touch.
struct DriverIo {
    stream: BoxMessageStream,
    in_message: Option<Message>,
}

/// Drives one session from accept to close.
///
/// A handler is shared between the connection registry and whichever worker or
/// executor continuation is stepping it, so it always lives behind an `Arc`.
pub struct ConnectionHandler {
    state: AtomicU8,
    sync: bool,
    context: Arc<ServiceContext>,
    session: Session,
    io: tokio::sync::Mutex<DriverIo>,
    kill: CancellationToken,
    cleanup_hook: parking_lot::Mutex<Option<CleanupHook>>,
}

impl ConnectionHandler {
    /// Builds a driver for `session`. Execution does not start until the first
    /// `run_next` or `schedule_next`.
    pub fn create(
        context: Arc<ServiceContext>,
        session: Session,
        stream: BoxMessageStream,
        sync: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(State::Created as u8),
            sync,
            context,
            session,
            io: tokio::sync::Mutex::new(DriverIo {
                stream,
                in_message: None,
            }),
            kill: CancellationToken::new(),
            cleanup_hook: parking_lot::Mutex::new(None),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_synchronous(&self) -> bool {
        self.sync
    }

    /// Installs the callback run once when this driver ends. Must be called
    /// before the driver is first run.
    pub fn set_cleanup_hook(&self, hook: CleanupHook) {
        debug_assert_eq!(self.state(), State::Created);
        *self.cleanup_hook.lock() = Some(hook);
    }

    /// Asks the driver to shut down. Safe to call from any thread, any number of
    /// times, including while a step is in progress; the driver reaches `Ended`
    /// on its current or next step.
    pub fn terminate(&self) {
        if self.state() == State::Ended || self.kill.is_cancelled() {
            return;
        }
        debug!("Terminating session {}.", self.session.id());
        metrics::SESSIONS_TERMINATED_TOTAL.inc();
        self.kill.cancel();
    }

    /// Posts one step of this driver to the configured executor and returns
    /// immediately. The step schedules its own continuation until the driver ends.
    pub fn schedule_next(self: &Arc<Self>) {
        let Some(executor) = self.context.executor.clone() else {
            error!(
                "Session {} asked to be scheduled but no service executor is configured.",
                self.session.id()
            );
            self.end_in_place();
            return;
        };

        let mut step = StepGuard {
            handler: Arc::clone(self),
            armed: true,
        };
        if let Err(e) = executor.schedule(Box::pin(async move {
            step.handler.run_next().await;
            step.armed = false;
        })) {
            warn!(
                "Could not schedule session {}: {}. Ending connection from {}.",
                self.session.id(),
                e,
                self.session.remote()
            );
            self.end_in_place();
        }
    }

    /// Runs one unit of work: read a request, process it and write the reply, or
    /// notice that the connection is gone.
    ///
    /// If another worker is stepping this driver right now, the call backs off
    /// instead of waiting for it.
    pub async fn run_next(self: &Arc<Self>) {
        match self.io.try_lock() {
            Ok(mut io) => self.run_next_in_guard(&mut io).await,
            Err(_) => {
                debug!(
                    "Session {} is owned by another worker, backing off.",
                    self.session.id()
                );
                if self.sync {
                    tokio::task::yield_now().await;
                }
            }
        }

        if !self.sync && self.state() != State::Ended {
            self.schedule_next();
        }
    }

    async fn run_next_in_guard(&self, io: &mut DriverIo) {
        let mut state = self.state();
        if state == State::Ended {
            return;
        }

        // First run of the driver.
        if state == State::Created {
            state = State::Source;
            self.set_state(state);
        }

        match state {
            State::Source => {
                self.set_state(State::SourceWait);
                let sourced = tokio::select! {
                    biased;
                    _ = self.kill.cancelled() => Err(SessionError::Terminated),
                    res = io.stream.source_message() => res,
                };
                self.source_callback(io, sourced);
                self.process_message(io).await;
            }
            State::Process => self.process_message(io).await,
            State::EndSession => {}
            State::SourceWait | State::SinkWait => {
                // Waits complete inside a single step; seeing one here means a
                // previous step was dropped mid-flight.
                warn!(
                    "Session {} found in {:?} at the start of a step, ending it.",
                    self.session.id(),
                    state
                );
                self.set_state(State::EndSession);
            }
            State::Created | State::Ended => return,
        }

        if self.state() == State::EndSession {
            self.cleanup_session();
        }
    }

    fn source_callback(&self, io: &mut DriverIo, sourced: Result<Option<Message>, SessionError>) {
        debug_assert_eq!(self.state(), State::SourceWait);
        let remote = self.session.remote();

        match sourced {
            Ok(Some(message)) => {
                io.in_message = Some(message);
                self.set_state(State::Process);
            }
            Ok(None) => {
                debug!("Session from {} closed by peer.", remote);
                self.set_state(State::EndSession);
            }
            Err(SessionError::Terminated) => {
                debug!(
                    "Session from {} was closed internally while waiting for a request.",
                    remote
                );
                self.set_state(State::EndSession);
            }
            Err(e) if e.is_normal_disconnect() => {
                debug!(
                    "Session from {} encountered a network error while waiting for a request: {}",
                    remote, e
                );
                self.set_state(State::EndSession);
            }
            Err(e) => {
                warn!(
                    "Error receiving request from client: {}. Ending connection from {} (connection id: {})",
                    e,
                    remote,
                    self.session.id()
                );
                self.set_state(State::EndSession);
            }
        }
    }

    async fn process_message(&self, io: &mut DriverIo) {
        // A failed source leaves nothing to process.
        if self.state() != State::Process {
            return;
        }
        let Some(request) = io.in_message.take() else {
            self.set_state(State::Source);
            return;
        };

        let timer = metrics::REQUEST_LATENCY_SECONDS.start_timer();
        let result = self
            .context
            .handler
            .handle_request(&self.session, request)
            .await;
        timer.observe_duration();
        metrics::REQUESTS_PROCESSED_TOTAL.inc();

        match result {
            Ok(Some(reply)) => {
                self.set_state(State::SinkWait);
                let sunk = tokio::select! {
                    biased;
                    _ = self.kill.cancelled() => Err(SessionError::Terminated),
                    res = io.stream.sink_message(reply) => res,
                };
                self.sink_callback(sunk);
            }
            Ok(None) => self.set_state(State::Source),
            Err(e) => {
                warn!(
                    "Error handling request, closing client connection {} (connection id: {}): {}",
                    self.session.remote(),
                    self.session.id(),
                    e
                );
                self.set_state(State::EndSession);
            }
        }
    }

    fn sink_callback(&self, sunk: Result<(), SessionError>) {
        debug_assert_eq!(self.state(), State::SinkWait);
        match sunk {
            Ok(()) => self.set_state(State::Source),
            Err(e) if e.is_normal_disconnect() => {
                debug!(
                    "Session from {} ended while sending a response: {}",
                    self.session.remote(),
                    e
                );
                self.set_state(State::EndSession);
            }
            Err(e) => {
                warn!(
                    "Error sending response to client: {}. Ending connection from {} (connection id: {})",
                    e,
                    self.session.remote(),
                    self.session.id()
                );
                self.set_state(State::EndSession);
            }
        }
    }

    /// Ends a driver that is not being stepped, e.g. because its executor refused
    /// to take it.
    fn end_in_place(&self) {
        if self.state() != State::Ended {
            self.cleanup_session();
        }
    }

    /// Moves the driver to `Ended` and fires the cleanup hook. The hook is taken
    /// out of its slot, so it runs at most once.
    fn cleanup_session(&self) {
        self.set_state(State::Ended);
        debug!("Session {} ended.", self.session.id());

        let hook = self.cleanup_hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Ends the driver if a scheduled step is dropped before it completes, e.g. when
/// the executor aborts its workers. No continuation would follow such a step.
struct StepGuard {
    handler: Arc<ConnectionHandler>,
    armed: bool,
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        if self.armed && self.handler.state() != State::Ended {
            debug!(
                "Step for session {} was dropped before completing, ending it.",
                self.handler.session.id()
            );
            self.handler.end_in_place();
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("Driver for session {} dropped.", self.session.id());
    }
}
