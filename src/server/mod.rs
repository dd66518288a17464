//! Server lifecycle: port binding, accept loops, staged shutdown, reset.

mod classifier;
mod handler;

pub use classifier::{classify, RequestTarget};

use crate::callback::{CallbackRegistry, LocalCallbackRegistry};
use crate::config::Settings;
use crate::dispatch::{Dispatcher, Forwarder, TemplateRegistry};
use crate::error::MockError;
use crate::event::{EventBus, ServerEvent};
use crate::journal::Journal;
use crate::scheduler::Scheduler;
use crate::store::ExpectationStore;
use handler::serve_request;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Explicit lifecycle state; `is_running` is true only in `Running`, so a
/// partially shut down server never reports as running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServerState {
    New,
    Running,
    Stopping,
    Stopped,
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ServerState::New as u8))
    }

    fn get(&self) -> ServerState {
        match self.0.load(Ordering::Acquire) {
            0 => ServerState::New,
            1 => ServerState::Running,
            2 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }

    fn set(&self, state: ServerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn begin_stop(&self) -> bool {
        self.0
            .compare_exchange(
                ServerState::Running as u8,
                ServerState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

struct ListenerHandle {
    port: u16,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Everything one server instance shares across connections.
pub struct ServerCore {
    pub settings: Settings,
    pub store: ExpectationStore,
    pub journal: Journal,
    pub dispatcher: Dispatcher,
    pub events: EventBus,
    state: StateCell,
    bound_ports: Arc<RwLock<Vec<u16>>>,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl ServerCore {
    fn new(settings: Settings) -> Self {
        let bound_ports = Arc::new(RwLock::new(Vec::new()));
        let scheduler = Arc::new(Scheduler::new(settings.scheduler_workers));
        let callbacks = Arc::new(CallbackRegistry::new(
            settings.max_callback_queue,
            settings.callback_response_timeout(),
        ));
        let forwarder = Forwarder::new(
            settings.socket_connection_timeout(),
            settings.max_response_time(),
            settings.forward_retries,
            Arc::clone(&bound_ports),
        );
        let dispatcher = Dispatcher::new(
            scheduler,
            callbacks,
            Arc::new(LocalCallbackRegistry::new()),
            Arc::new(TemplateRegistry::new()),
            forwarder,
            settings.max_response_time(),
        );
        Self {
            store: ExpectationStore::new(settings.max_expectations),
            journal: Journal::new(settings.max_log_entries),
            dispatcher,
            events: EventBus::new(),
            state: StateCell::new(),
            bound_ports,
            listeners: Mutex::new(Vec::new()),
            settings,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state.get() == ServerState::Running
    }

    /// Bound ports in bind order.
    pub fn local_ports(&self) -> Vec<u16> {
        self.bound_ports.read().clone()
    }

    /// First bound port, if any.
    pub fn local_port(&self) -> Option<u16> {
        self.bound_ports.read().first().copied()
    }

    /// Bind the requested ports and start serving them. Returns the ports
    /// actually bound, in the order requested.
    pub async fn bind_ports(self: &Arc<Self>, requested: &[u16]) -> Result<Vec<u16>, MockError> {
        if matches!(self.state.get(), ServerState::Stopping | ServerState::Stopped) {
            return Err(MockError::Stopped);
        }
        let bind_ip = self.settings.local_bound_ip.clone();
        let mut actual = Vec::with_capacity(requested.len());
        for &port in requested {
            let listener = TcpListener::bind((bind_ip.as_str(), port))
                .await
                .map_err(|e| MockError::PortBind {
                    port,
                    cause: e.to_string(),
                })?;
            let bound = listener
                .local_addr()
                .map(|addr| addr.port())
                .unwrap_or(port);

            let (shutdown_tx, _) = broadcast::channel(1);
            let handle = self.spawn_accept_loop(listener, bound, shutdown_tx.subscribe());
            self.listeners.lock().push(ListenerHandle {
                port: bound,
                shutdown_tx,
                handle,
            });
            self.bound_ports.write().push(bound);
            info!("listening on {bind_ip}:{bound}");
            actual.push(bound);
        }
        Ok(actual)
    }

    fn spawn_accept_loop(
        self: &Arc<Self>,
        listener: TcpListener,
        port: u16,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let core = Arc::clone(&core);
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let service = service_fn(move |req| {
                                        let core = Arc::clone(&core);
                                        async move { serve_request(core, req, addr).await }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .with_upgrades()
                                        .await
                                    {
                                        debug!("connection error on port {port}: {e}");
                                    }
                                });
                            }
                            Err(e) => {
                                error!("accept error on port {port}: {e}");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("listener on port {port} shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Staged shutdown: broadcast stop, close callback channels, shut the
    /// scheduler down, then drain listeners under the stop timeout. All
    /// bound ports are released before this returns. Idempotent.
    pub async fn stop(self: &Arc<Self>) {
        if !self.state.begin_stop() {
            if self.state.get() == ServerState::New {
                self.state.set(ServerState::Stopped);
            }
            return;
        }
        info!("stopping");

        self.events.publish(ServerEvent::Stop);
        self.dispatcher.callbacks.close_all();
        self.dispatcher.scheduler.shutdown();

        let handles: Vec<ListenerHandle> = self.listeners.lock().drain(..).collect();
        for listener in &handles {
            let _ = listener.shutdown_tx.send(());
        }
        let drain = async {
            for listener in handles {
                if listener.handle.await.is_err() {
                    debug!("listener task for port {} aborted", listener.port);
                }
            }
        };
        if tokio::time::timeout(self.settings.stop_timeout(), drain)
            .await
            .is_err()
        {
            error!("graceful shutdown timed out");
        }

        self.bound_ports.write().clear();
        self.state.set(ServerState::Stopped);
        info!("stopped");
    }

    /// Clear expectations, journal, and callback registrations. Ports stay
    /// bound. In-flight requests holding a pre-reset snapshot complete
    /// without affecting post-reset state.
    pub fn reset(&self) {
        self.events.publish(ServerEvent::Reset);
        self.store.reset();
        self.journal.clear(None);
        self.dispatcher.callbacks.close_all();
        info!("reset");
    }
}

/// Handle to a running mock server.
pub struct MockServer {
    core: Arc<ServerCore>,
}

impl MockServer {
    /// Validate settings, bind the configured ports, and start serving.
    pub async fn start(settings: Settings) -> Result<Self, MockError> {
        settings.validate()?;
        let ports = settings.ports.clone();
        let core = Arc::new(ServerCore::new(settings));
        core.bind_ports(&ports).await?;
        core.state.set(ServerState::Running);
        core.events.publish(ServerEvent::Started {
            ports: core.local_ports(),
        });
        Ok(Self { core })
    }

    pub fn core(&self) -> &Arc<ServerCore> {
        &self.core
    }

    pub fn local_ports(&self) -> Vec<u16> {
        self.core.local_ports()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.core.local_port()
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    pub fn state(&self) -> ServerState {
        self.core.state()
    }

    /// In-process callback registry for `ClassCallback` actions.
    pub fn local_callbacks(&self) -> &Arc<LocalCallbackRegistry> {
        &self.core.dispatcher.local_callbacks
    }

    /// Template evaluator registry for template responses.
    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.core.dispatcher.templates
    }

    pub async fn bind(&self, ports: &[u16]) -> Result<Vec<u16>, MockError> {
        self.core.bind_ports(ports).await
    }

    pub fn reset(&self) {
        self.core.reset();
    }

    pub async fn stop(&self) {
        self.core.stop().await;
    }

    pub fn events(&self) -> &EventBus {
        &self.core.events
    }
}
