//! Realtime WebSocket connection manager
//!
//! Owns one socket at a time. `connect` clears the mirror, opens the socket with
//! the subscription list in the URL, spawns the read loop and returns once the
//! initial table images have arrived. The read loop is the only writer of the
//! store; everything else reads through [`Snapshot`].

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use super::errors::{ExchangeError, ExchangeResult};
use super::messages::Command;
use super::signing::{build_auth_headers, Credentials, REALTIME_PATH};
use super::types::{ExecutionEvent, Symbol};
use crate::market_data::{
    tables, DataStore, HandlerStats, HandlerStatsSnapshot, MessageHandler, ReadinessGate, Snapshot,
    TableStore, MAX_TABLE_LEN,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const MAINNET_ENDPOINT: &str = "https://www.bitmex.com/api/v1";
pub const TESTNET_ENDPOINT: &str = "https://testnet.bitmex.com/api/v1";

/// Upper bound on waiting for the old read loop during a reconnect
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub connect_timeout: Duration,
    pub readiness_poll: Duration,
    /// Lifetime of the handshake signature
    pub auth_expiry: Duration,
    pub max_table_len: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            readiness_poll: Duration::from_millis(100),
            auth_expiry: Duration::from_secs(300),
            max_table_len: MAX_TABLE_LEN,
        }
    }
}

/// WebSocket connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Failed,
}

/// Internal control messages
#[derive(Debug)]
enum ControlMessage {
    Send(String),
    Shutdown,
}

/// Topics subscribed on connect, in subscription order
pub fn subscription_topics(symbol: &Symbol, should_authenticate: bool) -> Vec<String> {
    let mut topics = vec![
        format!("{}:{}", tables::QUOTE, symbol),
        format!("{}:{}", tables::TRADE, symbol),
        tables::INSTRUMENT.to_string(),
    ];

    if should_authenticate {
        topics.extend([
            format!("{}:{}", tables::ORDER, symbol),
            format!("{}:{}", tables::EXECUTION, symbol),
            format!("{}:{}", tables::ORDER_BOOK_10, symbol),
            tables::MARGIN.to_string(),
            tables::POSITION.to_string(),
        ]);
    }

    topics
}

/// Realtime URL for a REST `endpoint`: ws(s) scheme, `/realtime` path and the
/// comma-joined topics in the `subscribe` query
pub fn realtime_url(endpoint: &str, topics: &[String]) -> ExchangeResult<Url> {
    let mut url = Url::parse(endpoint)?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ExchangeError::InvalidEndpoint {
                details: format!("unsupported scheme {}", other),
            })
        }
    };
    url.set_scheme(scheme).map_err(|_| ExchangeError::InvalidEndpoint {
        details: format!("cannot use scheme {} for {}", scheme, endpoint),
    })?;
    url.set_path(REALTIME_PATH);
    url.set_query(Some(&format!("subscribe={}", topics.join(","))));

    Ok(url)
}

/// State shared between one connection's read loop and the manager
#[derive(Debug)]
struct ConnectionShared {
    status: RwLock<ConnectionStatus>,
    last_error: Mutex<Option<ExchangeError>>,
    exited: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ConnectionShared {
    fn new(status: ConnectionStatus) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            status: RwLock::new(status),
            last_error: Mutex::new(None),
            exited: AtomicBool::new(false),
            shutdown,
        }
    }

    /// A connection that was never opened
    fn idle() -> Self {
        let shared = Self::new(ConnectionStatus::Disconnected);
        shared.exited.store(true, Ordering::SeqCst);
        shared.shutdown.send_replace(true);
        shared
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
    }

    fn exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Mark the connection exited; true only for the first caller
    fn exit(&self) -> bool {
        let first = !self.exited.swap(true, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        first
    }

    /// Exit and move to `Closing` under the status lock, so a read loop that
    /// finishes concurrently always has the last word
    fn begin_close(&self) -> bool {
        let mut status = self.status.write();
        if !self.exit() {
            return false;
        }
        *status = ConnectionStatus::Closing;
        true
    }

    /// Record a fatal error and shut the connection down
    fn fail(&self, err: ExchangeError) {
        error!("{}", err);
        {
            let mut last_error = self.last_error.lock();
            if last_error.is_none() {
                *last_error = Some(err);
            }
        }
        self.exit();
        self.set_status(ConnectionStatus::Failed);
    }

    /// The read loop is gone
    fn finish(&self) {
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn last_error(&self) -> Option<ExchangeError> {
        self.last_error.lock().clone()
    }

    /// Error reported to a caller whose wait was cut short
    fn closed_error(&self) -> ExchangeError {
        self.last_error().unwrap_or(ExchangeError::TransportClosed)
    }

    /// Resolves once the connection has exited
    async fn closed(&self) {
        let mut receiver = self.shutdown.subscribe();
        let _ = receiver.wait_for(|exited| *exited).await;
    }
}

/// BitMEX realtime client keeping a local mirror of the subscribed tables
pub struct BitmexWebSocket {
    config: WebSocketConfig,
    credentials: Option<Credentials>,
    store: Arc<DataStore>,
    stats: Arc<HandlerStats>,
    shared: Mutex<Arc<ConnectionShared>>,
    control_sender: Mutex<Option<mpsc::UnboundedSender<ControlMessage>>>,
    websocket_task: Mutex<Option<JoinHandle<()>>>,
    execution_sender: mpsc::UnboundedSender<ExecutionEvent>,
    execution_receiver: Mutex<Option<mpsc::UnboundedReceiver<ExecutionEvent>>>,
}

impl BitmexWebSocket {
    pub fn new(config: WebSocketConfig, credentials: Option<Credentials>) -> Self {
        let (execution_sender, execution_receiver) = mpsc::unbounded_channel();

        Self {
            config,
            credentials,
            store: Arc::new(DataStore::new()),
            stats: Arc::new(HandlerStats::default()),
            shared: Mutex::new(Arc::new(ConnectionShared::idle())),
            control_sender: Mutex::new(None),
            websocket_task: Mutex::new(None),
            execution_sender,
            execution_receiver: Mutex::new(Some(execution_receiver)),
        }
    }

    /// Open a fresh connection and wait for the initial images.
    ///
    /// Any previous connection is closed and the mirror cleared first, so no
    /// state survives a reconnect. With `should_authenticate` the account
    /// tables are subscribed and awaited as well.
    pub async fn connect(&self, endpoint: &str, symbol: &Symbol, should_authenticate: bool) -> ExchangeResult<()> {
        if should_authenticate && self.credentials.is_none() {
            return Err(ExchangeError::Authentication {
                reason: "no API credentials configured".to_string(),
            });
        }
        if !symbol.validate() {
            return Err(ExchangeError::Malformed(format!("invalid symbol {:?}", symbol.as_str())));
        }

        self.teardown().await;
        self.store.clear();
        self.stats.reset();

        let shared = Arc::new(ConnectionShared::new(ConnectionStatus::Connecting));
        *self.shared.lock() = shared.clone();

        let topics = subscription_topics(symbol, should_authenticate);
        let request = match realtime_url(endpoint, &topics).and_then(|url| {
            info!("Connecting to {}", url);
            self.build_request(&url, should_authenticate)
        }) {
            Ok(request) => request,
            Err(e) => return Err(Self::abort_connect(&shared, e)),
        };

        let after = self.config.connect_timeout;
        let socket = tokio::select! {
            result = timeout(after, connect_async(request)) => match result {
                Ok(Ok((socket, _response))) => socket,
                Ok(Err(e)) => {
                    let cause = Some(e.to_string());
                    return Err(Self::abort_connect(&shared, ExchangeError::ConnectTimeout { after, cause }));
                }
                Err(_) => {
                    return Err(Self::abort_connect(&shared, ExchangeError::ConnectTimeout { after, cause: None }));
                }
            },
            _ = shared.closed() => {
                shared.finish();
                return Err(shared.closed_error());
            }
        };

        let (sink, stream) = socket.split();
        let (control_sender, control_receiver) = mpsc::unbounded_channel();
        *self.control_sender.lock() = Some(control_sender);
        shared.set_status(ConnectionStatus::Connected);

        let tables = TableStore::new(self.store.clone())
            .with_max_table_len(self.config.max_table_len)
            .with_executions(self.execution_sender.clone());
        let handler = MessageHandler::new(tables, self.stats.clone());
        let task = tokio::spawn(Self::start_websocket_task(
            sink,
            stream,
            handler,
            shared.clone(),
            control_receiver,
        ));
        *self.websocket_task.lock() = Some(task);

        info!("Connected to WS. Waiting for data images, this may take a moment...");
        let gate = self.readiness();
        Self::wait_while_open(&shared, gate.wait_for_market_data()).await?;
        if should_authenticate {
            Self::wait_while_open(&shared, gate.wait_for_account_data()).await?;
        }
        info!("Got all market data. Starting.");

        Ok(())
    }

    /// Stop the read loop and mark the connection exited. Safe to call repeatedly.
    pub fn close(&self) {
        let shared = self.shared.lock().clone();
        if !shared.begin_close() {
            return;
        }

        info!("Closing WebSocket");
        if let Some(sender) = self.control_sender.lock().take() {
            let _ = sender.send(ControlMessage::Shutdown);
        }

        let running = self
            .websocket_task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished());
        if !running {
            shared.finish();
        }
    }

    /// Send a raw `{op, args}` command over the live socket
    pub fn send_command(&self, op: &str, args: Vec<Value>) -> ExchangeResult<()> {
        self.send(Command::new(op, args))
    }

    pub fn subscribe(&self, topics: &[String]) -> ExchangeResult<()> {
        self.send(Command::subscribe(topics))
    }

    pub fn unsubscribe(&self, topics: &[String]) -> ExchangeResult<()> {
        self.send(Command::unsubscribe(topics))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().status()
    }

    pub fn is_connected(&self) -> bool {
        let shared = self.shared.lock();
        !shared.exited() && shared.status() == ConnectionStatus::Connected
    }

    /// Fatal error that ended the current connection, if any
    pub fn last_error(&self) -> Option<ExchangeError> {
        self.shared.lock().last_error()
    }

    /// Execution events from the order table. Handed out once.
    pub fn executions(&self) -> Option<mpsc::UnboundedReceiver<ExecutionEvent>> {
        self.execution_receiver.lock().take()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.store.clone())
    }

    pub fn readiness(&self) -> ReadinessGate {
        ReadinessGate::new(self.store.clone()).with_poll_interval(self.config.readiness_poll)
    }

    pub fn store(&self) -> Arc<DataStore> {
        self.store.clone()
    }

    pub fn stats(&self) -> HandlerStatsSnapshot {
        self.stats.snapshot()
    }

    fn send(&self, command: Command) -> ExchangeResult<()> {
        let json = command.to_json()?;
        if self.shared.lock().exited() {
            return Err(ExchangeError::NotConnected);
        }

        let sender = self.control_sender.lock();
        let sender = sender.as_ref().ok_or(ExchangeError::NotConnected)?;
        sender
            .send(ControlMessage::Send(json))
            .map_err(|_| ExchangeError::NotConnected)
    }

    fn build_request(&self, url: &Url, should_authenticate: bool) -> ExchangeResult<Request> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ExchangeError::InvalidEndpoint { details: e.to_string() })?;

        let credentials = if should_authenticate { self.credentials.as_ref() } else { None };
        if credentials.is_some() {
            info!("Authenticating with API Key.");
        }

        for (name, value) in build_auth_headers(credentials, self.config.auth_expiry)? {
            let value = HeaderValue::from_str(&value).map_err(|e| ExchangeError::Signing(e.to_string()))?;
            request.headers_mut().insert(HeaderName::from_static(name), value);
        }

        Ok(request)
    }

    /// Close the current connection and wait briefly for its read loop
    async fn teardown(&self) {
        self.close();

        let task = self.websocket_task.lock().take();
        if let Some(mut task) = task {
            match timeout(TEARDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Read loop ended abnormally: {}", e),
                Err(_) => {
                    warn!("Read loop did not stop in time, aborting");
                    task.abort();
                }
            }
        }
    }

    fn abort_connect(shared: &ConnectionShared, err: ExchangeError) -> ExchangeError {
        shared.fail(err.clone());
        shared.finish();
        err
    }

    async fn wait_while_open(shared: &ConnectionShared, ready: impl Future<Output = ()>) -> ExchangeResult<()> {
        tokio::select! {
            _ = ready => Ok(()),
            _ = shared.closed() => Err(shared.closed_error()),
        }
    }

    /// Read loop: the single writer of the mirror
    async fn start_websocket_task(
        mut sink: SplitSink<WsStream, Message>,
        mut stream: SplitStream<WsStream>,
        handler: MessageHandler,
        shared: Arc<ConnectionShared>,
        mut control_receiver: mpsc::UnboundedReceiver<ControlMessage>,
    ) {
        loop {
            tokio::select! {
                control = control_receiver.recv() => match control {
                    Some(ControlMessage::Send(text)) => {
                        debug!("Sending {}", text);
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            shared.fail(e.into());
                            break;
                        }
                    }
                    Some(ControlMessage::Shutdown) | None => {
                        debug!("Shutdown requested");
                        break;
                    }
                },
                // Covers a close that lands before the control sender is stored
                _ = shared.closed() => {
                    debug!("Connection exited");
                    break;
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let ControlFlow::Break(e) = handler.process(&text) {
                            shared.fail(e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Server closed the socket: {:?}", frame);
                        if !shared.exited() {
                            shared.fail(ExchangeError::TransportClosed);
                        }
                        break;
                    }
                    Some(Ok(other)) => debug!("Ignoring non-text frame: {:?}", other),
                    Some(Err(e)) => {
                        if !shared.exited() {
                            shared.fail(e.into());
                        }
                        break;
                    }
                    None => {
                        if !shared.exited() {
                            shared.fail(ExchangeError::TransportClosed);
                        }
                        break;
                    }
                },
            }
        }

        if let Err(e) = sink.close().await {
            debug!("Error closing socket: {}", e);
        }
        shared.exit();
        shared.finish();
        info!("Websocket closed.");
    }
}

impl Drop for BitmexWebSocket {
    fn drop(&mut self) {
        self.close();
    }
}
