use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{AsyncMessage, Client, Connection, NoTls, Socket};

use crate::pg::connection::PgConfig;
use crate::pg::error::{Error, Result};
use crate::pg::listener::backoff::{BackoffConfig, ExponentialBackoff};
use crate::pg::listener::event::{ChannelEvent, ChannelState, Notification};
use crate::pg::logging::Logger;

/// Notifications buffered between the connection and the event loop
pub const NOTIFICATION_BUFFER: usize = 32;

type Handler = Arc<dyn Fn(Notification) + Send + Sync>;
type EventHook = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// `None` marks a reconnection.
type Inbound = Option<Notification>;

/// Opens a connection and returns the client plus the future driving it.
/// The driver resolves with the reason the connection ended.
type Connector = Arc<
    dyn Fn() -> BoxFuture<'static, std::result::Result<(Client, BoxFuture<'static, String>), tokio_postgres::Error>>
        + Send
        + Sync,
>;

/// Tuning for a [`NotificationChannel`]
#[derive(Clone)]
pub struct ChannelOptions {
    pub min_reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
    /// Quiet period after which the event loop pings the connection
    pub idle_timeout: Duration,
    pub ping_timeout: Duration,
    on_event: Option<EventHook>,
    logger: Logger,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            min_reconnect_interval: Duration::from_secs(5),
            max_reconnect_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(5 * 60),
            ping_timeout: Duration::from_secs(10),
            on_event: None,
            logger: Logger::global(),
        }
    }
}

impl ChannelOptions {
    pub fn with_reconnect_interval(mut self, min: Duration, max: Duration) -> Self {
        self.min_reconnect_interval = min;
        self.max_reconnect_interval = max.max(min);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_ping_timeout(mut self, ping_timeout: Duration) -> Self {
        self.ping_timeout = ping_timeout;
        self
    }

    /// Observe connection lifecycle events. The hook runs on the supervisor
    /// task and must not block.
    pub fn on_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(hook));
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.min_reconnect_interval,
            max_delay: self.max_reconnect_interval,
            ..BackoffConfig::default()
        }
    }
}

impl fmt::Debug for ChannelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelOptions")
            .field("min_reconnect_interval", &self.min_reconnect_interval)
            .field("max_reconnect_interval", &self.max_reconnect_interval)
            .field("idle_timeout", &self.idle_timeout)
            .field("ping_timeout", &self.ping_timeout)
            .field("on_event", &self.on_event.as_ref().map(|_| "hook"))
            .field("logger", &self.logger)
            .finish()
    }
}

/// The live connection, with a way to ask the supervisor to drop it
#[derive(Clone)]
struct Link {
    client: Arc<Client>,
    drop_request: Arc<Notify>,
}

struct Shared {
    handlers: Mutex<HashMap<String, Handler>>,
    link: Mutex<Option<Link>>,
    state: watch::Sender<ChannelState>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    options: ChannelOptions,
    target: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(options: ChannelOptions, target: String) -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            link: Mutex::new(None),
            state: watch::channel(ChannelState::Connecting).0,
            shutdown: watch::channel(false).0,
            closed: AtomicBool::new(false),
            options,
            target,
        }
    }

    fn logger(&self) -> &Logger {
        &self.options.logger
    }

    fn emit(&self, event: ChannelEvent) {
        self.logger().in_scope(|| {
            if event.is_attempt_failure() {
                tracing::error!(target_db = %self.target, event = %event, "Notification channel event");
            } else {
                tracing::info!(target_db = %self.target, event = %event, "Notification channel event");
            }
        });
        if let Some(hook) = &self.options.on_event {
            hook(&event);
        }
    }

    /// Publish a new state. Closed is final.
    fn set_state(&self, state: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == ChannelState::Closed || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn link(&self) -> Option<Link> {
        lock(&self.link).clone()
    }

    fn set_link(&self, link: Option<Link>) {
        *lock(&self.link) = link;
    }

    fn handler(&self, channel: &str) -> Option<Handler> {
        lock(&self.handlers).get(channel).cloned()
    }

    fn channel_names(&self) -> Vec<String> {
        lock(&self.handlers).keys().cloned().collect()
    }

    /// Flag the channel closed and tell both tasks to stop. False when it
    /// was already closed.
    fn shut_down(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.send_replace(ChannelState::Closed);
        self.shutdown.send_replace(true);
        true
    }

    async fn wait_connected(&self) -> Result<Link> {
        let mut state = self.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ChannelState::Closed => return Err(Error::ChannelClosed),
                ChannelState::Connected => {
                    if let Some(link) = self.link() {
                        return Ok(link);
                    }
                }
                _ => {}
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::ChannelClosed);
            }
            if state.changed().await.is_err() {
                return Err(Error::ChannelClosed);
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed);
        }
        let link = self.link().ok_or(Error::NotConnected)?;

        let outcome = tokio::time::timeout(self.options.ping_timeout, link.client.simple_query("SELECT 1")).await;
        match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => {
                link.drop_request.notify_one();
                Err(err.into())
            }
            Err(_) => {
                link.drop_request.notify_one();
                Err(Error::Timeout("ping"))
            }
        }
    }
}

/// A dedicated connection subscribed to named `LISTEN` channels
///
/// The connection is supervised in the background: when it drops, the
/// channel reconnects with exponential backoff and re-subscribes every
/// registered name, so handlers keep receiving without being registered
/// again. Notifications sent while disconnected are lost.
///
/// Handlers run one at a time on a single event loop task shared by all
/// channel names; a slow handler delays every later notification.
///
/// # Example
///
/// ```no_run
/// use pgaccess::pg::NotificationChannel;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let channel = NotificationChannel::open("order-worker").await?;
///     channel
///         .listen("orders", |n| println!("{}: {}", n.channel, n.payload))
///         .await?;
///
///     tokio::signal::ctrl_c().await?;
///     channel.close()?;
///     Ok(())
/// }
/// ```
pub struct NotificationChannel {
    shared: Arc<Shared>,
    /// Taken by the event loop when the first subscription succeeds
    inbound: Mutex<Option<mpsc::Receiver<Inbound>>>,
}

impl NotificationChannel {
    /// Open a channel using the environment configuration (see
    /// [`PgConfig::from_env`]).
    pub async fn open(application_name: &str) -> Result<Self> {
        let config = PgConfig::from_env(application_name)?;
        Self::open_with(config, ChannelOptions::default()).await
    }

    /// Open a channel with an explicit configuration, without TLS.
    pub async fn open_with(config: PgConfig, options: ChannelOptions) -> Result<Self> {
        Self::open_with_tls(config, options, NoTls).await
    }

    /// Open a channel with an explicit configuration and TLS connector.
    ///
    /// Returns once the first connection attempt has resolved: with the
    /// channel on success, or with the attempt's error (leaving nothing
    /// running in the background).
    pub async fn open_with_tls<T>(config: PgConfig, options: ChannelOptions, tls: T) -> Result<Self>
    where
        T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
        T::Stream: Sync + Send,
        T::TlsConnect: Sync + Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let (inbound_tx, inbound_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let connector = connector(config.to_pg_config(), tls, inbound_tx.clone());

        let shared = Arc::new(Shared::new(options, format!("{}/{}", config.host, config.database)));

        let (first_tx, first_rx) = oneshot::channel();
        tokio::spawn(
            shared
                .logger()
                .attach(supervise(shared.clone(), connector, first_tx, inbound_tx)),
        );

        match first_rx.await {
            Ok(Ok(())) => Ok(Self {
                shared,
                inbound: Mutex::new(Some(inbound_rx)),
            }),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(Error::ChannelClosed),
        }
    }

    /// Subscribe `handler` to `name`.
    ///
    /// Only one handler per name; a second one returns
    /// [`Error::ChannelAlreadyOpen`]. While the connection is down the call
    /// waits for the next connection. Any other subscribe failure closes the
    /// whole channel.
    pub async fn listen<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        {
            let mut handlers = lock(&self.shared.handlers);
            if handlers.contains_key(name) {
                return Err(Error::ChannelAlreadyOpen(name.to_string()));
            }
            handlers.insert(name.to_string(), Arc::new(handler));
        }

        let link = match self.shared.wait_connected().await {
            Ok(link) => link,
            Err(err) => {
                lock(&self.shared.handlers).remove(name);
                return Err(err);
            }
        };

        match link.client.batch_execute(&format!("LISTEN {}", quote_ident(name))).await {
            Ok(()) => {}
            // Lost between the wait and the LISTEN: the reconnect re-subscribes it.
            Err(err) if err.is_closed() => {}
            Err(err) => {
                lock(&self.shared.handlers).remove(name);
                self.shut_down();
                return Err(err.into());
            }
        }

        self.start_event_loop();
        self.shared.logger().in_scope(|| {
            tracing::info!(target_db = %self.shared.target, channel = %name, "Listening")
        });
        Ok(())
    }

    /// Drop the handler for `name` and stop listening on it.
    pub async fn unlisten(&self, name: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        if lock(&self.shared.handlers).remove(name).is_none() {
            return Ok(());
        }
        let Some(link) = self.shared.link() else {
            return Ok(());
        };
        match link.client.batch_execute(&format!("UNLISTEN {}", quote_ident(name))).await {
            Err(err) if !err.is_closed() => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Check the connection answers. A failed or timed out check makes the
    /// channel reconnect.
    pub async fn ping(&self) -> Result<()> {
        self.shared.ping().await
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Names with a registered handler
    pub fn channels(&self) -> Vec<String> {
        self.shared.channel_names()
    }

    /// Stop both background tasks and close the connection. A second call
    /// returns [`Error::ChannelClosed`].
    pub fn close(&self) -> Result<()> {
        if self.shut_down() {
            Ok(())
        } else {
            Err(Error::ChannelClosed)
        }
    }

    fn shut_down(&self) -> bool {
        let first = self.shared.shut_down();
        if first {
            self.shared.logger().in_scope(|| {
                tracing::info!(target_db = %self.shared.target, "Notification channel closed")
            });
        }
        first
    }

    fn start_event_loop(&self) {
        let Some(inbound) = lock(&self.inbound).take() else {
            return;
        };

        let dispatch = {
            let shared = self.shared.clone();
            move |notification: Notification| match shared.handler(&notification.channel) {
                Some(handler) => handler(notification),
                None => tracing::warn!(
                    channel = %notification.channel,
                    "Notification for a channel without a handler"
                ),
            }
        };
        let on_idle = {
            let shared = self.shared.clone();
            move || {
                let shared = shared.clone();
                tokio::spawn(shared.logger().clone().attach(async move {
                    match shared.ping().await {
                        Ok(()) => tracing::debug!(target_db = %shared.target, "Idle ping succeeded"),
                        Err(err) => tracing::warn!(target_db = %shared.target, error = %err, "Idle ping failed"),
                    }
                }));
            }
        };

        tokio::spawn(self.shared.logger().attach(run_event_loop(
            inbound,
            dispatch,
            self.shared.options.idle_timeout,
            self.shared.shutdown.subscribe(),
            on_idle,
        )));
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        // Both tasks observe the signal and exit on their own.
        self.shared.shut_down();
    }
}

impl fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("target", &self.shared.target)
            .field("state", &self.state())
            .field("channels", &self.channels())
            .finish()
    }
}

/// Deliver inbound notifications until shutdown, pinging after every idle
/// period. Any inbound message, reconnection markers included, restarts the
/// idle timer.
pub(crate) async fn run_event_loop<D, I>(
    mut inbound: mpsc::Receiver<Inbound>,
    mut dispatch: D,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut on_idle: I,
) where
    D: FnMut(Notification),
    I: FnMut(),
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            message = inbound.recv() => match message {
                Some(Some(notification)) => dispatch(notification),
                Some(None) => tracing::debug!("Reconnected, resuming delivery"),
                None => break,
            },
            _ = tokio::time::sleep(idle_timeout) => on_idle(),
        }
    }
}

/// Keep one connection alive until shutdown.
async fn supervise(
    shared: Arc<Shared>,
    connector: Connector,
    first: oneshot::Sender<std::result::Result<(), tokio_postgres::Error>>,
    inbound: mpsc::Sender<Inbound>,
) {
    let mut first = Some(first);
    let mut backoff = ExponentialBackoff::with_config(shared.options.backoff());
    let mut shutdown = shared.shutdown.subscribe();
    let mut reconnecting = false;

    'supervise: loop {
        shared.set_state(ChannelState::Connecting);
        let attempt = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break 'supervise,
            attempt = connector() => attempt,
        };

        let (client, driver) = match attempt {
            Ok(connected) => connected,
            Err(err) => {
                shared.emit(ChannelEvent::ConnectionAttemptFailed(err.to_string()));
                if let Some(first) = first.take() {
                    shared.shut_down();
                    let _ = first.send(Err(err));
                    break 'supervise;
                }
                if pause(backoff.next_delay(), &mut shutdown).await {
                    break 'supervise;
                }
                continue;
            }
        };

        let mut driver = tokio::spawn(shared.logger().attach(driver));
        let link = Link {
            client: Arc::new(client),
            drop_request: Arc::new(Notify::new()),
        };

        let names = shared.channel_names();
        let reason = match relisten(&link.client, &names).await {
            Err(err) => {
                driver.abort();
                format!("re-subscribing {:?}: {}", names, err)
            }
            Ok(()) => {
                backoff.reset();
                shared.set_link(Some(link.clone()));
                shared.set_state(ChannelState::Connected);
                if reconnecting {
                    let _ = inbound.try_send(None);
                    shared.emit(ChannelEvent::Reconnected);
                } else {
                    shared.emit(ChannelEvent::Connected);
                }
                if let Some(first) = first.take() {
                    let _ = first.send(Ok(()));
                }

                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => {
                        driver.abort();
                        break 'supervise;
                    }
                    _ = link.drop_request.notified() => {
                        driver.abort();
                        "liveness check failed".to_string()
                    }
                    ended = &mut driver => match ended {
                        Ok(reason) => reason,
                        Err(err) => err.to_string(),
                    },
                }
            }
        };

        reconnecting = true;
        shared.set_link(None);
        shared.set_state(ChannelState::Disconnected);
        shared.emit(ChannelEvent::Disconnected(reason));

        if pause(backoff.next_delay(), &mut shutdown).await {
            break 'supervise;
        }
    }

    shared.set_link(None);
    shared.set_state(ChannelState::Closed);
}

/// Sleep for `delay`; true when shutdown was requested meanwhile.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.wait_for(|stop| *stop) => true,
    }
}

async fn relisten(client: &Client, names: &[String]) -> std::result::Result<(), tokio_postgres::Error> {
    if names.is_empty() {
        return Ok(());
    }
    let batch: String = names
        .iter()
        .map(|name| format!("LISTEN {};", quote_ident(name)))
        .collect();
    client.batch_execute(&batch).await
}

fn connector<T>(config: tokio_postgres::Config, tls: T, inbound: mpsc::Sender<Inbound>) -> Connector
where
    T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
    T::Stream: Sync + Send,
    T::TlsConnect: Sync + Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    Arc::new(move || {
        let config = config.clone();
        let tls = tls.clone();
        let inbound = inbound.clone();
        async move {
            let (client, connection) = config.connect(tls).await?;
            Ok((client, drive(connection, inbound).boxed()))
        }
        .boxed()
    })
}

/// Poll the connection, forwarding notifications, until it ends.
async fn drive<S, T>(connection: Connection<S, T>, inbound: mpsc::Sender<Inbound>) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut connection = connection;
    let mut messages = Box::pin(stream::poll_fn(move |cx| connection.poll_message(cx)));

    while let Some(message) = messages.next().await {
        match message {
            Ok(AsyncMessage::Notification(notification)) => {
                if inbound.send(Some(notification.into())).await.is_err() {
                    return "notification receiver dropped".to_string();
                }
            }
            Ok(AsyncMessage::Notice(notice)) => {
                tracing::debug!(severity = notice.severity(), message = notice.message(), "Server notice")
            }
            Ok(_) => {}
            Err(err) => return err.to_string(),
        }
    }
    "connection closed".to_string()
}

/// Quote a channel name as an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::task::JoinHandle;

    fn notification(channel: &str, payload: &str) -> Notification {
        Notification {
            channel: channel.to_string(),
            payload: payload.to_string(),
            process_id: 1,
        }
    }

    struct Harness {
        inbound: mpsc::Sender<Inbound>,
        shutdown: watch::Sender<bool>,
        delivered: Arc<Mutex<Vec<Notification>>>,
        pings: Arc<AtomicUsize>,
        task: JoinHandle<()>,
    }

    fn start(idle: Duration) -> Harness {
        let (inbound, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let pings = Arc::new(AtomicUsize::new(0));

        let sink = delivered.clone();
        let counter = pings.clone();
        let task = tokio::spawn(run_event_loop(
            rx,
            move |n| sink.lock().unwrap().push(n),
            idle,
            shutdown_rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        Harness {
            inbound,
            shutdown,
            delivered,
            pings,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ping_after_full_interval() {
        let h = start(Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(h.pings.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.pings.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.pings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_resets_idle_timer() {
        let h = start(Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(240)).await;
        h.inbound.send(Some(notification("orders", "1"))).await.unwrap();

        tokio::time::sleep(Duration::from_secs(240)).await;
        assert_eq!(h.pings.load(Ordering::SeqCst), 0);
        assert_eq!(h.delivered.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnection_marker_is_not_delivered() {
        let h = start(Duration::from_secs(300));

        h.inbound.send(None).await.unwrap();
        h.inbound.send(Some(notification("orders", "a"))).await.unwrap();
        h.inbound.send(Some(notification("audit", "b"))).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let delivered = h.delivered.lock().unwrap().clone();
        assert_eq!(delivered, vec![notification("orders", "a"), notification("audit", "b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_loop_stops_on_shutdown() {
        let h = start(Duration::from_secs(300));
        h.shutdown.send_replace(true);
        h.task.await.unwrap();

        let h = start(Duration::from_secs(300));
        drop(h.inbound);
        h.task.await.unwrap();
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("Mixed Case"), "\"Mixed Case\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[tokio::test]
    async fn test_close_is_immediate_and_final() {
        let channel = NotificationChannel {
            shared: Arc::new(Shared::new(ChannelOptions::default(), "localhost/app".to_string())),
            inbound: Mutex::new(None),
        };
        assert_eq!(channel.state(), ChannelState::Connecting);

        channel.close().unwrap();
        assert!(channel.is_closed());
        assert_eq!(channel.state(), ChannelState::Closed);

        channel.shared.set_state(ChannelState::Connected);
        assert_eq!(channel.state(), ChannelState::Closed);

        assert!(matches!(channel.listen("orders", |_| {}).await, Err(Error::ChannelClosed)));
        assert!(matches!(channel.ping().await, Err(Error::ChannelClosed)));
        assert!(matches!(channel.close(), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_default_options() {
        let options = ChannelOptions::default();
        assert_eq!(options.min_reconnect_interval, Duration::from_secs(5));
        assert_eq!(options.max_reconnect_interval, Duration::from_secs(60));
        assert_eq!(options.idle_timeout, Duration::from_secs(300));

        let options = options.with_reconnect_interval(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(options.max_reconnect_interval, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_open_fails_when_server_unreachable() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let options = ChannelOptions::default()
            .on_event(move |event| seen.lock().unwrap().push(event.clone()));
        let config = PgConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };

        let result = NotificationChannel::open_with(config, options).await;

        assert!(matches!(result, Err(Error::DatabaseError(_))));
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_attempt_failure());
    }
}
