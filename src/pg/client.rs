use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deadpool_postgres::{Object, Pool};
use tokio::task::JoinHandle;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{NoTls, Socket};

use crate::pg::{
    connection::{PgConfig, PoolSizing},
    context::Context,
    error::{Error, Result},
    logging::Logger,
    transaction::{canceller, detach, Canceller, Scope, Transaction},
};

const MAX_REAP_INTERVAL: Duration = Duration::from_secs(30);
const MIN_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshot of the pool's occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

/// Shared connection pool and transaction factory
///
/// Cloning is cheap; all clones share one pool.
#[derive(Clone)]
pub struct PgClient {
    inner: Arc<Inner>,
}

struct Inner {
    pool: Pool,
    config: PgConfig,
    canceller: Canceller,
    logger: Logger,
    reaper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PgClient {
    /// Connect using the environment configuration (see
    /// [`PgConfig::from_env`]), labelling every connection with
    /// `application_name`.
    ///
    /// Fails when the configuration is malformed or the initial ping fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pgaccess::pg::{Context, PgClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let ctx = Context::background();
    ///     let client = PgClient::connect(&ctx, "reporting").await?;
    ///     client.close()?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(ctx: &Context, application_name: &str) -> Result<Self> {
        let config = PgConfig::from_env(application_name)?;
        Self::connect_with(ctx, config, Logger::global()).await
    }

    /// Connect with an explicit configuration and logger, without TLS.
    pub async fn connect_with(ctx: &Context, config: PgConfig, logger: Logger) -> Result<Self> {
        Self::connect_with_tls(ctx, config, logger, NoTls).await
    }

    /// Connect with an explicit configuration, logger and TLS connector.
    pub async fn connect_with_tls<T>(ctx: &Context, config: PgConfig, logger: Logger, tls: T) -> Result<Self>
    where
        T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
        T::Stream: Sync + Send,
        T::TlsConnect: Sync + Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let pool = config.build_pool(tls.clone())?;
        let client = Self::assemble(pool, config, canceller(tls), logger);

        if let Err(err) = client.ping(ctx).await {
            client.inner.pool.close();
            client.inner.closed.store(true, Ordering::SeqCst);
            return Err(err);
        }

        if let Some(sizing) = client.inner.config.pool.clone() {
            let reaper = spawn_reaper(client.inner.pool.clone(), sizing, client.inner.logger.clone());
            if let Ok(mut slot) = client.inner.reaper.lock() {
                *slot = Some(reaper);
            }
        }

        let config = &client.inner.config;
        client.inner.logger.in_scope(|| {
            tracing::info!(
                host = %config.host,
                database = %config.database,
                max_size = config.max_pool_size(),
                "Connected"
            )
        });
        Ok(client)
    }

    fn assemble(pool: Pool, config: PgConfig, canceller: Canceller, logger: Logger) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                config,
                canceller,
                logger,
                reaper: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The configuration this client connected with
    pub fn config(&self) -> &PgConfig {
        &self.inner.config
    }

    /// Check that a pooled connection answers.
    pub async fn ping(&self, ctx: &Context) -> Result<()> {
        let conn = self.acquire(ctx).await?;
        let scope = Scope::new(
            ctx.clone(),
            conn.cancel_token(),
            self.inner.canceller.clone(),
            self.inner.logger.clone(),
        );
        if let Err(err) = scope.guard(conn.simple_query("SELECT 1")).await {
            detach(conn, &self.inner.logger);
            return Err(err);
        }
        Ok(())
    }

    /// Begin a transaction bound to `ctx`.
    ///
    /// Errors from acquiring a connection or from `BEGIN` are returned as is;
    /// nothing is retried.
    pub async fn begin(&self, ctx: &Context) -> Result<Transaction> {
        let conn = self.acquire(ctx).await?;
        Transaction::begin(
            conn,
            ctx.clone(),
            self.inner.canceller.clone(),
            self.inner.logger.clone(),
        )
        .await
    }

    async fn acquire(&self, ctx: &Context) -> Result<Object> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        let conn = ctx.run(self.inner.pool.get()).await??;
        Ok(conn)
    }

    /// Current pool occupancy
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available as usize,
            waiting: status.waiting,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the pool. A second call returns [`Error::PoolClosed`].
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        if let Some(reaper) = self.inner.reaper.lock().ok().and_then(|mut slot| slot.take()) {
            reaper.abort();
        }
        self.inner.pool.close();

        let config = &self.inner.config;
        self.inner.logger.in_scope(|| {
            tracing::info!(host = %config.host, database = %config.database, "Closed")
        });
        Ok(())
    }
}

impl std::fmt::Debug for PgClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgClient")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn reap_interval(sizing: &PoolSizing) -> Duration {
    sizing
        .max_lifetime
        .unwrap_or(MAX_REAP_INTERVAL)
        .clamp(MIN_REAP_INTERVAL, MAX_REAP_INTERVAL)
}

fn spawn_reaper(pool: Pool, sizing: PoolSizing, logger: Logger) -> JoinHandle<()> {
    tokio::spawn(logger.attach(async move {
        let mut ticker = tokio::time::interval(reap_interval(&sizing));
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }
            let removed = prune(&pool, &sizing);
            if removed > 0 {
                tracing::debug!(removed, "Pruned idle connections");
            }
        }
    }))
}

/// Close idle connections past their lifetime or beyond the idle limit.
fn prune(pool: &Pool, sizing: &PoolSizing) -> usize {
    let before = pool.status().size;
    let kept = Cell::new(0usize);
    pool.retain(|_, metrics| {
        if let Some(max_lifetime) = sizing.max_lifetime {
            if metrics.age() > max_lifetime {
                return false;
            }
        }
        kept.set(kept.get() + 1);
        kept.get() <= sizing.max_idle
    });
    before.saturating_sub(pool.status().size)
}
