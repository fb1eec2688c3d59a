//! Context-bound transactions
//!
//! A [`Transaction`] owns one pooled connection between `BEGIN` and the
//! terminal `COMMIT` / `ROLLBACK`. Every statement it runs is raced against
//! the caller's [`Context`]: when the context is cancelled or its deadline
//! passes, a cancel request is sent to the server for the in-flight statement
//! and the call returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
//!
//! # Example
//!
//! ```no_run
//! use pgaccess::pg::{Context, PgClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Context::background();
//!     let client = PgClient::connect(&ctx, "billing").await?;
//!
//!     let mut txn = client.begin(&ctx).await?;
//!     txn.execute("UPDATE accounts SET balance = balance - $1 WHERE id = $2", &[&50i64, &7i64]).await?;
//!     let row = txn.query_one("SELECT balance FROM accounts WHERE id = $1", &[&7i64]).await?;
//!     println!("balance: {}", row.to_i64("balance"));
//!     txn.commit().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use deadpool_postgres::Object;
use futures::future::BoxFuture;
use futures::{FutureExt, TryStreamExt};
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, Row as PgRow, RowStream, Socket};

use crate::pg::context::Context;
use crate::pg::error::{Error, Result};
use crate::pg::logging::Logger;
use crate::pg::types::{decode_row, RecordSet, Row};
use crate::pg::utils::query_log::render_query;

/// Sends a server-side cancel request for whatever a connection is running.
pub(crate) type Canceller = Arc<dyn Fn(CancelToken) -> BoxFuture<'static, ()> + Send + Sync>;

/// Build a [`Canceller`] that connects with `tls`.
pub(crate) fn canceller<T>(tls: T) -> Canceller
where
    T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
    T::Stream: Sync + Send,
    T::TlsConnect: Sync + Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    Arc::new(move |token: CancelToken| {
        let tls = tls.clone();
        async move {
            if let Err(err) = token.cancel_query(tls).await {
                tracing::warn!(error = %err, "Failed to cancel in-flight statement");
            }
        }
        .boxed()
    })
}

/// Race `fut` against `ctx`, calling `on_cancel` when the context wins.
pub(crate) async fn race<F, T>(ctx: &Context, fut: F, on_cancel: impl FnOnce()) -> Result<T>
where
    F: Future<Output = std::result::Result<T, tokio_postgres::Error>>,
{
    if let Some(err) = ctx.err() {
        return Err(err.into());
    }
    tokio::select! {
        result = fut => Ok(result?),
        err = ctx.done() => {
            on_cancel();
            Err(err.into())
        }
    }
}

/// Everything a statement needs besides the connection itself
#[derive(Clone)]
pub(crate) struct Scope {
    ctx: Context,
    cancel: CancelToken,
    canceller: Canceller,
    logger: Logger,
    /// Set once a statement was abandoned mid-flight; shared with cursors.
    interrupted: Arc<AtomicBool>,
}

impl Scope {
    pub(crate) fn new(ctx: Context, cancel: CancelToken, canceller: Canceller, logger: Logger) -> Self {
        Self {
            ctx,
            cancel,
            canceller,
            logger,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run one driver call under the context.
    pub(crate) async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, tokio_postgres::Error>>,
    {
        race(&self.ctx, fut, || self.cancel_in_flight()).await
    }

    fn cancel_in_flight(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        let cancel = (self.canceller)(self.cancel.clone());
        tokio::spawn(self.logger.attach(cancel));
    }

    /// True once a statement was abandoned with a cancel request racing it.
    /// The connection's state is unknown from then on.
    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }
}

/// Forward-only handle over a query's result rows
///
/// Reads are bound to the same context as the transaction that opened it.
pub struct Cursor {
    stream: Pin<Box<RowStream>>,
    scope: Scope,
}

impl Cursor {
    /// Next raw row, `None` once the result is exhausted.
    pub async fn next_row(&mut self) -> Result<Option<PgRow>> {
        let stream = &mut self.stream;
        self.scope.guard(stream.try_next()).await
    }

    /// Rows affected, known once the stream is exhausted
    pub fn rows_affected(&self) -> Option<u64> {
        self.stream.rows_affected()
    }
}

/// A database transaction bound to a caller's context
///
/// The scope is closed by exactly one [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback). Both mark it closed before talking to
/// the server, so a failed commit still closes it; every later call returns
/// [`Error::TransactionClosed`]. Dropping an open transaction rolls it back.
pub struct Transaction {
    connection: Option<Object>,
    scope: Scope,
    closed: bool,
}

impl Transaction {
    /// Begin a new transaction on `connection` with the default isolation level
    pub(crate) async fn begin(
        connection: Object,
        ctx: Context,
        canceller: Canceller,
        logger: Logger,
    ) -> Result<Self> {
        let scope = Scope::new(ctx, connection.cancel_token(), canceller, logger);
        let started = Instant::now();
        let begun = scope.guard(connection.batch_execute("BEGIN")).await;
        log_elapsed(&scope, "begin", started.elapsed());
        if let Err(err) = begun {
            // BEGIN may still have run on the server.
            release(connection, &scope);
            return Err(err);
        }

        Ok(Self {
            connection: Some(connection),
            scope,
            closed: false,
        })
    }

    fn get_connection(&self) -> Result<&Object> {
        if self.closed {
            return Err(Error::TransactionClosed);
        }
        self.connection.as_ref().ok_or(Error::TransactionClosed)
    }

    /// True once committed or rolled back
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run a query and decode its first row.
    ///
    /// Returns [`Error::EmptyRecord`] when the query matched nothing, so
    /// callers can tell "found nothing" from "failed".
    pub async fn query_one(&self, query: &str, args: &[&(dyn ToSql + Sync)]) -> Result<Row> {
        let conn = self.get_connection()?;
        let started = Instant::now();
        let first = self
            .scope
            .guard(async {
                let stream = conn.query_raw(query, slice_iter(args)).await?;
                futures::pin_mut!(stream);
                let row = stream.try_next().await?;
                Ok::<_, tokio_postgres::Error>(row)
            })
            .await;
        log_elapsed(&self.scope, "query_one", started.elapsed());

        match first? {
            Some(row) => Ok(decode_row(&row, self.scope.logger())),
            None => Err(Error::EmptyRecord),
        }
    }

    /// [`query_one`](Transaction::query_one), also logging the rendered query.
    pub async fn query_one_print(&self, query: &str, args: &[&(dyn ToSql + Sync)]) -> Result<Row> {
        let started = Instant::now();
        let result = self.query_one(query, args).await;
        self.print_query(query, args, started.elapsed());
        result
    }

    /// Run a query and return a cursor over its rows.
    pub async fn query(&self, query: &str, args: &[&(dyn ToSql + Sync)]) -> Result<Cursor> {
        let conn = self.get_connection()?;
        let started = Instant::now();
        let stream = self.scope.guard(conn.query_raw(query, slice_iter(args))).await;
        log_elapsed(&self.scope, "query", started.elapsed());

        Ok(Cursor {
            stream: Box::pin(stream?),
            scope: self.scope.clone(),
        })
    }

    /// [`query`](Transaction::query), also logging the rendered query.
    pub async fn query_print(&self, query: &str, args: &[&(dyn ToSql + Sync)]) -> Result<Cursor> {
        let started = Instant::now();
        let result = self.query(query, args).await;
        self.print_query(query, args, started.elapsed());
        result
    }

    /// Run a statement that returns no rows; returns the affected row count.
    pub async fn execute(&self, query: &str, args: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let conn = self.get_connection()?;
        let started = Instant::now();
        let affected = self.scope.guard(conn.execute_raw(query, slice_iter(args))).await;
        log_elapsed(&self.scope, "execute", started.elapsed());
        affected
    }

    /// [`execute`](Transaction::execute), also logging the rendered query.
    pub async fn execute_print(&self, query: &str, args: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let started = Instant::now();
        let result = self.execute(query, args).await;
        self.print_query(query, args, started.elapsed());
        result
    }

    /// Decode the cursor's next row; `None` once it is exhausted.
    pub async fn fetch_row(&self, cursor: &mut Cursor) -> Result<Option<Row>> {
        self.get_connection()?;
        let row = cursor.next_row().await?;
        Ok(row.map(|row| decode_row(&row, self.scope.logger())))
    }

    /// Decode every remaining row, in result order.
    ///
    /// A failure part way through is returned as an error; rows decoded so
    /// far are discarded.
    pub async fn fetch_all(&self, cursor: &mut Cursor) -> Result<RecordSet> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_row(cursor).await? {
            rows.push(row);
        }
        Ok(rows.into())
    }

    /// Project one column across every remaining row.
    pub async fn fetch_one_column(&self, cursor: &mut Cursor, column: &str) -> Result<Vec<String>> {
        let mut values = Vec::new();
        while let Some(row) = self.fetch_row(cursor).await? {
            values.push(row.value(column).to_string());
        }
        Ok(values)
    }

    /// Commit the transaction
    pub async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    /// Rollback the transaction
    pub async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&mut self, statement: &'static str) -> Result<()> {
        if self.closed {
            return Err(Error::TransactionClosed);
        }
        self.closed = true;
        let conn = self.connection.take().ok_or(Error::TransactionClosed)?;

        let started = Instant::now();
        let result = self.scope.guard(conn.batch_execute(statement)).await;
        log_elapsed(&self.scope, statement, started.elapsed());

        if result.is_err() {
            // The connection may still be inside the transaction.
            release(conn, &self.scope);
        }
        result
    }

    fn print_query(&self, query: &str, args: &[&(dyn ToSql + Sync)], elapsed: Duration) {
        let text = render_query(query, args, elapsed);
        self.scope
            .logger()
            .in_scope(|| tracing::info!(target: "pgaccess::query", "{}", text));
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            release(conn, &self.scope);
        }
    }
}

/// Give a connection whose transaction state is unknown back to the pool.
///
/// After an interrupted statement a late cancel request could still hit
/// whatever runs next, so the connection is closed instead of reused.
fn release(conn: Object, scope: &Scope) {
    if scope.is_interrupted() {
        detach(conn, scope.logger());
    } else {
        discard(conn, scope.logger());
    }
}

/// Roll back whatever the connection has open, then hand it back to the pool.
/// Without a runtime to run the rollback on, the connection is detached from
/// the pool and closed instead.
fn discard(conn: Object, logger: &Logger) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(logger.attach(async move {
                if let Err(err) = conn.batch_execute("ROLLBACK").await {
                    tracing::warn!(error = %err, "Failed to roll back abandoned transaction");
                }
            }));
        }
        Err(_) => drop(Object::take(conn)),
    }
}

/// Remove a connection from the pool and close it.
pub(crate) fn detach(conn: Object, logger: &Logger) {
    drop(Object::take(conn));
    logger.in_scope(|| tracing::debug!("Closed connection left in an unknown state"));
}

fn log_elapsed(scope: &Scope, op: &str, elapsed: Duration) {
    scope.logger().in_scope(|| {
        tracing::debug!(
            target: "pgaccess::elapsed",
            op,
            elapsed_ms = elapsed.as_millis() as u64,
            "Statement finished"
        )
    });
}

fn slice_iter<'a>(
    args: &'a [&'a (dyn ToSql + Sync)],
) -> impl ExactSizeIterator<Item = &'a dyn ToSql> + 'a {
    args.iter().map(|arg| *arg as _)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_race_returns_driver_result() {
        let ctx = Context::background();
        let result = race(&ctx, async { Ok::<_, tokio_postgres::Error>(5) }, || {}).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_race_cancels_in_flight_statement() {
        let (ctx, cancel) = Context::background().with_cancel();
        let cancelled = AtomicBool::new(false);

        let statement = futures::future::pending::<std::result::Result<(), tokio_postgres::Error>>();
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(
            race(&ctx, statement, || cancelled.store(true, Ordering::SeqCst)),
            trigger
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_race_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let statement = futures::future::pending::<std::result::Result<(), tokio_postgres::Error>>();
        let result = race(&ctx, statement, || {}).await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_race_fails_fast_without_polling() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();

        let polled = AtomicBool::new(false);
        let cancelled = AtomicBool::new(false);
        let statement = async {
            polled.store(true, Ordering::SeqCst);
            Ok::<_, tokio_postgres::Error>(())
        };
        let result = race(&ctx, statement, || cancelled.store(true, Ordering::SeqCst)).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!polled.load(Ordering::SeqCst));
        assert!(!cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_slice_iter_keeps_arity() {
        let a = 1i32;
        let b = "two";
        let args: [&(dyn ToSql + Sync); 2] = [&a, &b];
        assert_eq!(slice_iter(&args).len(), 2);
    }
}
