use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pgaccess::pg::{ChannelOptions, Context, NotificationChannel, PgClient};

/// Connect to PostgreSQL and print notifications from the given channels
#[derive(Debug, Parser)]
#[command(name = "pgaccess", version)]
struct Args {
    /// Label attached to every connection (application_name)
    #[arg(long, env = "PGACCESS_APP_NAME", default_value = "pgaccess")]
    app_name: String,

    /// Seconds without notifications before the connection is pinged
    #[arg(long, default_value_t = 300)]
    idle_secs: u64,

    /// Channels to LISTEN on
    channels: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> pgaccess::pg::Result<()> {
    let ctx = Context::background();
    let client = PgClient::connect(&ctx, &args.app_name).await?;
    tracing::info!(config = %client.config(), "Configuration loaded");

    let txn = client.begin(&ctx).await?;
    let row = txn
        .query_one_print(
            "
            SELECT now() AS server_time,
                   current_database() AS database
            ",
            &[],
        )
        .await?;
    tracing::info!(
        server_time = %row.value("server_time"),
        database = %row.value("database"),
        "Server reachable"
    );
    drop(txn);

    let options = ChannelOptions::default()
        .with_idle_timeout(std::time::Duration::from_secs(args.idle_secs));
    let channel = NotificationChannel::open_with(client.config().clone(), options).await?;
    for name in &args.channels {
        channel
            .listen(name, |notification| match serde_json::to_string(&notification) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "Failed to encode notification"),
            })
            .await?;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
    }
    tracing::info!("Shutting down");

    channel.close()?;
    client.close()?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
