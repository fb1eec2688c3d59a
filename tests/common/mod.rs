use std::time::Duration;

use pgaccess::pg::{Context, Logger, PgClient, PgConfig};
use testcontainers::{core::WaitFor, GenericImage, RunnableImage};

/// The PostgreSQL Docker image to use for testing
pub const POSTGRES_IMAGE: &str = "postgres";
pub const POSTGRES_TAG: &str = "16-alpine";

/// Default PostgreSQL port
pub const POSTGRES_PORT: u16 = 5432;

/// Default credentials for the container
pub const POSTGRES_USER: &str = "postgres";
pub const POSTGRES_PASSWORD: &str = "pgaccess_password";
pub const POSTGRES_DB: &str = "postgres";

/// Create a runnable PostgreSQL container
pub fn create_postgres_container() -> RunnableImage<GenericImage> {
    let image = GenericImage::new(POSTGRES_IMAGE, POSTGRES_TAG)
        .with_env_var("POSTGRES_PASSWORD", POSTGRES_PASSWORD)
        .with_wait_for(WaitFor::message_on_stderr("database system is ready to accept connections"));

    RunnableImage::from(image).with_tag(POSTGRES_TAG)
}

/// Configuration for the running container
pub fn config_for(port: u16, application_name: &str) -> PgConfig {
    PgConfig {
        host: "127.0.0.1".to_string(),
        port,
        user: POSTGRES_USER.to_string(),
        password: POSTGRES_PASSWORD.to_string(),
        database: POSTGRES_DB.to_string(),
        application_name: application_name.to_string(),
        connect_timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

/// Connect to the container, retrying while the server finishes starting
pub async fn connect(port: u16) -> PgClient {
    connect_with(config_for(port, "pgaccess-test")).await
}

/// Connect with an explicit configuration, retrying while the server starts
pub async fn connect_with(config: PgConfig) -> PgClient {
    let ctx = Context::background();
    let mut last_error = None;
    for _ in 0..20 {
        match PgClient::connect_with(&ctx, config.clone(), Logger::global()).await {
            Ok(client) => return client,
            Err(e) => last_error = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("could not connect to test database: {:?}", last_error);
}
