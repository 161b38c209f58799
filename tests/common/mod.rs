#![allow(dead_code)]

use previewer::configuration::{get_configuration, DatabaseSettings, Settings};
use previewer::db;
use previewer::models::Project;
use sqlx::{Connection, Executor, PgConnection, PgPool};

pub const WEBHOOK_SECRET: &str = "integration-secret";
pub const ENCRYPTION_KEY: &str = "SECURITY_KEY_SHOULD_BE_OF_LEN_32";

pub struct TestApp {
    pub address: String,
    pub db_pool: PgPool,
}

pub fn test_configuration() -> Settings {
    let mut configuration = get_configuration().expect("Failed to get configuration");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    configuration.webhook.secret = WEBHOOK_SECRET.to_string();
    configuration.security.encryption_key = ENCRYPTION_KEY.to_string();
    configuration
}

pub async fn configure_database(config: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    let mut connection = PgConnection::connect(&config.connection_string_without_db()).await?;

    connection
        .execute(format!(r#"CREATE DATABASE "{}""#, config.database_name).as_str())
        .await?;

    let connection_pool = PgPool::connect(&config.connection_string()).await?;

    sqlx::migrate!("./migrations").run(&connection_pool).await?;

    Ok(connection_pool)
}

/// Fresh database, or `None` when Postgres is not reachable.
pub async fn test_pool() -> Option<(Settings, PgPool)> {
    let configuration = test_configuration();
    match configure_database(&configuration.database).await {
        Ok(pool) => Some((configuration, pool)),
        Err(err) => {
            eprintln!("Skipping tests: failed to connect to postgres: {}", err);
            None
        }
    }
}

pub async fn spawn_app() -> Option<TestApp> {
    let (configuration, connection_pool) = test_pool().await?;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let server =
        match previewer::startup::run(listener, connection_pool.clone(), configuration).await {
            Ok(server) => server,
            Err(err) => {
                eprintln!("Skipping tests: failed to start server: {}", err);
                return None;
            }
        };

    let _ = tokio::spawn(server);
    println!("Used Port: {}", port);

    Some(TestApp {
        address,
        db_pool: connection_pool,
    })
}

pub async fn insert_project(pool: &PgPool, repository_id: i64, prefix: &str) -> Project {
    let mut conn = pool.acquire().await.unwrap();
    db::project::insert(
        &mut conn,
        &Project {
            user_id: "u-1".to_string(),
            repository_id,
            repository_owner: "acme".to_string(),
            repository_name: prefix.to_string(),
            repository_full_name: format!("acme/{}", prefix),
            app_name_prefix: prefix.to_string(),
            region: "iad".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

pub async fn deployment_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM deployment")
        .fetch_one(pool)
        .await
        .unwrap()
}
