//! Example server: loads version configs from CONFIG_PATH (a directory of `*.json` versions or
//! one full config file), connects to PostgreSQL and serves the generated API.

use axum::{extract::Request, middleware::Next, response::Response};
use resourceful::{application, load_from_dir, load_from_file, resolve, Extensions, PgDatabase};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

async fn request_id(mut req: Request, next: Next) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = id.parse() {
        req.headers_mut().insert("x-request-id", value);
    }
    next.run(req).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("resourceful=info".parse()?))
        .init();

    let config_path = PathBuf::from(std::env::var("CONFIG_PATH").unwrap_or_else(|_| "demos/config".into()));
    let config = if config_path.is_dir() {
        load_from_dir(&config_path)?
    } else {
        load_from_file(&config_path)?
    };

    let extensions = Extensions::new()
        .with_middleware("request_id", request_id)
        .with_serializer("drop_nulls", |row, _ctx| {
            if let serde_json::Value::Object(map) = row {
                map.retain(|_, v| !v.is_null());
            }
        });
    let api = resolve(&config, &extensions)?;

    let database = &api.application.database;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(database.max_connections)
        .connect(&database.url)
        .await?;
    let port = api.application.port;

    let (app, _state) = application(Arc::new(PgDatabase::new(pool)), api, extensions)?;

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
