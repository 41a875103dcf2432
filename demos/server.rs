//! Example server: loads models from MODELS_PATH, creates their tables, and mounts a collection and a
//! single-record route for every model under /api/v1.

use autocrud::{ensure_tables, load_from_file, resolve, AppState, PgStore};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("autocrud=info".parse()?))
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/autocrud".into());
    let models_path = std::env::var("MODELS_PATH").unwrap_or_else(|_| "demos/models.json".into());
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let schema = Arc::new(resolve(&load_from_file(&models_path)?)?);
    let store = PgStore::connect(&database_url, 5, schema.clone()).await?;
    ensure_tables(store.pool(), &schema).await?;
    let state = AppState::new(schema.clone(), Arc::new(store));

    let mut api = Router::new();
    let mut names: Vec<String> = schema.models().map(|m| m.name.clone()).collect();
    names.sort();
    for name in &names {
        let collection = state.resource(name)?.allow_subresources(true);
        let single = state.resource(name)?.allow_put_insert(true);
        let base = format!("/{}", name);
        api = api.merge(state.routes(&base, &format!("{}/:id", base), collection, single));
        tracing::info!(model = %name, path = %base, "mounted resource");
    }

    let app = Router::new().nest("/api/v1", api);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
