use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use meal_catalog::{db::Store, remote::MealDb, Catalog, Config};

mod api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(true)
        .with_file(false)
        .pretty()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("fail to setup logging")?;

    let store = Store::connect(&config.database_url).await?;
    // other servers on the same database file
    let _watch = store.watch_external(config.sync_interval);
    let source = Arc::new(MealDb::new(config.api_base.clone()));
    let catalog = Arc::new(Catalog::open(source, store, &config).await);
    catalog.mount().await;
    let _sync = catalog.spawn_sync();

    let data = web::Data::from(catalog);
    let origin = config.cors_origin.clone();
    tracing::info!("listening on {}", config.bind_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allowed_origin(&origin)
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(data.clone())
            .configure(api::configure)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await?;
    Ok(())
}
