mod account;
mod auth;
mod booking;
mod config;
mod db;
mod error;
mod favorite;
mod listing;
mod mailer;
mod media;
mod models;
mod owner;
mod routes;
mod schema;
#[cfg(test)]
mod testing;
mod validation;

#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub pool: db::DbPool,
    pub mailer: mailer::Mailer,
    pub images: media::ImageHost,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = config::AppConfig::load()?;
    log::info!(
        "Loaded config: bind={} frontend={} mail={} images={}",
        config.bind_address(),
        config.frontend_url,
        config.mail_credentials().is_some(),
        config.cloudinary_cloud_name.is_some()
    );

    let pool = db::build_pool(&config)?;
    {
        let mut conn = pool.get()?;
        db::ensure_schema(&mut conn)?;
    }

    let state = AppState {
        mailer: mailer::Mailer::new(&config)?,
        images: media::ImageHost::new(&config),
        pool,
        config,
    };
    let addr = state.config.bind_address();
    let app = routes::app(state)?;

    log::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
