use actix_web::{middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use herald_api::{auth::TokenService, handlers, AppState};
use herald_core::{config::HeraldConfig, HeraldCore};
use log::info;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = HeraldConfig::load().map_err(std::io::Error::other)?;
    init_log(&config);

    let core = HeraldCore::start(&config.database)
        .await
        .map_err(std::io::Error::other)?;
    let tokens = TokenService::new(&config.auth).map_err(std::io::Error::other)?;
    let state = web::Data::new(AppState::new(core.clone(), tokens));

    let address = ("0.0.0.0", config.app.port);
    info!("starting herald on {}:{} ({})", address.0, address.1, config.app.env);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind(address)?
    .run()
    .await?;

    info!("server stopped");
    core.shutdown().await.map_err(std::io::Error::other)
}

/// `RUST_LOG` wins; otherwise info in production and debug elsewhere.
fn init_log(config: &HeraldConfig) {
    let level = if config.app.is_production() { "info" } else { "debug" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();
}
