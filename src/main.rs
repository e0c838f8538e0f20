use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use log::{error, info, warn};
use quiz_pvp::api;
use quiz_pvp::api::rate_limit::RateLimiter;
use quiz_pvp::clock::SystemClock;
use quiz_pvp::config::ServerConfig;
use quiz_pvp::matches::expiry_ticker::spawn_expiry_ticker;
use quiz_pvp::matches::PvpService;
use quiz_pvp::quiz::{HttpQuestionProvider, QuestionProvider, QuestionSetGenerator, StaticQuestionProvider};
use quiz_pvp::store::directory::StoreRelationships;
use quiz_pvp::store::DocumentStore;
use std::io::Error;
use std::io::ErrorKind::Other;
use std::sync::Arc;
use web::Data;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info,actix_web=debug"),
    )
    .init();

    let config_path = ServerConfig::config_path();
    let config = ServerConfig::load_or_create_config(&config_path)
        .await
        .map_err(|x| Error::new(Other, x.to_string()))?;
    info!("Loaded config from {}", config_path.display());

    let store = Arc::new(
        DocumentStore::load_from_file(&config.store_file, config.max_transaction_attempts)
            .map_err(|x| Error::new(Other, x))?,
    );

    let provider: Arc<dyn QuestionProvider> = if config.generator_url.is_empty() {
        warn!("No generator_url configured, serving the built-in sample questions");
        Arc::new(StaticQuestionProvider::sample())
    } else {
        Arc::new(
            HttpQuestionProvider::new(config.generator_url.clone(), config.generator_timeout())
                .map_err(|x| Error::new(Other, x))?,
        )
    };

    let service = Arc::new(PvpService::new(
        store.clone(),
        QuestionSetGenerator::new(provider, config.question_shape()),
        Arc::new(StoreRelationships::new(store.clone())),
        Arc::new(SystemClock),
        config.match_settings(),
    ));
    let limiter = Data::new(RateLimiter::new(config.rate_limit_window()));

    let _ticker = spawn_expiry_ticker(&service, config.expiry_sweep_interval());

    info!("Listening on {}:{}", config.host, config.port);

    HttpServer::new({
        let service = Data::from(service.clone());
        move || {
            App::new()
                .wrap(Logger::default())
                .app_data(service.clone())
                .app_data(limiter.clone())
                .configure(api::configure)
        }
    })
    .workers(config.workers)
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    match store.save_to_file(&config.store_file) {
        Ok(count) => info!("Saved {} documents to {}", count, config.store_file),
        Err(err) => {
            error!("Failed to save store: {}", err);
            return Err(Error::new(Other, err));
        }
    }

    Ok(())
}
