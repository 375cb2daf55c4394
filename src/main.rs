use actix_cors::Cors;
use actix_web::{http, web::Data, App, HttpServer};
use dotenv::dotenv;
use log::info;

use hr_auth_api::middleware::logging::LoggingMiddleware;
use hr_auth_api::utils::jwt::JwtKeys;
use hr_auth_api::{db, routes, services, AppConfig, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::new().expect("Failed to load configuration");
    let db_pool =
        db::establish_connection(&config.database).expect("Failed to initialise database pool");
    let jwt_keys = JwtKeys::new(&config.jwt);

    services::cleanup::spawn_session_cleanup(
        db_pool.clone(),
        config.security.session_cleanup_interval,
    );

    let bind_addr = (config.host.clone(), config.port);
    info!(
        "Starting hr-auth-api on {}:{} ({})",
        bind_addr.0, bind_addr.1, config.environment
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config.frontend_url)
            .allowed_methods(vec!["GET", "POST", "DELETE"])
            .allowed_headers(vec![http::header::AUTHORIZATION, http::header::ACCEPT])
            .allowed_header(http::header::CONTENT_TYPE)
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(LoggingMiddleware::new())
            .app_data(Data::new(AppState {
                db: db_pool.clone(),
            }))
            .app_data(Data::new(config.clone()))
            .app_data(Data::new(jwt_keys.clone()))
            .configure(|cfg| routes::config(cfg, &config, &jwt_keys))
    })
    .bind(bind_addr)?
    .run()
    .await
}
