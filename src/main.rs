use std::io;

use actix_cors::Cors;
use actix_web::{http::header, middleware::Logger, web, App, HttpServer};
use roomiesplit::{config::Config, context::AppContext, routes};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load().map_err(|err| {
        error!("Configuration error: {err}");
        io::Error::new(io::ErrorKind::InvalidInput, err)
    })?;
    let bind = (config.host.clone(), config.port);
    let origin = config.public_origin.clone();

    let context = AppContext::connect(config).await.map_err(|err| {
        error!("Failed to connect to the store: {err}");
        io::Error::new(io::ErrorKind::Other, err)
    })?;
    let context = web::Data::new(context);
    info!("Listening on {}:{}", bind.0, bind.1);

    let app_context = context.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&origin)
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
            .max_age(3600);
        App::new()
            .app_data(app_context.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(routes::configure)
    })
    .bind(bind)?
    .run()
    .await?;

    context.shutdown().await;
    info!("Shut down");
    Ok(())
}
