use actix_web::middleware::{Logger, NormalizePath};
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use tracing::{error, info};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use workzen::config::Config;
use workzen::db::init_db;
use workzen::docs::ApiDoc;
use workzen::routes;
use workzen::auth::ended_sessions;
use workzen::utils::{email_index, session_reaper};

#[get("/")]
async fn index() -> impl Responder {
    "WorkZen is running"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!(addr = %config.server_addr, "Server starting...");

    let pool = init_db(&config).await?;

    let pool_for_email_warmup = pool.clone();
    let server_addr = config.server_addr.clone();
    let config_data = config.clone();

    // Ended sessions must be blocked before the first request is served.
    ended_sessions::warmup(&pool).await?;

    actix_web::rt::spawn(async move {
        // Active members seen in the last 30 days count as hot, 250 rows per batch
        if let Err(e) = email_index::warmup(&pool_for_email_warmup, 30, 250).await {
            error!(error = ?e, "Failed to warm up email index");
        }
    });

    actix_web::rt::spawn(session_reaper::run(pool.clone(), config.clone()));

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                // wildcard {_:.*} so the UI's JS/CSS assets resolve
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .service(index)
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
