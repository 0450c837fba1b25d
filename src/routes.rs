use crate::{
    api::{activity, attendance, company, dashboard, leave, payroll, requests, sessions, settings, users},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    errors::ApiError,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

/// Room for a base64 screenshot plus envelope.
const JSON_LIMIT: usize = 4 * 1024 * 1024;

fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / u64::from(requests_per_min)).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(GovernorConfig::default);
    Governor::new(&cfg)
}

/// Extractor failures answer with the same `{"error": ...}` body as handlers.
fn extractor_configs(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(JSON_LIMIT)
            .error_handler(|err, _| ApiError::bad_request(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| ApiError::bad_request(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _| ApiError::bad_request(err.to_string()).into()),
    );
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    extractor_configs(cfg);

    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let register_limiter = Arc::new(build_limiter(config.rate_register_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Auth: public endpoints with their own limiters, plus the two that need a session.
    cfg.service(
        web::scope(&format!("{}/auth", config.api_prefix))
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/register")
                    .wrap(register_limiter.clone())
                    .route(web::post().to(handlers::register)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            )
            .service(
                web::resource("/me")
                    .wrap(from_fn(auth_middleware))
                    .wrap(protected_limiter.clone())
                    .route(web::get().to(handlers::me)),
            )
            .service(
                web::resource("/password")
                    .wrap(from_fn(auth_middleware))
                    .wrap(login_limiter.clone())
                    .route(web::put().to(handlers::change_password)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(protected_limiter)
            .service(
                web::scope("/companies")
                    .service(web::resource("").route(web::post().to(company::create_company)))
                    .service(
                        web::resource("/me")
                            .route(web::get().to(company::get_my_company))
                            .route(web::put().to(company::update_my_company)),
                    ),
            )
            .service(
                web::resource("/settings/work")
                    .route(web::get().to(settings::get_work_settings))
                    .route(web::put().to(settings::update_work_settings)),
            )
            .service(
                web::scope("/users")
                    .service(
                        web::resource("")
                            .route(web::post().to(users::create_user))
                            .route(web::get().to(users::list_users)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(users::get_user))
                            .route(web::put().to(users::update_user))
                            .route(web::delete().to(users::delete_user)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    .service(web::resource("").route(web::get().to(attendance::list_attendance)))
                    .service(web::resource("/mark").route(web::post().to(attendance::mark_attendance)))
                    .service(web::resource("/checkout").route(web::post().to(attendance::checkout)))
                    .service(web::resource("/me").route(web::get().to(attendance::my_attendance)))
                    .service(web::resource("/today").route(web::get().to(attendance::today_attendance)))
                    .service(web::resource("/{id}").route(web::put().to(attendance::correct_attendance))),
            )
            .service(
                web::scope("/leave")
                    .service(
                        web::resource("")
                            .route(web::post().to(leave::apply_leave))
                            .route(web::get().to(leave::list_leaves)),
                    )
                    // must precede /{id}
                    .service(web::resource("/balance").route(web::get().to(leave::my_balance)))
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(leave::get_leave))
                            .route(web::delete().to(leave::cancel_leave)),
                    )
                    .service(web::resource("/{id}/approve").route(web::put().to(leave::approve_leave)))
                    .service(web::resource("/{id}/reject").route(web::put().to(leave::reject_leave))),
            )
            .service(
                web::scope("/payroll")
                    .service(web::resource("").route(web::get().to(payroll::list_payrolls)))
                    .service(web::resource("/generate").route(web::post().to(payroll::generate_payroll)))
                    .service(web::resource("/me").route(web::get().to(payroll::my_payrolls)))
                    .service(web::resource("/stats").route(web::get().to(payroll::stats)))
                    .service(web::resource("/{id}").route(web::get().to(payroll::get_payroll)))
                    .service(web::resource("/{id}/pay").route(web::put().to(payroll::mark_paid))),
            )
            .service(
                web::scope("/requests")
                    .service(
                        web::resource("")
                            .route(web::post().to(requests::create_request))
                            .route(web::get().to(requests::list_requests)),
                    )
                    .service(web::resource("/{id}/approve").route(web::put().to(requests::approve_request)))
                    .service(web::resource("/{id}/reject").route(web::put().to(requests::reject_request))),
            )
            .service(
                web::scope("/sessions")
                    .service(web::resource("").route(web::get().to(sessions::list_active_sessions)))
                    .service(web::resource("/heartbeat").route(web::post().to(sessions::heartbeat)))
                    .service(web::resource("/me").route(web::get().to(sessions::my_sessions)))
                    .service(web::resource("/{id}").route(web::delete().to(sessions::terminate_session))),
            )
            .service(
                web::resource("/activity")
                    .route(web::post().to(activity::report_activity))
                    .route(web::get().to(activity::list_activity)),
            )
            .service(
                web::scope("/monitor")
                    .service(web::resource("/screenshot").route(web::post().to(activity::upload_screenshot)))
                    .service(web::resource("/settings").route(web::get().to(activity::monitor_settings)))
                    .service(
                        web::resource("/{user_id}/latest").route(web::get().to(activity::latest_screenshot)),
                    ),
            )
            .service(web::resource("/dashboard").route(web::get().to(dashboard::dashboard))),
    );
}

// LOGIN
//  ├─ access_token (ACCESS_TOKEN_TTL, 15 min by default)
//  ├─ refresh_token (REFRESH_TOKEN_TTL, 7 days by default)
//  └─ user_sessions row, kept alive by POST /sessions/heartbeat

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ rotates both tokens, re-reading role and company
