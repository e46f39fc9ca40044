use axum::{
    Router,
    routing::{delete, get, post},
};
use http::{HeaderValue, Method, header};
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{self, impersonation};
use crate::models::{
    ApplicationDetailsSettings, ApplicationFeaturesSettings, ApplicationSecuritySettings,
};
use crate::state::AppState;

/// Router の構築
pub fn create_router(state: AppState) -> Router {
    let allowed_origins: Vec<HeaderValue> = state
        .config
        .cors_origins()
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]));

    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/auth/layout", get(handlers::auth_layout))
        // アカウント
        .route("/api/register", post(handlers::register))
        .route("/api/login", post(handlers::login))
        .route("/api/logout", post(handlers::logout))
        // 多要素認証
        .route("/settings/security", get(handlers::security_state))
        .route(
            "/settings/security/mfa/app/setup",
            post(handlers::setup_app_authentication),
        )
        .route(
            "/settings/security/mfa/app/enable",
            post(handlers::enable_app_authentication),
        )
        .route(
            "/settings/security/mfa/app",
            delete(handlers::disable_app_authentication),
        )
        .route(
            "/settings/security/mfa/app/recovery-codes",
            post(handlers::regenerate_recovery_codes),
        )
        .route(
            "/settings/security/mfa/email/start",
            post(handlers::start_email_authentication),
        )
        .route(
            "/settings/security/mfa/email/resend",
            post(handlers::start_email_authentication),
        )
        .route(
            "/settings/security/mfa/email/enable",
            post(handlers::enable_email_authentication),
        )
        .route(
            "/settings/security/mfa/email",
            delete(handlers::disable_email_authentication),
        )
        // 管理パネル
        .route(
            "/admin/settings/application-details",
            get(handlers::show_settings::<ApplicationDetailsSettings>)
                .put(handlers::update_settings::<ApplicationDetailsSettings>),
        )
        .route(
            "/admin/settings/application-features",
            get(handlers::show_settings::<ApplicationFeaturesSettings>)
                .put(handlers::update_settings::<ApplicationFeaturesSettings>),
        )
        .route(
            "/admin/settings/application-security",
            get(handlers::show_settings::<ApplicationSecuritySettings>)
                .put(handlers::update_settings::<ApplicationSecuritySettings>),
        )
        .route(
            "/admin/settings/{group}/{key}",
            get(handlers::show_setting_value).put(handlers::update_setting_value),
        )
        .route("/admin/activity", get(handlers::list_activity))
        // なりすまし
        .route("/impersonate/take/{user_id}", post(impersonation::take))
        .route("/impersonate/leave", post(impersonation::leave))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
