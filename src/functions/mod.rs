//! Transactional email functions: `POST /login-notification` and
//! `POST /order-notification`, each answering its own CORS preflight.

pub mod handlers;
pub mod mailer;
pub mod templates;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::http::HeaderValue;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::StorefrontConfig;
use crate::error::{AppError, AppResult};

use handlers::{login_notification, order_notification, preflight};
use mailer::{HttpMailer, MailProvider};

#[derive(Clone)]
pub struct FunctionsState {
    pub mailer: Option<Arc<dyn MailProvider>>,
    pub from: String,
    pub admin_email: Option<String>,
}

impl FunctionsState {
    pub fn new(mailer: Arc<dyn MailProvider>, from: impl Into<String>, admin_email: Option<String>) -> Self {
        Self {
            mailer: Some(mailer),
            from: from.into(),
            admin_email,
        }
    }

    /// Without mail configuration every send answers `500`.
    pub fn from_config(config: &StorefrontConfig) -> AppResult<Self> {
        match &config.mail {
            Some(mail) => {
                let mailer = HttpMailer::new(mail, config.http_timeout)?;
                Ok(Self::new(Arc::new(mailer), mail.from.clone(), mail.admin_email.clone()))
            }
            None => Ok(Self {
                mailer: None,
                from: String::new(),
                admin_email: None,
            }),
        }
    }
}

pub fn router(state: FunctionsState) -> Router {
    Router::new()
        .route(
            "/login-notification",
            post(login_notification).options(preflight),
        )
        .route(
            "/order-notification",
            post(order_notification).options(preflight),
        )
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: &StorefrontConfig) -> AppResult<()> {
    let state = FunctionsState::from_config(config)?;
    let app = router(state);

    let address = SocketAddr::from(([0, 0, 0, 0], config.notify_port));
    let listener = TcpListener::bind(address).await?;
    info!(target: "app::notify", %address, "notification functions listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::other(format!("notification server failed: {err}")))?;

    info!(target: "app::notify", "notification functions stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!(target: "app::notify", "received Ctrl+C, shutting down"),
            Err(err) => {
                error!(target: "app::notify", error = %err, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(target: "app::notify", "received terminate signal, shutting down");
            }
            Err(err) => {
                warn!(target: "app::notify", error = %err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
