use axum::{
    extract::{FromRequest, Request, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use pullhook_core::AppError;
use pullhook_github::{GitHubEvent, WebhookEvent};
use pullhook_sync::SyncResult;
use tokio::task::JoinHandle;

use crate::AppState;

/// HEAD is a liveness probe, GET reports the uptime and POST receives
/// webhook deliveries.
pub async fn root(
    State(state): State<AppState>,
    method: Method,
    request: Request,
) -> Result<Response, AppError> {
    match method {
        Method::HEAD => Ok(StatusCode::OK.into_response()),
        // Small enough of an information leak.
        Method::GET => Ok(format!("{:?}", state.started.elapsed()).into_response()),
        Method::POST => match GitHubEvent::from_request(request, &state).await {
            Ok(GitHubEvent { event }) => Ok(handle_event(&state, event)),
            Err(rejection) => Ok(rejection.into_response()),
        },
        method => {
            tracing::warn!("- invalid method {method}");
            Err(AppError::Status(StatusCode::METHOD_NOT_ALLOWED))
        }
    }
}

/// Acknowledges the delivery right away. A sync, if any, runs in the
/// background and its outcome is only logged.
fn handle_event(state: &AppState, event: WebhookEvent) -> Response {
    match &event {
        WebhookEvent::Ping(ping) => {
            tracing::info!("- Ping {}", ping.zen.as_deref().unwrap_or_default());
        }
        WebhookEvent::Push(push) => {
            let commit = push.head_commit.as_deref().unwrap_or("<deleted>");
            tracing::info!("- Push {} {} {}", push.repository, push.git_ref, commit);
            if push.is_update() {
                dispatch_sync(state);
            }
        }
        WebhookEvent::Other { .. } => tracing::info!("- ignoring hook type {}", event.kind()),
    }
    ([(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())], "{}").into_response()
}

/// Queue a sync behind the task gate. The handle can be dropped.
pub fn dispatch_sync(state: &AppState) -> JoinHandle<SyncResult> {
    let runner = state.runner.clone();
    state.gate.run(move || async move {
        let result = runner.execute().await;
        if result.success {
            tracing::info!("{result}");
        } else {
            tracing::error!("{result}");
        }
        result
    })
}
