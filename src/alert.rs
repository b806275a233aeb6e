//! Out-of-band alerting.
//!
//! Panics caught at the HTTP boundary are logged, answered with a bare 500
//! envelope, and posted to a Slack webhook when one is configured. Delivery
//! is fire-and-forget; an alert failure only logs.

use std::any::Any;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::config::Config;

/// Panic-to-response hook for `CatchPanicLayer::custom`.
pub fn panic_handler(
    config: Arc<Config>,
) -> impl Fn(Box<dyn Any + Send + 'static>) -> Response + Clone {
    move |panic| {
        let detail = panic_message(panic.as_ref());
        tracing::error!(panic = %detail, "request handler panicked");
        post_slack(
            config.slack_webhook_url.clone(),
            format!("kaitu-center panic: {detail}"),
        );
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "code": 500, "msg": "system error" })),
        )
            .into_response()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Post a message to the configured webhook, if any.
pub fn post_slack(webhook: Option<String>, text: String) {
    let Some(url) = webhook else {
        return;
    };
    tokio::spawn(async move {
        let result = reqwest::Client::new()
            .post(&url)
            .json(&json!({ "text": text }))
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = %response.status(), "slack alert rejected");
            }
            Err(err) => tracing::warn!(error = %err, "slack alert failed"),
            _ => {}
        }
    });
}
