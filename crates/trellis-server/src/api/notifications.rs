//! Notification handlers.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use trellis_core::error::CoreError;
use trellis_core::types::{BusEvent, BusPublisher, Principal};
use trellis_core::{Notification, NotificationKind};

use crate::api::errors::ApiError;
use crate::state::SharedState;

fn notification_json(n: &Notification) -> Value {
    json!({
        "id": n.id,
        "orgId": n.org_id,
        "type": n.kind,
        "title": n.title,
        "message": n.message,
        "relatedId": n.related_id,
        "isRead": n.is_read,
        "createdAt": n.created_at,
    })
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// GET /notifications?limit=
pub async fn list(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let notifications = state
        .repos
        .notifications
        .list_notifications(principal.org_id, query.limit.unwrap_or(50).clamp(1, 200))
        .await?;
    Ok(Json(json!({
        "notifications": notifications.iter().map(notification_json).collect::<Vec<_>>()
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<NotificationKind>,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub related_id: Option<Uuid>,
}

/// POST /notifications
pub async fn create(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateNotificationRequest>,
) -> Result<Response, ApiError> {
    if body.title.trim().is_empty() {
        return Err(CoreError::Validation("title is required".to_string()).into());
    }

    let mut notification = Notification::new(
        principal.org_id,
        body.kind.unwrap_or(NotificationKind::Info),
        body.title.trim(),
        body.message,
    );
    if let Some(related) = body.related_id {
        notification = notification.with_related(related);
    }

    state
        .repos
        .notifications
        .insert_notification(&notification)
        .await?;
    state
        .bus
        .publish(principal.org_id, BusEvent::NotificationsUpdate)
        .await;

    Ok((StatusCode::CREATED, Json(notification_json(&notification))).into_response())
}

/// POST /notifications/:id/read
pub async fn mark_read(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .repos
        .notifications
        .mark_read(principal.org_id, id)
        .await?;
    state
        .bus
        .publish(principal.org_id, BusEvent::NotificationsUpdate)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /notifications/read-all
pub async fn mark_all_read(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> Result<StatusCode, ApiError> {
    state
        .repos
        .notifications
        .mark_all_read(principal.org_id)
        .await?;
    state
        .bus
        .publish(principal.org_id, BusEvent::NotificationsUpdate)
        .await;
    Ok(StatusCode::NO_CONTENT)
}
