//! Item endpoints: deletion requests, ingestion, downloads and listings

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use logcdn_core::models::{ApiRef, DeleteSelector, Item, ItemType, Line, MarkDeleteRequest};
use logcdn_core::service::LogMessage;

use super::{AppError, AppResult, AppState};

/// Flag every item of a run or of a workflow for deletion.
///
/// Content stays readable until the purge loop removes it.
pub async fn mark_delete(
    State(state): State<AppState>,
    Json(req): Json<MarkDeleteRequest>,
) -> AppResult<StatusCode> {
    let selector = DeleteSelector::try_from(req)?;
    state.items.mark_to_delete(selector).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct StoreLogRequest {
    pub api_ref: ApiRef,
    #[serde(flatten)]
    pub message: LogMessage,
}

/// Ingest one worker message
pub async fn store_log(
    State(state): State<AppState>,
    Path(item_type): Path<String>,
    Json(req): Json<StoreLogRequest>,
) -> AppResult<Json<Item>> {
    let item_type: ItemType = item_type.parse()?;
    let item = state.ingestor.store_log(item_type, req.api_ref, req.message).await?;
    Ok(Json(item))
}

/// Full rendered content as plain text
pub async fn download(
    State(state): State<AppState>,
    Path((item_type, api_ref_hash)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let item = resolve_item(&state, &item_type, &api_ref_hash).await?;
    let lines = state.hub.get_lines(&item.id, 0, None).await?;
    let body: String = lines.into_iter().map(|line| line.value).collect();

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body))
}

#[derive(Debug, Default, Deserialize)]
pub struct LinesQuery {
    #[serde(default)]
    pub offset: i64,
    pub limit: Option<usize>,
}

/// Stored lines with `number >= offset`
pub async fn lines(
    State(state): State<AppState>,
    Path((item_type, api_ref_hash)): Path<(String, String)>,
    Query(query): Query<LinesQuery>,
) -> AppResult<Json<Vec<Line>>> {
    if query.offset < 0 {
        return Err(AppError::bad_request("offset must not be negative"));
    }
    let item = resolve_item(&state, &item_type, &api_ref_hash).await?;
    let lines = state.hub.get_lines(&item.id, query.offset, query.limit).await?;
    Ok(Json(lines))
}

/// Look up the live item addressed by `(type, api_ref_hash)`
pub(super) async fn resolve_item(state: &AppState, item_type: &str, api_ref_hash: &str) -> AppResult<Item> {
    let item_type: ItemType = item_type.parse()?;
    state
        .items
        .get_item_by_ref(item_type, api_ref_hash)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No {item_type} item for {api_ref_hash}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::create_router;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
        Router,
    };
    use logcdn_core::{bootstrap::init_services, models::ItemStatus, Config};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    async fn app() -> (Router, AppState) {
        let services = init_services(None, &Config::default()).await.unwrap();
        let state = AppState::new(&services, CancellationToken::new());
        (create_router(state.clone()), state)
    }

    fn api_ref(run_id: i64, workflow_id: i64) -> ApiRef {
        ApiRef {
            project_key: "PROJ".to_string(),
            workflow_id,
            run_id,
            step_name: "build".to_string(),
            ..Default::default()
        }
    }

    async fn ingest(state: &AppState, api_ref: ApiRef, count: i64) -> Item {
        let mut item = None;
        for n in 0..count {
            let message = LogMessage {
                level: logcdn_core::models::LogLevel::Info,
                text: format!("line {n}"),
                line: n,
                terminal: false,
            };
            item = Some(state.ingestor.store_log(ItemType::StepLog, api_ref.clone(), message).await.unwrap());
        }
        item.unwrap()
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_mark_delete_by_run() {
        let (app, state) = app().await;
        let first = ingest(&state, api_ref(1, 1), 1).await;
        let second = ingest(&state, api_ref(2, 2), 1).await;

        let response = app
            .oneshot(post_json("/item/delete", &json!({ "run_id": 2 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        assert!(!state.items.get_item(&first.id).await.unwrap().unwrap().to_delete);
        assert!(state.items.get_item(&second.id).await.unwrap().unwrap().to_delete);
    }

    #[tokio::test]
    async fn test_mark_delete_without_selector_is_rejected() {
        let (app, _) = app().await;
        let response = app.oneshot(post_json("/item/delete", &json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_download_renders_formatted_lines() {
        let (app, state) = app().await;
        let item = ingest(&state, api_ref(1, 1), 2).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/item/step-log/{}/download", item.api_ref_hash))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "[INFO] line 0\n[INFO] line 1\n");
    }

    #[tokio::test]
    async fn test_lines_honors_offset_and_limit() {
        let (app, state) = app().await;
        let item = ingest(&state, api_ref(1, 1), 5).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/item/step-log/{}/lines?offset=2&limit=2", item.api_ref_hash))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let lines: Vec<Line> = serde_json::from_str(&body_string(response).await).unwrap();
        let numbers: Vec<i64> = lines.iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let (app, _) = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/item/step-log/deadbeef/download")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_item_type_is_bad_request() {
        let (app, _) = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/item/build-log/deadbeef/lines")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_store_log_endpoint_creates_item() {
        let (app, state) = app().await;
        let body = json!({
            "api_ref": api_ref(7, 3),
            "level": "ERROR",
            "text": "boom",
            "line": 0,
            "terminal": true,
        });

        let response = app.oneshot(post_json("/item/step-log/log", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let item: Item = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        let lines = state.hub.get_lines(&item.id, 0, None).await.unwrap();
        assert_eq!(lines, vec![Line::new(0, "[ERROR] boom\n")]);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (app, state) = app().await;
        ingest(&state, api_ref(1, 1), 1).await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_string(response).await, "OK");

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("logcdn_lines_ingested_total"));
    }
}
