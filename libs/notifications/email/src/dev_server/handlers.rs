use super::{DevServerError, DevServerState, UpdateEvent};
use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::header,
    response::{Html, IntoResponse, Response},
};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{debug, info, warn};

const INDEX_HTML: &str = include_str!("index.html");

type ApiResult<T> = Result<T, DevServerError>;

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn list_templates(State(state): State<DevServerState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.registry.list_templates().await?))
}

pub async fn get_template(
    State(state): State<DevServerState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let content = state.registry.read_source(&name).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], content).into_response())
}

pub async fn update_template(
    State(state): State<DevServerState>,
    Path(name): Path<String>,
    body: String,
) -> ApiResult<String> {
    state.registry.write_source(&name, &body).await?;
    state.broadcast(UpdateEvent::TemplateUpdated {
        template_name: name.clone(),
    });
    Ok(format!("Template {name} updated successfully"))
}

/// Render the submitted (unsaved) template body with the best sample data.
pub async fn preview_template(
    State(state): State<DevServerState>,
    Path(name): Path<String>,
    body: String,
) -> ApiResult<Html<String>> {
    let data = state.samples.preview_data(&name).await;
    let html = state.registry.render_inline(&body, &data).await?;
    Ok(Html(html))
}

pub async fn list_samples(State(state): State<DevServerState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.samples.list().await?))
}

pub async fn get_sample(
    State(state): State<DevServerState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let content = state.samples.read(&name).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], content).into_response())
}

pub async fn update_sample(
    State(state): State<DevServerState>,
    Path(name): Path<String>,
    body: String,
) -> ApiResult<String> {
    let sample_name = state.samples.write(&name, &body).await?;
    state.broadcast(UpdateEvent::SampleUpdated {
        sample_name: sample_name.clone(),
    });
    Ok(format!("Sample {sample_name} updated successfully"))
}

pub async fn websocket(ws: WebSocketUpgrade, State(state): State<DevServerState>) -> Response {
    let updates = state.subscribe();
    ws.on_upgrade(move |socket| forward_updates(socket, updates))
}

/// Push update frames until the client goes away.
async fn forward_updates(mut socket: WebSocket, mut updates: Receiver<String>) {
    info!("WebSocket client connected");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(frame) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagging, updates dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => debug!("Ignoring client WebSocket frame"),
            },
        }
    }

    info!("WebSocket client disconnected");
}
