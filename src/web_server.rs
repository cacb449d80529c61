use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{Response, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    serve, Router,
};
use futures::{sink::SinkExt, stream::StreamExt, Sink};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::chat::ChatSession;
use crate::constants;
use crate::llm_interaction::{CompletionClient, RemoteErrorKind, RemoteServiceError};
use crate::markdown;
use crate::transcript::{Role, Turn};

/// Frames the browser sends.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Submit { content: String },
}

/// A turn as the browser draws it. Assistant turns also carry rendered HTML.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnView {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl From<&Turn> for TurnView {
    fn from(turn: &Turn) -> Self {
        let html = match turn.role() {
            Role::Assistant => Some(markdown::render_reply(turn.content())),
            _ => None,
        };
        Self {
            role: turn.role(),
            content: turn.content().to_string(),
            html,
        }
    }
}

/// Frames sent back to the browser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    History { turns: Vec<TurnView> },
    Turn(TurnView),
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Auth,
    RateLimit,
    Status,
    Malformed,
    BadFrame,
}

impl From<RemoteErrorKind> for ErrorKind {
    fn from(kind: RemoteErrorKind) -> Self {
        match kind {
            RemoteErrorKind::Network => ErrorKind::Network,
            RemoteErrorKind::Auth => ErrorKind::Auth,
            RemoteErrorKind::RateLimit => ErrorKind::RateLimit,
            RemoteErrorKind::Status => ErrorKind::Status,
            RemoteErrorKind::Malformed => ErrorKind::Malformed,
        }
    }
}

impl From<&RemoteServiceError> for ServerEvent {
    fn from(err: &RemoteServiceError) -> Self {
        ServerEvent::Error {
            kind: err.kind.into(),
            message: err.to_string(),
            retry_after_secs: err.retry_after.map(|d| d.as_secs()),
        }
    }
}

/// What a client frame did to the session.
#[derive(Debug, PartialEq)]
pub enum FrameOutcome {
    /// Blank submission: nothing appended, nothing to send.
    Ignored,
    /// Unreadable frame: report it, the transcript is untouched.
    Rejected(ServerEvent),
    /// User turn appended; send it, then ask for the reply.
    Accepted(ServerEvent),
}

// Shared, read-only application state. Conversation state is not here: every
// socket owns its own `ChatSession`.
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    completion: Arc<CompletionClient>,
    model: Arc<str>,
    system_prompt: Arc<str>,
}

impl AppState {
    pub fn new(completion: CompletionClient, model: &str, system_prompt: &str) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env()),
            completion: Arc::new(completion),
            model: Arc::from(model),
            system_prompt: Arc::from(system_prompt),
        }
    }
}

fn create_minijinja_env() -> AutoReloader {
    AutoReloader::new(|notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader("templates"));
        notifier.watch_path("templates", true);
        Ok(env)
    })
}

async fn index_handler(
    State(state): State<AppState>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    title => constants::APP_TITLE,
                    caption => constants::APP_CAPTION,
                    placeholder => constants::INPUT_PLACEHOLDER,
                })
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
        })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Parses one client frame and, for a real submission, appends the user turn.
/// Never calls the model.
pub fn accept_frame(session: &mut ChatSession, text: &str) -> FrameOutcome {
    let content = match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Submit { content }) => content,
        Err(e) => {
            warn!("Unreadable frame from client: {}", e);
            return FrameOutcome::Rejected(ServerEvent::Error {
                kind: ErrorKind::BadFrame,
                message: format!("unreadable frame: {}", e),
                retry_after_secs: None,
            });
        }
    };

    match session.accept(&content) {
        Some(turn) => FrameOutcome::Accepted(ServerEvent::Turn(TurnView::from(turn))),
        None => {
            debug!("Ignoring blank submission");
            FrameOutcome::Ignored
        }
    }
}

/// Asks the model for the reply to the turn `accept_frame` just recorded.
pub async fn answer_pending(
    session: &mut ChatSession,
    completion: &CompletionClient,
    model: &str,
) -> ServerEvent {
    match session.answer(completion, model).await {
        Ok(reply) => ServerEvent::Turn(TurnView::from(&Turn::new(Role::Assistant, reply))),
        Err(e) => {
            warn!(kind = ?e.kind, "Completion failed for submission");
            ServerEvent::from(&e)
        }
    }
}

// One socket is one session. Frames are handled strictly one after another, so
// the transcript never sees two submissions at once.
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();
    let mut session = ChatSession::new(&*state.system_prompt);

    let history = ServerEvent::History {
        turns: session.visible_turns().iter().map(TurnView::from).collect(),
    };
    if send_event(&mut sender, &history).await.is_err() {
        warn!("Failed to send history to new WebSocket client");
        return;
    }

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!("Client requested WebSocket close");
                break;
            }
            Ok(Message::Binary(_)) => {
                warn!("Received unexpected binary message from client");
                continue;
            }
            // Axum answers pings itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        };

        let event = match accept_frame(&mut session, &text) {
            FrameOutcome::Ignored => continue,
            FrameOutcome::Rejected(event) => event,
            FrameOutcome::Accepted(user_turn) => {
                // The user's turn is on screen before the remote call starts.
                if send_event(&mut sender, &user_turn).await.is_err() {
                    warn!("WebSocket client disconnected or send error. Closing connection.");
                    break;
                }
                answer_pending(&mut session, &state.completion, &state.model).await
            }
        };
        if send_event(&mut sender, &event).await.is_err() {
            warn!("WebSocket client disconnected or send error. Closing connection.");
            break;
        }
    }
    info!("WebSocket connection closed");
}

async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> Result<()>
where
    S: Sink<Message> + Unpin,
    <S as Sink<Message>>::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(event).context("Failed to serialize server event")?;
    sender.send(Message::Text(json)).await?;
    Ok(())
}

async fn not_found(_req: Request) -> Result<Response<Body>, Infallible> {
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("Not Found"))
        .unwrap_or_default())
}

pub fn build_router(state: AppState) -> Router {
    let static_files_service =
        ServeDir::new("static").not_found_service(tower::service_fn(not_found));

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(port: u16, state: AppState) -> Result<()> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
