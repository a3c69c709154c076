use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::access::{AccessGrant, AccessPolicy};
use crate::backend::GpioBackend;
use crate::config::PinRecord;
use crate::error::AppError;
use crate::gpio::{GpioManager, StateChange};
use crate::state::LogicalState;

pub const API_KEY_HEADER: &str = "X-Api-Key";

pub struct AppState<B: GpioBackend> {
    pub manager: Arc<GpioManager<B>>,
    pub access: Arc<AccessPolicy>,
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            access: Arc::clone(&self.access),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
enum CommandPayload {
    TurnGpioOn { id: usize },
    TurnGpioOff { id: usize },
    GetGpioState { id: usize },
}

async fn handle_state_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<StateChange>,
    pin_filter: Option<usize>,
) {
    let mut changes = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            change = changes.next() => {
                let Some(change) = change else { break; };

                match change {
                    Ok(change) => {
                        if pin_filter.map(|id| id == change.id).unwrap_or(true) {
                            if let Ok(text) = serde_json::to_string(&change) {
                                if session.text(text).await.is_err() {
                                    warn!("WebSocket client disconnected");
                                    break;
                                }
                            }
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        if session.text(AppError::Gpio(format!("State stream lagged by {n} messages")).to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<B: GpioBackend + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/board")
                    .route(web::get().to(board::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpios")
                    .route(web::get().to(list_states::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpios/configuration")
                    .route(web::get().to(get_configuration::<B>))
                    .route(web::post().to(save_configuration::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpios/events")
                    .route(web::get().to(events_ws_all::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpio/{pin_id}")
                    .route(web::get().to(pin_descriptor::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpio/{pin_id}/state")
                    .route(web::get().to(get_state::<B>))
                    .route(web::post().to(set_state::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpio/{pin_id}/events")
                    .route(web::get().to(events_ws_pin::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/command")
                    .route(web::post().to(command::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn board<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.manager.registry().board().to_vec()))
}

async fn list_states<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let states = state.manager.get_all_states()?;

    Ok(web::Json(states))
}

async fn get_configuration<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let records = state.manager.configuration()?;

    Ok(web::Json(records))
}

async fn save_configuration<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let grant = authorize(&req, &state)?;
    let records = parse_configuration_payload(&body)?;

    state.manager.save_configuration(&grant, records)?;

    Ok(web::Json(state.manager.configuration()?))
}

async fn pin_descriptor<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let pin_id = parse_pin_id(&req)?;
    let desc = state.manager.describe(pin_id)?;

    Ok(web::Json(desc))
}

async fn get_state<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let pin_id = parse_pin_id(&req)?;
    let pin_state = state.manager.get_state(pin_id)?;

    Ok(web::Json(pin_state))
}

async fn set_state<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let grant = authorize(&req, &state)?;
    let pin_id = parse_pin_id(&req)?;
    let target = parse_state_payload(&body)?;

    state.manager.set_state(&grant, pin_id, target)?;

    Ok(HttpResponse::Ok())
}

async fn command<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let payload: CommandPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidValue(format!("Invalid command payload: {e}")))?;

    match payload {
        CommandPayload::GetGpioState { id } => {
            let pin_state = state.manager.get_state(id)?;
            Ok(HttpResponse::Ok().json(pin_state))
        }
        CommandPayload::TurnGpioOn { id } => {
            let grant = authorize(&req, &state)?;
            state.manager.turn_on(&grant, id)?;
            Ok(HttpResponse::NoContent().finish())
        }
        CommandPayload::TurnGpioOff { id } => {
            let grant = authorize(&req, &state)?;
            state.manager.turn_off(&grant, id)?;
            Ok(HttpResponse::NoContent().finish())
        }
    }
}

async fn events_ws_all<B: GpioBackend + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    start_websocket(&req, stream, &state, None)
}

async fn events_ws_pin<B: GpioBackend + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let pin_id = parse_pin_id(&req)?;
    state.manager.describe(pin_id)?;

    start_websocket(&req, stream, &state, Some(pin_id))
}

fn start_websocket<B: GpioBackend + 'static>(
    req: &HttpRequest,
    stream: web::Payload,
    state: &AppState<B>,
    pin_filter: Option<usize>,
) -> Result<HttpResponse, AppError> {
    let rx = state.manager.subscribe_events();
    let (response, session, client_stream) = actix_ws::handle(req, stream)
        .map_err(|e| AppError::Gpio(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_state_websocket(session, client_stream, rx, pin_filter).await;
    });

    Ok(response)
}

fn authorize<B: GpioBackend>(
    req: &HttpRequest,
    state: &AppState<B>,
) -> Result<AccessGrant, AppError> {
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    state.access.check(presented)
}

fn parse_state_payload(body: &[u8]) -> Result<LogicalState, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty state payload".into()));
    }

    match std::str::from_utf8(body) {
        Ok(text) => text.trim().trim_matches('"').parse::<LogicalState>(),
        _ => Err(AppError::InvalidValue(
            "State payload must be valid UTF-8".into(),
        )),
    }
}

fn parse_configuration_payload(body: &[u8]) -> Result<Vec<PinRecord>, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty configuration payload".into()));
    }

    serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidValue(format!("Invalid configuration payload: {e}")))
}

fn parse_pin_id(req: &HttpRequest) -> Result<usize, AppError> {
    let pin_id = req
        .match_info()
        .get("pin_id")
        .ok_or_else(|| AppError::InvalidValue("Missing pin id".into()))?;
    let pin_id = pin_id
        .parse::<usize>()
        .map_err(|_| AppError::InvalidValue("Invalid pin id".into()))?;

    Ok(pin_id)
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
