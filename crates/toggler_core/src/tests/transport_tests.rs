use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use parking_lot::Mutex;
use shared::{domain::CommandState, protocol::SET_CONTROL_PARAMETER_TOPIC};
use tokio::net::TcpListener;

use super::*;
use crate::{auth::SignedHeaders, toggler::ControlToggler};

#[derive(Debug, Clone)]
struct SeenRequest {
    method: Method,
    uri: String,
    signed: bool,
}

#[derive(Clone)]
struct ServerState {
    base_url: String,
    credentials: Arc<Credentials>,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
    enqueued: Arc<Mutex<Vec<EnqueueCommandForm>>>,
    cancelled: Arc<Mutex<Vec<(String, CommandState)>>>,
}

impl ServerState {
    fn record(&self, method: &Method, uri: &Uri, headers: &HeaderMap) {
        let url = format!("{}{uri}", self.base_url);
        let signed = SignedHeaders::from_headers(headers)
            .is_some_and(|signed| self.credentials.verify(&signed, method, &url));
        self.requests.lock().push(SeenRequest {
            method: method.clone(),
            uri: uri.to_string(),
            signed,
        });
    }
}

fn command(id: &str, state: CommandState, parameters: Vec<CommandParameter>) -> Command {
    Command {
        id: CommandId::new(id),
        created_at: Utc::now(),
        topic: SET_CONTROL_PARAMETER_TOPIC.to_string(),
        state,
        parameters,
    }
}

async fn handle_enqueue(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(_device_id): Path<String>,
    Form(form): Form<EnqueueCommandForm>,
) -> Json<ApiResponse<Command>> {
    state.record(&method, &uri, &headers);
    let parameters = form.decode_parameters().unwrap_or_default();
    state.enqueued.lock().push(form);
    Json(ApiResponse::ok(command("cmd-1", CommandState::Queued, parameters)))
}

async fn handle_cancel(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(command_id): Path<String>,
    Form(form): Form<CancelCommandForm>,
) -> Json<ApiResponse<serde_json::Value>> {
    state.record(&method, &uri, &headers);
    state.cancelled.lock().push((command_id, form.state));
    Json(ApiResponse::empty())
}

async fn handle_get_command(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(command_id): Path<String>,
) -> Response {
    state.record(&method, &uri, &headers);
    match command_id.as_str() {
        "cmd-1" => Json(ApiResponse::ok(command(
            "cmd-1",
            CommandState::Completed,
            vec![CommandParameter::new("heater", "1")],
        )))
        .into_response(),
        "missing" => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<Command>::failure(
                "command not found",
                Some("E_NOT_FOUND".into()),
            )),
        )
            .into_response(),
        "anonymous-failure" => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "success": false })),
        )
            .into_response(),
        "empty" => Json(ApiResponse::<Command>::empty()).into_response(),
        "teapot" => (
            StatusCode::IM_A_TEAPOT,
            Json(ApiResponse::ok(command("teapot", CommandState::Queued, Vec::new()))),
        )
            .into_response(),
        _ => (StatusCode::BAD_GATEWAY, "upstream exploded").into_response(),
    }
}

async fn handle_pending(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<PendingCommandsQuery>,
) -> Json<ApiResponse<Vec<Command>>> {
    state.record(&method, &uri, &headers);
    if !query.pending {
        return Json(ApiResponse::ok(Vec::new()));
    }
    Json(ApiResponse::ok(vec![
        command(
            "cmd-1",
            CommandState::Queued,
            vec![CommandParameter::new("heater", "1")],
        ),
        command(
            "cmd-2",
            CommandState::Executing,
            vec![CommandParameter::new("pump", "0")],
        ),
    ]))
}

async fn handle_readings(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<ReadingQuery>,
) -> Json<ApiResponse<Vec<ControlReading>>> {
    state.record(&method, &uri, &headers);
    Json(ApiResponse::ok(vec![ControlReading {
        created_at: Utc::now() - chrono::Duration::seconds(30),
        source_id: ControlId::new(query.source),
        value: 0.into(),
    }]))
}

async fn spawn_api_server(credentials: Credentials) -> anyhow::Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let base_url = format!("http://{addr}");
    let state = ServerState {
        base_url: base_url.clone(),
        credentials: Arc::new(credentials),
        requests: Arc::new(Mutex::new(Vec::new())),
        enqueued: Arc::new(Mutex::new(Vec::new())),
        cancelled: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route(
            "/devices/:device_id/commands",
            post(handle_enqueue).get(handle_pending),
        )
        .route(
            "/commands/:command_id",
            get(handle_get_command).put(handle_cancel),
        )
        .route("/devices/:device_id/readings", get(handle_readings))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((base_url, state))
}

fn credentials() -> Credentials {
    Credentials::new("device-key", "device-secret")
}

#[tokio::test]
async fn enqueue_posts_signed_form_and_decodes_command() {
    let (base_url, state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, credentials()).expect("api");

    let command = api
        .enqueue_command(
            &DeviceId::new("device-1"),
            SET_CONTROL_PARAMETER_TOPIC,
            &[CommandParameter::new("heater", "1")],
        )
        .await
        .expect("enqueue");

    assert_eq!(command.id, CommandId::new("cmd-1"));
    assert_eq!(command.state, CommandState::Queued);
    let enqueued = state.enqueued.lock().clone();
    assert_eq!(enqueued.len(), 1);
    assert_eq!(enqueued[0].topic, SET_CONTROL_PARAMETER_TOPIC);
    assert_eq!(enqueued[0].parameters, r#"[{"name":"heater","value":"1"}]"#);

    let requests = state.requests.lock().clone();
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].uri, "/devices/device-1/commands");
    assert!(requests[0].signed);
}

#[tokio::test]
async fn cancel_declines_the_command() {
    let (base_url, state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&format!("{base_url}/"), credentials()).expect("api");

    api.cancel_command(&CommandId::new("cmd-9"))
        .await
        .expect("cancel");

    assert_eq!(
        *state.cancelled.lock(),
        vec![("cmd-9".to_string(), CommandState::Declined)]
    );
    let requests = state.requests.lock().clone();
    assert_eq!(requests[0].method, Method::PUT);
    assert!(requests[0].signed);
}

#[tokio::test]
async fn ids_are_escaped_as_single_path_segments() {
    let (base_url, state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, credentials()).expect("api");

    api.cancel_command(&CommandId::new("cmd/9?x#y"))
        .await
        .expect("cancel");

    assert_eq!(
        *state.cancelled.lock(),
        vec![("cmd/9?x#y".to_string(), CommandState::Declined)]
    );
    let requests = state.requests.lock().clone();
    assert_eq!(requests[0].uri, "/commands/cmd%2F9%3Fx%23y");
    assert!(requests[0].signed);
}

#[tokio::test]
async fn get_requests_carry_query_in_the_signature() {
    let (base_url, state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, credentials()).expect("api");

    let pending = api
        .pending_commands(&DeviceId::new("device-1"))
        .await
        .expect("pending");
    let readings = api
        .most_recent_readings(&DeviceId::new("device-1"), &ControlId::new("heater"))
        .await
        .expect("readings");

    assert_eq!(pending.len(), 2);
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].source_id, ControlId::new("heater"));

    let requests = state.requests.lock().clone();
    assert_eq!(requests[0].uri, "/devices/device-1/commands?pending=true");
    assert_eq!(
        requests[1].uri,
        "/devices/device-1/readings?source=heater&latest=true"
    );
    assert!(requests.iter().all(|request| request.signed));
}

#[tokio::test]
async fn wrong_secret_is_visible_to_the_server() {
    let (base_url, state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, Credentials::new("device-key", "stale-secret")).expect("api");

    api.get_command(&CommandId::new("cmd-1"))
        .await
        .expect("server does not enforce");

    assert!(!state.requests.lock()[0].signed);
}

#[tokio::test]
async fn failure_envelope_maps_to_application_error_with_code() {
    let (base_url, _state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, credentials()).expect("api");

    let err = api
        .get_command(&CommandId::new("missing"))
        .await
        .expect_err("must fail");

    assert!(err.is_application());
    assert_eq!(err.to_string(), "command not found (E_NOT_FOUND)");
}

#[tokio::test]
async fn failure_envelope_without_message_reports_status() {
    let (base_url, _state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, credentials()).expect("api");

    let err = api
        .get_command(&CommandId::new("anonymous-failure"))
        .await
        .expect_err("must fail");

    assert!(err.is_application());
    assert_eq!(err.to_string(), "HTTP 409");
}

#[tokio::test]
async fn unreadable_body_maps_to_status_error() {
    let (base_url, _state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, credentials()).expect("api");

    let err = api
        .get_command(&CommandId::new("anything-else"))
        .await
        .expect_err("must fail");

    assert!(err.is_transport());
    assert_eq!(err.to_string(), "HTTP 502: Bad Gateway");
}

#[tokio::test]
async fn successful_envelope_with_error_status_is_a_transport_error() {
    let (base_url, _state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, credentials()).expect("api");

    let err = api
        .get_command(&CommandId::new("teapot"))
        .await
        .expect_err("must fail");

    assert!(err.is_transport());
    assert_eq!(err.to_string(), "HTTP 418: I'm a teapot");
}

#[tokio::test]
async fn missing_data_is_rejected_where_required() {
    let (base_url, _state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, credentials()).expect("api");

    let err = api
        .get_command(&CommandId::new("empty"))
        .await
        .expect_err("must fail");

    assert!(err.is_transport());
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let api = HttpApi::new(&format!("http://{addr}"), credentials()).expect("api");

    let err = api
        .pending_commands(&DeviceId::new("device-1"))
        .await
        .expect_err("must fail");

    assert!(err.is_transport());
    assert!(matches!(err, ApiError::Request(_)));
}

#[tokio::test]
async fn invalid_credentials_never_reach_the_network() {
    let (base_url, state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = HttpApi::new(&base_url, Credentials::new("device-key", "")).expect("api");

    assert!(CommandQueue::check_credentials(&api)
        .expect_err("blank secret")
        .is_invalid_credentials());
    let err = api
        .get_command(&CommandId::new("cmd-1"))
        .await
        .expect_err("must fail");

    assert!(err.is_invalid_credentials());
    assert!(state.requests.lock().is_empty());
}

#[test]
fn base_url_must_be_http() {
    assert!(HttpApi::new("ftp://example.com", credentials()).is_err());
    assert!(HttpApi::new("not a url", credentials()).is_err());
    let api = HttpApi::new("https://api.example.com/v1/", credentials()).expect("api");
    assert_eq!(api.base_url(), "https://api.example.com/v1");
}

#[tokio::test]
async fn toggler_drives_the_http_api_end_to_end() {
    let (base_url, state) = spawn_api_server(credentials()).await.expect("spawn server");
    let api = Arc::new(HttpApi::new(&base_url, credentials()).expect("api"));
    let toggler = ControlToggler::new(api, DeviceId::new("device-1"), ControlId::new("heater"));

    let value = toggler.update().await.expect("first refresh");
    assert_eq!(value, Some(0.into()));
    assert!(toggler.has_pending_state_change());

    let value = toggler.update().await.expect("second refresh");
    assert_eq!(value, Some("1".into()));
    assert!(!toggler.has_pending_state_change());

    let requests = state.requests.lock().clone();
    assert!(requests
        .iter()
        .any(|request| request.uri == "/commands/cmd-1" && request.method == Method::GET));
}
