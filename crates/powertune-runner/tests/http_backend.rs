use powertune_runner::{
    ExecutionHandle, ExecutionStatus, FileTokenStore, HttpBackend, OperationType, Schedule,
    TokenStore, TunerBackend, TunerConfig, TunerDraft, TunerError, TunerSession,
};
use std::io::Read;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server};

const ARN: &str = "arn:aws:lambda:eu-west-1:123456789012:function:checkout";

struct Seen {
    url: String,
    body: String,
    api_key: Option<String>,
}

/// Serve `responses` in order, one per request, then stop.
fn spawn_backend(responses: Vec<(u16, &'static str)>) -> (String, thread::JoinHandle<Vec<Seen>>) {
    let server = Server::http("127.0.0.1:0").expect("bind test server");
    let addr = server.server_addr().to_ip().expect("ip listener");
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for (code, body) in responses {
            let mut request = server.recv().expect("request");
            let mut received = String::new();
            request
                .as_reader()
                .read_to_string(&mut received)
                .expect("request body");
            let api_key = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("x-api-key"))
                .map(|h| h.value.as_str().to_string());
            seen.push(Seen {
                url: request.url().to_string(),
                body: received,
                api_key,
            });
            let response = Response::from_string(body)
                .with_status_code(code)
                .with_header(
                    Header::from_bytes("Content-Type", "application/json").expect("header"),
                );
            request.respond(response).expect("respond");
        }
        seen
    });
    (format!("http://{}", addr), handle)
}

fn config(endpoint: &str) -> TunerConfig {
    TunerConfig {
        endpoint: endpoint.to_string(),
        api_key: Some("secret".to_string()),
        ..TunerConfig::default()
    }
}

#[test]
fn submit_posts_request_and_reads_token() {
    let (endpoint, server) = spawn_backend(vec![(200, r#"{"executionToken":"exec-42"}"#)]);
    let backend = HttpBackend::new(&config(&endpoint)).expect("backend");

    let mut draft = TunerDraft::default();
    draft.set_lambda_arn(ARN);
    draft.set_use_custom(true);
    draft.set_power_values(vec![128, 512]);
    let handle = backend
        .submit_tuning(&draft.to_request().expect("request"))
        .expect("submit");
    assert_eq!(handle, ExecutionHandle::new("exec-42"));

    let seen = server.join().expect("server thread");
    assert_eq!(seen[0].url, "/power-tuner");
    assert_eq!(seen[0].api_key.as_deref(), Some("secret"));
    let body: serde_json::Value = serde_json::from_str(&seen[0].body).expect("json body");
    assert_eq!(body["lambdaARN"], ARN);
    assert_eq!(body["powerValues"], serde_json::json!([128, 512]));
    assert_eq!(body["num"], 10);
}

#[test]
fn status_decodes_string_output() {
    let (endpoint, server) = spawn_backend(vec![(
        200,
        r#"{"status":"SUCCEEDED","output":"{\"stateMachine\":{\"visualization\":\"https://x\"}}"}"#,
    )]);
    let backend = HttpBackend::new(&config(&endpoint)).expect("backend");
    let response = backend
        .get_tuning_status(&ExecutionHandle::new("exec-42"))
        .expect("status");
    assert_eq!(response.status, ExecutionStatus::Succeeded);
    assert!(response.output.expect("output").contains("visualization"));

    let seen = server.join().expect("server thread");
    assert_eq!(seen[0].url, "/power-tuner/status");
    let body: serde_json::Value = serde_json::from_str(&seen[0].body).expect("json body");
    assert_eq!(body, serde_json::json!({"executionToken": "exec-42"}));
}

#[test]
fn non_success_status_is_a_transport_error() {
    let (endpoint, server) = spawn_backend(vec![(502, r#"{"message":"bad gateway"}"#)]);
    let backend = HttpBackend::new(&config(&endpoint)).expect("backend");
    let err = backend
        .get_tuning_status(&ExecutionHandle::new("exec-42"))
        .expect_err("must fail");
    match err {
        TunerError::Transport(msg) => assert!(msg.contains("502"), "{}", msg),
        other => panic!("unexpected error: {}", other),
    }
    server.join().expect("server thread");
}

#[test]
fn session_resumes_stored_token_over_http() {
    let (endpoint, server) = spawn_backend(vec![
        (200, r#"{"status":"RUNNING"}"#),
        (
            200,
            r#"{"status":"SUCCEEDED","output":"{\"power\":256,\"stateMachine\":{\"visualization\":\"https://viz\"}}"}"#,
        ),
    ]);
    let root = std::env::temp_dir().join(format!(
        "powertune_http_session_{}_{}",
        std::process::id(),
        chrono::Utc::now().timestamp_micros()
    ));
    let token_path = root.join("token.json");
    let mut store = FileTokenStore::new(&token_path);
    store.set("exec-resumed").expect("seed token");

    let backend = HttpBackend::new(&config(&endpoint)).expect("backend");
    let mut session = TunerSession::new(
        Box::new(backend),
        Box::new(FileTokenStore::new(&token_path)),
        Schedule::new(Duration::from_millis(5), 4),
    )
    .expect("session");
    session
        .draft_mut()
        .set_operation_type(OperationType::ExistingExecution);

    let result = session.start_tuning().expect("tuning");
    assert_eq!(result.power, Some(256));
    assert!(session.state().results_back);
    assert_eq!(
        session.state().visualisation_url.as_ref().map(|u| u.as_str()),
        Some("https://viz")
    );

    let seen = server.join().expect("server thread");
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|s| s.url == "/power-tuner/status"));
    assert_eq!(store.get().expect("get").as_deref(), Some("exec-resumed"));
    let _ = std::fs::remove_dir_all(root);
}
