use std::collections::HashMap;
use std::io::Read;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use ideacheck_contracts::refine::RevisionRequest;
use ideacheck_engine::client::{GenerationCall, GenerationService, OutputFormat, ServiceError};
use ideacheck_engine::{OpenAiResponsesClient, Reconciler, RefineConfig};
use serde_json::{json, Value};
use tiny_http::{Header, Response, Server, StatusCode};

struct Captured {
    url: String,
    authorization: Option<String>,
    body: Value,
}

/// Serves `replies` in order, one per request, and reports what it received.
fn spawn_responses_server(
    replies: Vec<(u16, String)>,
) -> Result<(String, mpsc::Receiver<Captured>, thread::JoinHandle<()>)> {
    let server = Server::http("127.0.0.1:0").map_err(|err| anyhow::anyhow!("{err}"))?;
    let base = format!("http://{}", server.server_addr());
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        for (status, body) in replies {
            let mut req = match server.recv_timeout(Duration::from_secs(5)) {
                Ok(Some(req)) => req,
                Ok(None) | Err(_) => break,
            };
            let mut raw = String::new();
            let _ = req.as_reader().read_to_string(&mut raw);
            let authorization = req
                .headers()
                .iter()
                .find(|header| header.field.equiv("Authorization"))
                .map(|header| header.value.as_str().to_string());
            let _ = tx.send(Captured {
                url: req.url().to_string(),
                authorization,
                body: serde_json::from_str(&raw).unwrap_or(Value::Null),
            });
            let response = Response::from_data(body.into_bytes())
                .with_status_code(StatusCode(status))
                .with_header(
                    Header::from_bytes("Content-Type", "application/json")
                        .expect("content type header"),
                );
            let _ = req.respond(response);
        }
    });
    Ok((base, rx, handle))
}

fn config_for(base: &str) -> RefineConfig {
    let env: HashMap<&str, String> = HashMap::from([
        ("OPENAI_API_KEY", "sk-test".to_string()),
        ("OPENAI_API_BASE", base.to_string()),
        ("OPENAI_MODEL", "test-model".to_string()),
    ]);
    RefineConfig::from_lookup(|key| env.get(key).cloned())
}

#[test]
fn posts_responses_payload_with_bearer_auth() -> Result<()> {
    let (base, rx, handle) =
        spawn_responses_server(vec![(200, json!({ "output_text": "hi" }).to_string())])?;
    let config = config_for(&base);
    let client = OpenAiResponsesClient::new(&config);
    assert_eq!(client.endpoint(), format!("{base}/v1/responses"));

    let call = GenerationCall::new(
        &config,
        "Say hi".to_string(),
        OutputFormat::JsonSchema(json!({ "type": "object" })),
    );
    let reply = client.generate(&call)?;
    handle.join().map_err(|_| anyhow::anyhow!("server thread panicked"))?;

    assert_eq!(reply.status, 200);
    let captured = rx.recv_timeout(Duration::from_secs(1))?;
    assert_eq!(captured.url, "/v1/responses");
    assert_eq!(captured.authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(captured.body["model"], json!("test-model"));
    assert_eq!(captured.body["max_output_tokens"], json!(6000));
    assert_eq!(captured.body["text"]["format"]["type"], json!("json_schema"));
    assert_eq!(captured.body["text"]["format"]["name"], json!("RefinedApiResponse"));
    assert_eq!(
        captured.body["input"][0]["content"][0],
        json!({ "type": "input_text", "text": "Say hi" })
    );
    Ok(())
}

#[test]
fn error_status_and_body_are_passed_through() -> Result<()> {
    let (base, _rx, handle) =
        spawn_responses_server(vec![(429, r#"{"error":"rate limited"}"#.to_string())])?;
    let config = config_for(&base);
    let client = OpenAiResponsesClient::new(&config);

    let call = GenerationCall::new(&config, "x".to_string(), OutputFormat::JsonObject);
    let reply = client.generate(&call)?;
    handle.join().map_err(|_| anyhow::anyhow!("server thread panicked"))?;

    assert_eq!(reply.status, 429);
    assert!(!reply.is_success());
    assert_eq!(reply.body, r#"{"error":"rate limited"}"#);
    Ok(())
}

#[test]
fn unreachable_service_is_a_transport_error() {
    let config = config_for("http://127.0.0.1:9");
    let client = OpenAiResponsesClient::new(&config);
    let call = GenerationCall {
        timeout: Duration::from_secs(2),
        ..GenerationCall::new(&config, "x".to_string(), OutputFormat::JsonObject)
    };

    let err = client.generate(&call).err();

    assert!(matches!(
        err,
        Some(ServiceError::Transport(_) | ServiceError::Timeout(_))
    ));
}

#[test]
fn full_refine_over_http_with_schema_fallback() -> Result<()> {
    let model_json = json!({
        "aiResponse": "Go narrower.",
        "modifiedIdea": "Group trips for Gen Z",
        "cards": [],
    });
    let envelope = json!({
        "output": [{
            "type": "message",
            "content": [{ "type": "output_text", "text": model_json.to_string() }],
        }],
    });
    let (base, rx, handle) = spawn_responses_server(vec![
        (400, r#"{"error":"json_schema unsupported"}"#.to_string()),
        (200, envelope.to_string()),
    ])?;
    let reconciler = Reconciler::from_config(config_for(&base));
    let request = RevisionRequest {
        original_idea: "Gen Z travel".to_string(),
        ..RevisionRequest::default()
    };

    let outcome = reconciler.refine(&request)?;
    handle.join().map_err(|_| anyhow::anyhow!("server thread panicked"))?;

    assert_eq!(outcome.result.modified_idea, "Group trips for Gen Z");
    assert!(outcome.result.cards.is_empty());
    let formats: Vec<Value> = rx
        .try_iter()
        .map(|captured| captured.body["text"]["format"]["type"].clone())
        .collect();
    assert_eq!(formats, vec![json!("json_schema"), json!("json_object")]);
    Ok(())
}
