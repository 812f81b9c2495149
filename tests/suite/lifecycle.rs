use serde_json::{Value, json};

use crate::common::{OllamaScript, Session};

#[tokio::test]
async fn initialize_reports_capabilities_and_name() {
    let mut session = Session::start(OllamaScript::new()).await;

    let reply = session
        .request(1, "initialize", json!({"capabilities": {}}))
        .await;
    let result = &reply["result"];
    assert_eq!(result["serverInfo"]["name"], "fuzzlsp");
    assert_eq!(result["capabilities"]["textDocumentSync"]["change"], 1);
    assert_eq!(result["capabilities"]["hoverProvider"], true);
    assert_eq!(result["capabilities"]["codeActionProvider"]["resolveProvider"], true);
    assert!(result["capabilities"]["diagnosticProvider"].is_object());

    session.finish().await.unwrap();
}

#[tokio::test]
async fn initialized_clears_client_spinner() {
    let mut session = Session::start(OllamaScript::new()).await;

    session.notify("initialized", json!({})).await;
    let note = session.next_notification("analysisDone").await;
    assert_eq!(note["params"], "AnalysisDone");

    session.finish().await.unwrap();
}

#[tokio::test]
async fn unknown_method_is_reported() {
    let mut session = Session::start(OllamaScript::new()).await;

    let reply = session.request(3, "workspace/executeCommand", json!({})).await;
    assert_eq!(reply["error"]["code"], -32601);

    session.finish().await.unwrap();
}

#[tokio::test]
async fn requests_after_shutdown_are_rejected() {
    let mut session = Session::start(OllamaScript::new()).await;

    let reply = session.request(1, "shutdown", Value::Null).await;
    assert_eq!(reply["result"], Value::Null);

    let reply = session
        .request(2, "textDocument/diagnostic", json!({"textDocument": {"uri": "file:///a.c"}}))
        .await;
    assert_eq!(reply["error"]["code"], -32600);

    session.notify("exit", Value::Null).await;
    session.join().await.unwrap();
}

#[tokio::test]
async fn end_of_input_stops_cleanly() {
    let mut session = Session::start(OllamaScript::new()).await;

    session.hang_up().await.unwrap();
    assert!(session.next_frame().await.is_none());
}
