use serde_json::json;

use crate::common::{
    GOOD_ANALYSIS, OllamaScript, RETRY_PROMPT, Session, TEXT, URI, position,
};

#[tokio::test]
async fn open_publishes_lifecycle_then_diagnostics() {
    let mut session = Session::start(OllamaScript::new().analyses([GOOD_ANALYSIS])).await;

    session
        .notify(
            "textDocument/didOpen",
            json!({"textDocument": {"uri": URI, "languageId": "c", "version": 1, "text": TEXT}}),
        )
        .await;
    let started = session.next_frame().await.unwrap();
    assert_eq!(started["method"], "analysisStarted");
    assert_eq!(started["params"], "AnalysisStarted");
    let done = session.next_frame().await.unwrap();
    assert_eq!(done["method"], "analysisDone");

    let items = session.diagnostics(1, URI).await;
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item["range"]["start"], json!({"line": 1, "character": 0}));
    assert_eq!(item["range"]["end"], json!({"line": 1, "character": 5}));
    assert_eq!(item["severity"], 1);
    assert_eq!(item["source"], "fuzzlsp");
    assert_eq!(item["code"], "foo(); undeclared");
    assert_eq!(item["message"], "foo is not declared");

    let requests = session.chat_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["stream"], false);
    assert_eq!(requests[0]["messages"][1]["content"], TEXT);

    session.finish().await.unwrap();
}

#[tokio::test]
async fn malformed_reply_is_retried_with_instruction() {
    let script = OllamaScript::new().analyses(["Sure! Here are the issues:", GOOD_ANALYSIS]);
    let mut session = Session::start(script).await;

    session.open(URI, TEXT).await;

    assert_eq!(session.diagnostics(1, URI).await.len(), 1);
    let requests = session.chat_requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["messages"][1]["content"], TEXT);
    let retried = requests[1]["messages"][1]["content"].as_str().unwrap();
    assert!(retried.starts_with(RETRY_PROMPT));
    assert!(retried.ends_with(TEXT));

    session.finish().await.unwrap();
}

#[tokio::test]
async fn backend_outage_still_finishes_analysis() {
    let mut session = Session::start(OllamaScript::new().failing(500)).await;

    session.open(URI, TEXT).await;

    assert!(session.diagnostics(1, URI).await.is_empty());
    assert_eq!(session.chat_requests().await.len(), 1);

    session.finish().await.unwrap();
}

#[tokio::test]
async fn edit_replaces_diagnostics() {
    let mut session = Session::start(OllamaScript::new().analyses([GOOD_ANALYSIS, "[]"])).await;

    session.open(URI, TEXT).await;
    assert_eq!(session.diagnostics(1, URI).await.len(), 1);

    session.change(URI, 2, "int x = 1\nreturn x;\n").await;
    session.next_notification("analysisDone").await;
    assert!(session.diagnostics(2, URI).await.is_empty());

    session.finish().await.unwrap();
}

#[tokio::test]
async fn unchanged_text_is_not_reanalysed() {
    let mut session = Session::start(OllamaScript::new().analyses([GOOD_ANALYSIS])).await;

    session.open(URI, TEXT).await;
    session.change(URI, 2, TEXT).await;
    session.finish().await.unwrap();

    assert_eq!(session.chat_requests().await.len(), 1);
}

#[tokio::test]
async fn hover_describes_diagnostic_on_line() {
    let mut session = Session::start(OllamaScript::new().analyses([GOOD_ANALYSIS])).await;
    session.open(URI, TEXT).await;

    let reply = session.request(1, "textDocument/hover", position(1, 2)).await;
    let contents = &reply["result"]["contents"];
    assert_eq!(contents["kind"], "markdown");
    assert!(contents["value"].as_str().unwrap().contains("foo is not declared"));

    let reply = session.request(2, "textDocument/hover", position(0, 0)).await;
    assert_eq!(reply["result"]["contents"]["value"], "");

    session.finish().await.unwrap();
}

#[tokio::test]
async fn unknown_document_has_no_diagnostics() {
    let mut session = Session::start(OllamaScript::new()).await;

    assert!(session.diagnostics(1, "file:///never/opened.c").await.is_empty());

    session.finish().await.unwrap();
}
