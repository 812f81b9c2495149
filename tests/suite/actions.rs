use serde_json::{Value, json};

use crate::common::{GOOD_ANALYSIS, OllamaScript, Session, TEXT, URI, line_range};

fn action_params(line: u32) -> Value {
    json!({
        "textDocument": {"uri": URI},
        "range": line_range(line),
        "context": {"diagnostics": []}
    })
}

/// Offer actions on the diagnostic's line and return them.
async fn offered(session: &mut Session) -> Vec<Value> {
    let reply = session
        .request(1, "textDocument/codeAction", action_params(1))
        .await;
    reply["result"].as_array().cloned().unwrap()
}

#[tokio::test]
async fn actions_offered_only_on_diagnostic_lines() {
    let mut session = Session::start(OllamaScript::new().analyses([GOOD_ANALYSIS])).await;
    session.open(URI, TEXT).await;

    let actions = offered(&mut session).await;
    let titles: Vec<&str> = actions.iter().filter_map(|a| a["title"].as_str()).collect();
    assert_eq!(titles, ["Ask LLM for Fix [FuzzLSP]", "Explain issue [FuzzLSP]"]);
    assert!(actions.iter().all(|a| a["edit"].is_null()));

    let reply = session
        .request(2, "textDocument/codeAction", action_params(0))
        .await;
    assert_eq!(reply["result"], Value::Null);

    session.finish().await.unwrap();
}

#[tokio::test]
async fn refactor_replaces_whole_line() {
    let script = OllamaScript::new()
        .analyses([GOOD_ANALYSIS])
        .refactor("```c\nbar();\n```");
    let mut session = Session::start(script).await;
    session.open(URI, TEXT).await;

    let actions = offered(&mut session).await;
    let reply = session
        .request(2, "codeAction/resolve", actions[0].clone())
        .await;

    let edits = reply["result"]["edit"]["changes"][URI].as_array().unwrap();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0]["newText"], "bar();");
    assert_eq!(edits[0]["range"]["start"], json!({"line": 1, "character": 0}));
    assert_eq!(edits[0]["range"]["end"], json!({"line": 1, "character": 6}));

    let requests = session.chat_requests().await;
    assert_eq!(requests.last().unwrap()["messages"][1]["content"], "foo();");

    session.finish().await.unwrap();
}

#[tokio::test]
async fn explanation_is_inserted_as_comment() {
    let script = OllamaScript::new()
        .analyses([GOOD_ANALYSIS])
        .explanation("foo has no prototype in scope.\n");
    let mut session = Session::start(script).await;
    session.open(URI, TEXT).await;

    let actions = offered(&mut session).await;
    let reply = session
        .request(2, "codeAction/resolve", actions[1].clone())
        .await;

    let edit = &reply["result"]["edit"]["changes"][URI][0];
    assert_eq!(edit["newText"], "/* foo has no prototype in scope. */\nfoo();");

    session.finish().await.unwrap();
}

#[tokio::test]
async fn resolve_after_document_shrank_is_rejected() {
    let script = OllamaScript::new()
        .analyses([GOOD_ANALYSIS])
        .refactor("bar();");
    let mut session = Session::start(script).await;
    session.open(URI, TEXT).await;
    let actions = offered(&mut session).await;

    session.change(URI, 2, "int x = 1").await;
    session.next_notification("analysisDone").await;

    let reply = session
        .request(2, "codeAction/resolve", actions[0].clone())
        .await;
    assert_eq!(reply["error"]["code"], -32602);

    session.finish().await.unwrap();
}

#[tokio::test]
async fn resolve_with_foreign_data_is_rejected() {
    let mut session = Session::start(OllamaScript::new()).await;

    let reply = session
        .request(
            1,
            "codeAction/resolve",
            json!({"title": "Other", "data": {"unexpected": true}}),
        )
        .await;
    assert_eq!(reply["error"]["code"], -32602);

    session.finish().await.unwrap();
}
