use serde_json::json;

use crate::common::{OllamaScript, Session, TEXT, URI, position};

#[tokio::test]
async fn candidates_then_generated_suggestion() {
    let script = OllamaScript::new()
        .completions("```c\nbar();\n\nbaz(1);\n```")
        .generated("x = 2;\n\ty = \"q\";");
    let mut session = Session::start(script).await;
    session.open(URI, TEXT).await;

    let reply = session
        .request(1, "textDocument/completion", position(1, 3))
        .await;
    let items = reply["result"].as_array().unwrap();
    let labels: Vec<&str> = items.iter().filter_map(|i| i["label"].as_str()).collect();
    assert_eq!(labels, ["bar();", "baz(1);", "x = 2;\n\ty = \"q\";"]);
    assert!(items[0]["documentation"].is_null());
    assert_eq!(items[2]["documentation"], "Generated suggestion");

    let shown = session.next_notification("window/showGeneratedCode").await;
    assert_eq!(shown["params"], "x = 2;\\n\\ty = \\\"q\\\";");

    session.finish().await.unwrap();
}

#[tokio::test]
async fn generation_prompt_marks_cursor() {
    let script = OllamaScript::new().completions("bar();").generated("bar();");
    let mut session = Session::start(script).await;
    session.open(URI, TEXT).await;

    session
        .request(1, "textDocument/completion", position(1, 3))
        .await;

    let requests = session.chat_requests().await;
    let prompts: Vec<&str> = requests
        .iter()
        .filter_map(|r| r["messages"][1]["content"].as_str())
        .collect();
    assert!(prompts.contains(&"int x = 1\nfoo"));
    assert!(
        prompts
            .iter()
            .any(|p| p.ends_with("int x = 1\nfoo<CURSOR>();\nreturn x;\n"))
    );

    session.finish().await.unwrap();
}

#[tokio::test]
async fn unopened_document_is_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("util.c");
    std::fs::write(&path, "int y;\nput").unwrap();
    let uri = url::Url::from_file_path(&path).unwrap();

    let script = OllamaScript::new().completions("puts(\"\");").generated("s();");
    let mut session = Session::start(script).await;

    let reply = session
        .request(
            1,
            "textDocument/completion",
            json!({"textDocument": {"uri": uri.as_str()}, "position": {"line": 1, "character": 3}}),
        )
        .await;
    let items = reply["result"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["label"], "puts(\"\");");

    session.finish().await.unwrap();
}

#[tokio::test]
async fn cursor_past_document_is_invalid() {
    let mut session = Session::start(OllamaScript::new()).await;
    session.open(URI, TEXT).await;

    let reply = session
        .request(1, "textDocument/completion", position(10, 0))
        .await;
    assert_eq!(reply["error"]["code"], -32602);

    let reply = session
        .request(2, "textDocument/completion", position(1, 40))
        .await;
    assert_eq!(reply["error"]["code"], -32602);

    assert!(session.chat_requests().await.len() <= 1);

    session.finish().await.unwrap();
}
