use serde_json::json;

use crate::common::{OllamaScript, Session};

fn frame(body: &serde_json::Value) -> Vec<u8> {
    fuzz_lsp::codec::encode_frame(body.to_string().as_bytes())
}

#[tokio::test]
async fn header_names_are_case_insensitive() {
    let mut session = Session::start(OllamaScript::new()).await;

    let body = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}).to_string();
    let raw = format!(
        "content-length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{body}",
        body.len()
    );
    session.send_raw(raw.as_bytes()).await;

    let reply = session.next_with_id(1).await;
    assert_eq!(reply["result"]["serverInfo"]["name"], "fuzzlsp");

    session.finish().await.unwrap();
}

#[tokio::test]
async fn back_to_back_frames_are_all_answered() {
    let mut session = Session::start(OllamaScript::new()).await;

    let mut bytes = frame(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}));
    bytes.extend(frame(&json!({"jsonrpc": "2.0", "id": 2, "method": "bogus/method", "params": {}})));
    session.send_raw(&bytes).await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        let reply = session.next_frame().await.unwrap();
        ids.push(reply["id"].as_u64().unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, [1, 2]);

    session.finish().await.unwrap();
}

#[tokio::test]
async fn unparseable_body_stops_the_server() {
    let mut session = Session::start(OllamaScript::new()).await;

    session.send_raw(b"Content-Length: 9\r\n\r\n{not json").await;

    assert!(session.join().await.is_err());
    assert!(session.next_frame().await.is_none());
}
