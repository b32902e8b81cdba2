//! End-to-end tests against a loopback WebSocket server.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use topical::{ConnectionState, FixedDelay, Session, SessionBuilder, Value, WebSocketFactory};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn next_text<S>(ws: &mut S) -> String
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(_)) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    while !done() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_subscribe_receives_reset_and_patch() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        assert_eq!(next_text(&mut ws).await, r#"[2,1,["lists","foo"]]"#);
        ws.send(Message::Text(r#"[2,1,{"items":{},"order":[]}]"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"[3,1,[[2,["order"],null,["a"]]]]"#.into()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut ws).await, "[3,1]");
    });

    let session = Session::connect(format!("ws://{addr}/socket"), WebSocketFactory);
    let seen: Rc<RefCell<Vec<serde_json::Value>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let subscription = session
        .subscribe(["lists", "foo"], move |value: &Value| {
            sink.borrow_mut().push(value.to_json());
        })
        .unwrap();

    tokio::time::timeout(TIMEOUT, async {
        tokio::select! {
            () = session.run() => panic!("run returned early"),
            () = wait_for(|| seen.borrow().len() == 2) => {}
        }
    })
    .await
    .unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![
            json!({"items": {}, "order": []}),
            json!({"items": {}, "order": ["a"]}),
        ]
    );

    subscription.unsubscribe();
    tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
    session.close();
}

#[tokio::test]
async fn test_execute_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
        assert_eq!(frame, json!([1, 1, ["lists", "foo"], "add_item", ["milk"]]));
        ws.send(Message::Text(r#"[1,1,{"id":"item-1"}]"#.into()))
            .await
            .unwrap();
        // Hold the connection until the client goes away.
        while ws.next().await.is_some_and(|frame| frame.is_ok()) {}
    });

    let session = Session::connect(format!("http://{addr}/socket"), WebSocketFactory);
    let result = tokio::time::timeout(TIMEOUT, async {
        tokio::select! {
            () = session.run() => panic!("run returned early"),
            result = async {
                session.until_connected().await.unwrap();
                session
                    .execute(["lists", "foo"], "add_item", &[json!("milk")])
                    .unwrap()
                    .await
            } => result,
        }
    })
    .await
    .unwrap();

    assert_eq!(result, Ok(json!({"id": "item-1"})));
    session.close();
    tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First connection: accept the subscribe, then hang up.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        assert_eq!(next_text(&mut ws).await, r#"[2,1,["a"]]"#);
        ws.close(None).await.unwrap();
        drop(ws);

        // Second connection: the topic is subscribed again on a fresh channel.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        assert_eq!(next_text(&mut ws).await, r#"[2,2,["a"]]"#);
        ws.send(Message::Text(r#"[2,2,"again"]"#.into())).await.unwrap();
        while ws.next().await.is_some_and(|frame| frame.is_ok()) {}
    });

    let session = SessionBuilder::new(format!("ws://{addr}/socket"))
        .reconnect_policy(FixedDelay(Duration::from_millis(20)))
        .build(WebSocketFactory);
    let states = Rc::new(RefCell::new(Vec::new()));
    let state_sink = Rc::clone(&states);
    session.add_listener(move |state| state_sink.borrow_mut().push(state));

    let seen: Rc<RefCell<Vec<serde_json::Value>>> = Rc::default();
    let sink = Rc::clone(&seen);
    session
        .subscribe(["a"], move |value: &Value| sink.borrow_mut().push(value.to_json()))
        .unwrap();

    tokio::time::timeout(TIMEOUT, async {
        tokio::select! {
            () = session.run() => panic!("run returned early"),
            () = wait_for(|| !seen.borrow().is_empty()) => {}
        }
    })
    .await
    .unwrap();

    assert_eq!(*seen.borrow(), vec![json!("again")]);
    assert!(states.borrow().contains(&ConnectionState::Disconnected));
    assert_eq!(session.state(), ConnectionState::Connected);

    session.close();
    tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
}
