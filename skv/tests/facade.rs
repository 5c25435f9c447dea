use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use skv::{
    ClientError, Event, FacadeError, FacadeOptions, GetOptions, MessageDataOptions, Payload,
    PublishOptions, StoreFacade,
};
use skv_testkit::MemoryServer;
use tokio::sync::mpsc;

fn facade_for(server: &MemoryServer) -> StoreFacade {
    StoreFacade::new(FacadeOptions::with_uri(server.url()))
}

fn record(facade: &StoreFacade) -> Arc<Mutex<Vec<&'static str>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    facade.events().register(move |event: &Event| sink.lock().push(event.name()));
    seen
}

fn unreachable_uri() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("redis://{}", addr)
}

#[tokio::test]
async fn client_access_emits_connected_then_disconnected() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);
    let seen = record(&facade);

    let client = facade.client().await.expect("client");
    assert!(client.is_open());
    assert!(facade.is_connected());
    assert_eq!(*seen.lock(), vec!["connected"]);

    facade.disconnect().await.expect("disconnect");
    assert!(!facade.is_connected());
    assert!(!client.is_open());
    assert_eq!(*seen.lock(), vec!["connected", "disconnected"]);
}

#[tokio::test]
async fn connect_is_idempotent() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);
    let seen = record(&facade);

    facade.connect().await.expect("first");
    facade.connect().await.expect("second");
    facade.connection().await.expect("accessor");

    assert_eq!(*seen.lock(), vec!["connected"]);
    assert_eq!(server.connections_accepted(), 2);
}

#[tokio::test]
async fn disconnect_while_disconnected_is_silent() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);
    let seen = record(&facade);

    facade.disconnect().await.expect("disconnect");
    assert!(seen.lock().is_empty());
    assert_eq!(server.connections_accepted(), 0);
}

#[tokio::test]
async fn reconnect_after_disconnect_opens_fresh_handles() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);
    let seen = record(&facade);

    facade.set("k", "v").await.expect("set");
    facade.disconnect().await.expect("disconnect");
    assert_eq!(facade.get("k").await.expect("get"), Some(json!("v")));

    assert_eq!(*seen.lock(), vec!["connected", "disconnected", "connected"]);
    assert_eq!(server.connections_accepted(), 4);
}

#[tokio::test]
async fn set_get_reset_roundtrip() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);
    let seen = record(&facade);

    assert_eq!(facade.add("test:string", "a14").await.expect("set"), "OK");
    assert_eq!(facade.get("test:string").await.expect("get"), Some(json!("a14")));

    facade.reset().await.expect("reset");
    assert_eq!(facade.get("test:string").await.expect("get"), None);
    assert_eq!(server.key_count(), 0);
    assert_eq!(*seen.lock(), vec!["connected", "reset"]);
}

#[tokio::test]
async fn get_parses_caller_serialized_json() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);

    let stored = serde_json::to_string(&json!({ "a": [1, 2], "b": "c" })).expect("json");
    facade.set("doc", &stored).await.expect("set");

    assert_eq!(
        facade.get("doc").await.expect("get"),
        Some(json!({ "a": [1, 2], "b": "c" }))
    );
    assert_eq!(
        facade.get_with("doc", GetOptions { parse: false }).await.expect("get raw"),
        Some(Value::String(stored))
    );
    assert_eq!(server.value("doc"), Some(br#"{"a":[1,2],"b":"c"}"#.to_vec()));
}

#[tokio::test]
async fn remove_then_get_is_absent() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);

    facade.set("gone", "soon").await.expect("set");
    assert_eq!(facade.remove("gone").await.expect("remove"), 1);
    assert_eq!(facade.get("gone").await.expect("get"), None);
    assert_eq!(facade.delete("gone").await.expect("delete"), 0);
}

#[tokio::test]
async fn reset_while_disconnected_only_emits() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);
    let seen = record(&facade);

    facade.reset().await.expect("reset");
    assert_eq!(*seen.lock(), vec!["reset"]);
    assert!(!facade.is_connected());
    assert_eq!(server.connections_accepted(), 0);
}

#[tokio::test]
async fn unreachable_store_reports_connection_error() {
    let facade = StoreFacade::new(FacadeOptions::with_uri(unreachable_uri()));
    let causes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&causes);
    facade.events().register(move |event: &Event| {
        sink.lock().push((event.name(), event.cause().map(|cause| cause.to_string())));
    });

    let err = facade.connect().await.expect_err("unreachable");
    assert!(matches!(err.cause(), ClientError::Io(_)));
    assert!(!facade.is_connected());

    let causes = causes.lock();
    assert_eq!(causes.len(), 1);
    assert_eq!(causes[0].0, "connect:error");
    assert_eq!(causes[0].1.as_deref(), Some(err.cause().to_string().as_str()));
}

#[tokio::test]
async fn invalid_uri_fails_data_operations() {
    let facade = StoreFacade::new(FacadeOptions::with_uri("not a uri"));
    let seen = record(&facade);

    let err = facade.get("k").await.expect_err("invalid");
    assert!(err.is_connection());
    match err {
        FacadeError::Connection(err) => {
            assert!(matches!(err.cause(), ClientError::InvalidAddress(_)))
        }
        other => panic!("expected connection error, got {:?}", other),
    }
    assert_eq!(*seen.lock(), vec!["connect:error"]);

    // A failed connect is retryable and reports again.
    assert!(facade.set("k", "v").await.is_err());
    assert_eq!(*seen.lock(), vec!["connect:error", "connect:error"]);
}

#[tokio::test]
async fn publish_reaches_subscriber() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);

    let (tx, mut rx) = mpsc::unbounded_channel();
    facade
        .subscribe(
            &["test:channel"],
            move |message| {
                let _ = tx.send(message);
            },
            false,
        )
        .await
        .expect("subscribe");

    assert_eq!(facade.publish("test:channel", &json!({ "x": 1 })).await.expect("publish"), 1);

    let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("message in time")
        .expect("channel open");
    assert_eq!(message.channel, "test:channel");
    let text = match message.payload {
        Payload::Text(text) => text,
        other => panic!("expected text payload, got {:?}", other),
    };
    assert_eq!(
        StoreFacade::message_data(&text, MessageDataOptions::default()),
        Some(json!({ "x": 1 }))
    );
}

#[tokio::test]
async fn buffer_mode_subscriber_gets_raw_bytes() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);

    let (tx, mut rx) = mpsc::unbounded_channel();
    facade
        .subscribe(
            &["bin"],
            move |message| {
                let _ = tx.send(message.payload);
            },
            true,
        )
        .await
        .expect("subscribe");

    facade
        .publish_with("bin", &json!("raw text"), PublishOptions { serialize: false })
        .await
        .expect("publish");

    let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("message in time")
        .expect("channel open");
    assert!(matches!(&payload, Payload::Buffer(_)));
    assert_eq!(payload.as_bytes(), b"raw text");
}

#[tokio::test]
async fn commands_work_while_subscribed() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);

    facade
        .subscribe(&["busy"], |_| {}, false)
        .await
        .expect("subscribe");

    assert_eq!(facade.set("k", "v").await.expect("set"), "OK");
    assert_eq!(facade.get("k").await.expect("get"), Some(json!("v")));
    facade.reset().await.expect("reset while subscribed");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);

    let id = facade
        .subscribe(&["news"], |_| {}, false)
        .await
        .expect("subscribe");
    assert_eq!(facade.publish("news", "first").await.expect("publish"), 1);

    facade.unsubscribe(&["news"], Some(id)).await.expect("unsubscribe");
    assert_eq!(facade.publish("news", "second").await.expect("publish"), 0);
}

#[tokio::test]
async fn publish_without_serialization_sends_strings_verbatim() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);

    facade
        .publish_with("raw", &json!("hello"), PublishOptions { serialize: false })
        .await
        .expect("raw publish");
    facade
        .publish_with("raw", &json!("hello"), PublishOptions::default())
        .await
        .expect("serialized publish");

    let published: Vec<String> = server
        .commands()
        .into_iter()
        .filter(|command| command[0] == "PUBLISH")
        .map(|command| command[2].clone())
        .collect();
    assert_eq!(published, vec!["hello".to_string(), "\"hello\"".to_string()]);
}

#[tokio::test]
async fn concurrent_connect_opens_one_pair() {
    let server = MemoryServer::start().await.expect("server");
    let facade = Arc::new(facade_for(&server));
    let seen = record(&facade);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let facade = Arc::clone(&facade);
            tokio::spawn(async move { facade.connect().await.map(|_| ()) })
        })
        .collect();
    for task in tasks {
        task.await.expect("join").expect("connect");
    }

    assert_eq!(server.connections_accepted(), 2);
    assert_eq!(*seen.lock(), vec!["connected"]);
}

#[tokio::test]
async fn failed_disconnect_still_disconnects() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);
    let seen = record(&facade);

    let client = facade.client().await.expect("client");
    server.drop_clients();
    for _ in 0..100 {
        if !client.is_open() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!client.is_open());

    let err = facade.disconnect().await.expect_err("closed handles");
    assert!(matches!(err.cause(), ClientError::Closed));
    assert!(!facade.is_connected());
    assert_eq!(*seen.lock(), vec!["connected", "disconnect:error"]);

    // The next operation reconnects.
    assert_eq!(facade.set("k", "v").await.expect("set"), "OK");
    assert!(facade.is_connected());
}

#[tokio::test]
async fn data_operations_reconnect_after_store_hangs_up() {
    let server = MemoryServer::start().await.expect("server");
    let facade = facade_for(&server);
    let seen = record(&facade);

    facade.set("a", "1").await.expect("set");
    let lost = facade.client().await.expect("client");
    server.drop_clients();
    for _ in 0..100 {
        if !lost.is_open() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!lost.is_open());

    assert_eq!(facade.get("a").await.expect("first get"), Some(json!(1)));
    assert_eq!(facade.get("a").await.expect("second get"), Some(json!(1)));
    assert!(facade.is_connected());
    assert_eq!(server.connections_accepted(), 4);
    assert_eq!(*seen.lock(), vec!["connected", "connected"]);

    // Subscriptions are made on the fresh subscriber handle.
    facade
        .subscribe(&["after"], |_| {}, false)
        .await
        .expect("subscribe");
    assert_eq!(facade.publish("after", "x").await.expect("publish"), 1);
}
