use std::sync::Arc;

use perpetual_ws::core::{
    ConnectTarget, ConnectionConfig, JsonCodec, WebSocketError, WsFrame, WsOutbound,
};
use perpetual_ws::testing::{MockAcceptor, MockServer, MockTransport};
use perpetual_ws::ws::{
    ConnectionFactory, FnHandler, HandlerChain, WebSocket, WebSocketCollection,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    price: u64,
}

async fn connect_tracked(
    factory: &ConnectionFactory<MockTransport>,
    acceptor: &mut MockAcceptor,
    collection: &WebSocketCollection,
    name: &str,
) -> (WebSocket, MockServer) {
    let stage = FnHandler::new()
        .with_serializer(Arc::new(JsonCodec::<Quote>::new()))
        .build();
    let ws = factory
        .connect(
            name,
            ConnectTarget::new(format!("ws://mock/{name}")),
            ConnectionConfig::default(),
            HandlerChain::single(collection.track(stage)),
        )
        .unwrap();
    let server = acceptor.accept().await.unwrap();
    (ws, server)
}

async fn wait_for_len(collection: &WebSocketCollection, len: usize) {
    tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while collection.len() != len {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("collection size reached");
}

#[tokio::test]
async fn tracked_connections_join_and_leave() {
    let (transport, mut acceptor) = MockTransport::new();
    let factory = ConnectionFactory::new(transport);
    let collection = WebSocketCollection::new();

    let (a, _sa) = connect_tracked(&factory, &mut acceptor, &collection, "a").await;
    let (_b, _sb) = connect_tracked(&factory, &mut acceptor, &collection, "b").await;
    wait_for_len(&collection, 2).await;

    a.close_normal("leaving");
    a.closed().await;
    wait_for_len(&collection, 1).await;
    assert!(!collection.sockets().iter().any(|ws| ws.id() == a.id()));
}

#[tokio::test]
async fn broadcast_encodes_once_and_respects_filter() {
    let (transport, mut acceptor) = MockTransport::new();
    let factory = ConnectionFactory::new(transport);
    let collection = WebSocketCollection::new();

    let (_a, mut sa) = connect_tracked(&factory, &mut acceptor, &collection, "a").await;
    let (_b, mut sb) = connect_tracked(&factory, &mut acceptor, &collection, "b").await;
    let (c, mut sc) = connect_tracked(&factory, &mut acceptor, &collection, "c").await;
    wait_for_len(&collection, 3).await;

    let quote = Quote {
        symbol: "BTC".to_string(),
        price: 42,
    };
    let excluded = c.id();
    let results = collection.broadcast(WsOutbound::object(quote), |ws| ws.id() != excluded);
    assert_eq!(results.len(), 2);
    for (_, completion) in results {
        completion.await.unwrap();
    }

    let expected = WsFrame::text_static(r#"{"symbol":"BTC","price":42}"#);
    assert_eq!(sa.recv_data().await, Some(expected.clone()));
    assert_eq!(sb.recv_data().await, Some(expected));
    assert_eq!(
        sc.recv_outbound_timeout(std::time::Duration::from_millis(50)).await,
        None
    );

    let results = collection.broadcast(WsOutbound::object("wrong type"), |_| true);
    for (_, completion) in results {
        assert!(matches!(
            completion.await,
            Err(WebSocketError::Serialization(_))
        ));
    }
}
