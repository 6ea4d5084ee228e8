use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use servo_bridge::constants::{RPC_PATH, SESSION_HEADER};
use servo_bridge::rpc::protocol::{initialize_result, tool_result, RpcResponse};
use servo_bridge::rpc::{self, ClientOptions, RpcClient};
use servo_bridge::{
    Backend, ClientError, Command, CommandResult, Controller, DeviceLimits, Orchestrator,
    SimulatedBus, Status, Transport,
};
use tokio::net::TcpListener;
use tokio::time::Duration;

async fn start_server(backend: Backend) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let orchestrator = Arc::new(Orchestrator::new(DeviceLimits::default(), backend));
    tokio::spawn(rpc::serve(listener, orchestrator));
    port
}

async fn simulated_server() -> (u16, SimulatedBus) {
    let bus = SimulatedBus::new();
    let controller = Controller::new(Transport::simulated(bus.clone()));
    (start_server(Backend::Available(controller)).await, bus)
}

#[tokio::test]
async fn capped_and_uncapped_moves() {
    let (port, bus) = simulated_server().await;
    let commands = vec![
        Command::new(17, 90.0).with_duration(20),
        Command::new(23, 45.0).with_duration(200),
    ];

    let results = rpc::send_batch("127.0.0.1", port, &commands, ClientOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].pin, Some(17));
    assert_eq!(results[0].status, Status::Ok);
    assert!(results[0].message.contains("capped to 45"));
    assert_eq!(results[1].pin, Some(23));
    assert_eq!(results[1].status, Status::Ok);
    assert!(results[1].message.contains("moved to 45"));

    let writes = bus.writes();
    assert_eq!(writes[0].pulse_us, 1000);
    assert!(writes[3].at - writes[2].at >= Duration::from_millis(200));
}

#[tokio::test]
async fn invalid_pin_then_valid_command() {
    let (port, _bus) = simulated_server().await;
    let mut client = RpcClient::connect("127.0.0.1", port, ClientOptions::default())
        .await
        .unwrap();
    assert!(client.session_id().is_some());
    assert_eq!(client.server_info()["name"], "ServoController");

    let results = client
        .execute_servo_commands(&[Command::new(99, 10.0), Command::new(22, 20.0).with_duration(10)])
        .await
        .unwrap();

    assert_eq!(results[0].pin, Some(99));
    assert_eq!(results[0].status, Status::Error);
    assert_eq!(results[1].pin, Some(22));
    assert_eq!(results[1].status, Status::Ok);

    // the session stays usable for further batches
    let results = client
        .execute_servo_commands(&[Command::new(24, 181.0), Command::new(25, -1.0)])
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.status == Status::Error));

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools[0]["name"], "execute_servo_commands");
    client.close().await;
}

#[tokio::test]
async fn unavailable_backend_errors_every_command() {
    let port = start_server(Backend::Unavailable {
        reason: "pigpio daemon not connected".into(),
    })
    .await;
    let commands = vec![
        Command::new(17, 10.0),
        Command::new(23, 20.0),
        Command::new(40, 30.0),
    ];

    let results = rpc::send_batch("127.0.0.1", port, &commands, ClientOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    for (result, cmd) in results.iter().zip(&commands) {
        assert_eq!(result.pin, Some(cmd.pin));
        assert_eq!(result.status, Status::Error);
        assert!(result.message.contains("backend unavailable"));
    }
}

#[tokio::test]
async fn empty_batch_yields_empty_report() {
    let (port, bus) = simulated_server().await;
    let results = rpc::send_batch("127.0.0.1", port, &[], ClientOptions::default())
        .await
        .unwrap();
    assert!(results.is_empty());
    assert!(bus.writes().is_empty());
}

#[tokio::test]
async fn concurrent_batches_do_not_overlap() {
    let (port, bus) = simulated_server().await;
    let a = vec![
        Command::new(23, 10.0).with_duration(100),
        Command::new(23, 20.0).with_duration(100),
    ];
    let b = vec![
        Command::new(24, 10.0).with_duration(100),
        Command::new(24, 20.0).with_duration(100),
    ];

    let (ra, rb) = tokio::join!(
        rpc::send_batch("127.0.0.1", port, &a, ClientOptions::default()),
        rpc::send_batch("127.0.0.1", port, &b, ClientOptions::default()),
    );
    assert!(ra.unwrap().iter().all(|r| r.is_ok()));
    assert!(rb.unwrap().iter().all(|r| r.is_ok()));

    // all four moves of one batch finish before the other batch touches the bus
    let pins: Vec<u32> = bus.writes().iter().map(|w| w.pin).collect();
    assert_eq!(pins.len(), 8);
    assert!(pins[..4].iter().all(|&p| p == pins[0]));
    assert!(pins[4..].iter().all(|&p| p == pins[4]));
    assert_ne!(pins[0], pins[4]);
}

#[tokio::test]
async fn connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let commands = [Command::new(23, 10.0)];
    let err = rpc::send_batch("127.0.0.1", port, &commands, ClientOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ConnectionRefused(_)), "got {:?}", err);
}

#[tokio::test]
async fn call_timeout_is_transport_error() {
    let (port, _bus) = simulated_server().await;
    let options = ClientOptions {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_millis(300),
    };
    let mut client = RpcClient::connect("127.0.0.1", port, options).await.unwrap();

    let err = client
        .execute_servo_commands(&[Command::new(23, 10.0).with_duration(2000)])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)), "got {:?}", err);
}

/// Answers `tools/call` over an event stream, cutting the body inside the
/// last two-byte `°` and sending the halves 100 ms apart.
async fn split_event_stream(Json(request): Json<Value>) -> Response {
    let Some(id) = request.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };
    if request["method"] == "initialize" {
        let body = Json(RpcResponse::success(id, initialize_result()));
        return ([(SESSION_HEADER, "split-session")], body).into_response();
    }

    let results = vec![CommandResult::ok(23, "Servo on pin 23 moved to 45\u{b0}.")];
    let reply = RpcResponse::success(id, tool_result(&results));
    let event = format!("event: message\ndata: {}\n\n", json!(reply)).into_bytes();
    let cut = event.iter().rposition(|&b| b == 0xc2).unwrap() + 1;
    let chunks = vec![event[..cut].to_vec(), event[cut..].to_vec()];

    let stream = futures::stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, std::io::Error>(Bytes::from(chunk))
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

#[tokio::test]
async fn event_stream_reply_split_inside_character() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = Router::new().route(RPC_PATH, post(split_event_stream));
    tokio::spawn(async move { axum::serve(listener, app).await });

    let commands = [Command::new(23, 45.0)];
    let results = rpc::send_batch("127.0.0.1", port, &commands, ClientOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, Status::Ok);
    assert_eq!(results[0].message, "Servo on pin 23 moved to 45\u{b0}.");
}
