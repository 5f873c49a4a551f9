mod common;

use common::{fast_health, MockConnector, Network};
use shipsim::client::{ClientError, LineOutcome};
use shipsim::commands::CommandError;
use shipsim::config::{ClientConfig, ConnectPolicy, ControlKind, DeviceConfig, ServerConfig};
use shipsim::device::Logger;
use shipsim::health::{HealthConfig, HealthError, TcpConnector};
use shipsim::protocol::{decode_batch, ProtocolError, Response, Value, KILL};
use shipsim::{Client, ConnectionState, HealthEvent, Server, Ship};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn mock_config() -> ClientConfig {
    ClientConfig {
        server_addr: "sim:1".to_string(),
        health: fast_health(),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_lines_batched_until_empty_line() {
    let net = Network::new();
    let (mut client, _events) = Client::connect(MockConnector(Arc::clone(&net)), mock_config())
        .await
        .unwrap();

    assert_eq!(
        client.handle_line("logger1 3.5").await.unwrap(),
        LineOutcome::Queued { pending: 1 }
    );
    assert_eq!(
        client.handle_line("nav1 north").await.unwrap(),
        LineOutcome::Queued { pending: 2 }
    );
    assert_eq!(
        client.handle_line("").await.unwrap(),
        LineOutcome::Sent { count: 2 }
    );
    assert_eq!(client.handle_line("").await.unwrap(), LineOutcome::Idle);
    assert!(client.pending().is_empty());

    let sent: Vec<String> = net
        .lines()
        .into_iter()
        .filter(|line| line.starts_with('['))
        .collect();
    assert_eq!(sent.len(), 1);
    let batch = decode_batch(&sent[0]).unwrap();
    assert_eq!(batch[0].id, "logger1");
    assert_eq!(batch[1].values, vec![Value::Text("north".to_string())]);
}

#[tokio::test]
async fn test_invalid_input_and_unknown_commands() {
    let net = Network::new();
    let (mut client, _events) = Client::connect(MockConnector(net), mock_config())
        .await
        .unwrap();

    assert!(matches!(
        client.handle_line("lonely").await,
        Err(ClientError::Protocol(ProtocolError::InvalidInput(_)))
    ));

    let unknown = client.handle_line("/launch").await.unwrap_err();
    assert!(matches!(
        unknown,
        ClientError::Command(CommandError::Unknown(ref name)) if name == "launch"
    ));
    assert_eq!(unknown.to_string(), "unknown command: launch");
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn test_local_commands() {
    let net = Network::new();
    let config = ClientConfig {
        devices: vec![DeviceConfig {
            id: "heater1".to_string(),
            label: "Heater".to_string(),
            kind: ControlKind::Checkbox,
            options: Vec::new(),
        }],
        ..mock_config()
    };
    let (mut client, _events) = Client::connect(MockConnector(Arc::clone(&net)), config)
        .await
        .unwrap();

    assert_eq!(
        client.handle_line("/devices").await.unwrap(),
        LineOutcome::Devices(vec!["Heater (heater1) [checkbox]".to_string()])
    );
    assert!(matches!(
        client.handle_line("/help").await.unwrap(),
        LineOutcome::Help(ref text) if text.contains("/terminate")
    ));
    assert!(matches!(
        client.handle_line("/connect").await,
        Err(ClientError::Health(HealthError::AlreadyConnected))
    ));

    assert_eq!(client.handle_line("/kill").await.unwrap(), LineOutcome::KillSent);
    assert_eq!(net.count(KILL), 1);
    assert_eq!(client.handle_line("/terminate").await.unwrap(), LineOutcome::Exit);
    assert_eq!(net.count(KILL), 2);
    assert_eq!(client.handle_line("/exit").await.unwrap(), LineOutcome::Exit);
}

#[tokio::test]
async fn test_ignore_policy_makes_connect_noop() {
    let net = Network::new();
    let config = ClientConfig {
        connect_policy: ConnectPolicy::IgnoreWhenConnected,
        ..mock_config()
    };
    let (mut client, _events) = Client::connect(MockConnector(Arc::clone(&net)), config)
        .await
        .unwrap();

    assert_eq!(
        client.handle_line("/connect").await.unwrap(),
        LineOutcome::AlreadyConnected
    );
    assert_eq!(net.connects(), 1);
}

#[tokio::test]
async fn test_commands_only_after_exhaustion() {
    let net = Network::new();
    let (mut client, mut events) = Client::connect(MockConnector(Arc::clone(&net)), mock_config())
        .await
        .unwrap();

    net.set_accepting(false);
    net.cut();
    loop {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(event, HealthEvent::Exhausted { .. }) {
            break;
        }
    }
    assert_eq!(client.state(), ConnectionState::Exhausted);

    assert!(matches!(
        client.handle_line("logger1 1").await,
        Err(ClientError::NotConnected)
    ));
    assert!(client.handle_line("/devices").await.is_ok());

    net.set_accepting(true);
    assert_eq!(
        client.handle_line("/connect").await.unwrap(),
        LineOutcome::Reconnected
    );
    assert_eq!(
        client.handle_line("logger1 1").await.unwrap(),
        LineOutcome::Queued { pending: 1 }
    );
}

#[tokio::test]
async fn test_failed_send_keeps_batch() {
    let net = Network::new();
    let config = ClientConfig {
        health: HealthConfig {
            keepalive_interval: Duration::from_secs(3600),
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_attempts: 3,
        },
        ..mock_config()
    };
    let (mut client, mut events) = Client::connect(MockConnector(Arc::clone(&net)), config)
        .await
        .unwrap();

    client.handle_line("logger1 1").await.unwrap();
    net.cut();

    assert!(matches!(
        client.handle_line("").await,
        Err(ClientError::Io(_))
    ));
    assert_eq!(client.pending().len(), 1);

    // The write failure hands over to the monitor, which reconnects.
    let first = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
    assert!(matches!(first, Some(HealthEvent::Disconnected)));
    let second = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
    assert!(matches!(second, Some(HealthEvent::Reconnected { manual: false })));

    assert_eq!(
        client.handle_line("").await.unwrap(),
        LineOutcome::Sent { count: 1 }
    );
}

#[tokio::test]
async fn test_round_trip_against_server() {
    let ship = Arc::new(Ship::new());
    let logger = Logger::new("logger1");
    let logged = logger.values();
    ship.register_device(Box::new(logger)).unwrap();

    let server_config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let server = Server::bind(&server_config, Arc::clone(&ship)).await.unwrap();
    let addr = server.local_addr().unwrap();
    let server = tokio::spawn(server.run());

    let config = ClientConfig {
        server_addr: addr.to_string(),
        ..ClientConfig::default()
    };
    let (mut client, _events) = Client::connect(TcpConnector, config).await.unwrap();
    let mut responses = client.take_responses().await.unwrap();
    assert!(client.take_responses().await.is_none());

    client.handle_line("logger1 4.5 ok").await.unwrap();
    client.handle_line("").await.unwrap();

    let response = timeout(Duration::from_secs(2), responses.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        response,
        Response::Success {
            id: "logger1".to_string(),
            values: vec![Value::Number(4.5), Value::Text("ok".to_string())],
        }
    );
    assert_eq!(logged.snapshot(), vec![4.5]);

    assert_eq!(client.handle_line("/kill").await.unwrap(), LineOutcome::KillSent);
    let finished = timeout(Duration::from_secs(2), server).await.unwrap();
    assert!(finished.unwrap().is_ok());
}
