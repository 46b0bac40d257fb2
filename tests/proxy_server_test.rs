//! End-to-end tests driving the proxy over loopback sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use minisocks::{Config, ConnectionManager, ShutdownCoordinator};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1:0".parse().unwrap();
    config
}

async fn start_server(config: Config) -> (Arc<ConnectionManager>, SocketAddr, JoinHandle<()>) {
    let mut manager = ConnectionManager::new(Arc::new(config));
    let addr = manager.bind().await.unwrap();
    let manager = Arc::new(manager);

    let accept_loop = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager.accept_connections().await.unwrap();
        })
    };

    (manager, addr, accept_loop)
}

/// Echo server that serves every connection until its peer closes
async fn start_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn greet(client: &mut TcpStream) {
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut selection = [0u8; 2];
    timeout(IO_TIMEOUT, client.read_exact(&mut selection))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(selection, [0x05, 0x00]);
}

fn connect_domain(host: &str, port: u16) -> Vec<u8> {
    let mut request = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    request
}

fn ipv4_request(command: u8, port: u16) -> Vec<u8> {
    let mut request = vec![0x05, command, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&port.to_be_bytes());
    request
}

/// Read one command reply: (status, host, port)
async fn read_reply(client: &mut TcpStream) -> (u8, String, u16) {
    let mut header = [0u8; 5];
    timeout(IO_TIMEOUT, client.read_exact(&mut header))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(header[0], 0x05);
    assert_eq!(header[2], 0x00);
    assert_eq!(header[3], 0x03, "replies always carry a domain-form address");

    let mut host = vec![0u8; header[4] as usize];
    client.read_exact(&mut host).await.unwrap();
    let port = client.read_u16().await.unwrap();
    (header[1], String::from_utf8(host).unwrap(), port)
}

/// Read whatever is left until the server closes; a reset counts as closed
async fn drain(client: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    match timeout(IO_TIMEOUT, client.read_to_end(&mut rest)).await {
        Ok(_) => rest,
        Err(_) => panic!("server did not close the connection"),
    }
}

async fn wait_until_idle(manager: &ConnectionManager) {
    timeout(IO_TIMEOUT, async {
        while manager.get_active_connections() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sessions should release their slots");
}

#[tokio::test]
async fn test_connect_by_domain_relays_data() {
    let target = start_echo_target().await;
    let (manager, proxy_addr, _accept) = start_server(test_config()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client
        .write_all(&connect_domain("localhost", target.port()))
        .await
        .unwrap();

    let (status, host, port) = read_reply(&mut client).await;
    assert_eq!(status, 0x00);
    assert_eq!(host, "127.0.0.1");
    assert_eq!(port, proxy_addr.port());
    assert_eq!(manager.get_active_connections(), 1);

    client.write_all(b"hello through the proxy").await.unwrap();
    let mut echoed = [0u8; 23];
    timeout(IO_TIMEOUT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"hello through the proxy");

    client.shutdown().await.unwrap();
    drain(&mut client).await;
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_connect_by_ipv4_succeeds() {
    let target = start_echo_target().await;
    let (manager, proxy_addr, _accept) = start_server(test_config()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client
        .write_all(&ipv4_request(0x01, target.port()))
        .await
        .unwrap();

    let (status, _, _) = read_reply(&mut client).await;
    assert_eq!(status, 0x00);

    drop(client);
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_unreachable_target_gets_general_failure() {
    let (manager, proxy_addr, _accept) = start_server(test_config()).await;
    let port = closed_port().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client.write_all(&ipv4_request(0x01, port)).await.unwrap();

    let (status, _, _) = read_reply(&mut client).await;
    assert_eq!(status, 0x01);
    assert!(drain(&mut client).await.is_empty());
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_detailed_dial_errors_report_refusal() {
    let mut config = test_config();
    config.server.detailed_dial_errors = true;
    let (_manager, proxy_addr, _accept) = start_server(config).await;
    let port = closed_port().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client.write_all(&ipv4_request(0x01, port)).await.unwrap();

    let (status, _, _) = read_reply(&mut client).await;
    assert_eq!(status, 0x05);
}

#[tokio::test]
async fn test_bind_and_udp_associate_are_refused() {
    let target = start_echo_target().await;
    let (manager, proxy_addr, _accept) = start_server(test_config()).await;

    for command in [0x02, 0x03] {
        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        greet(&mut client).await;
        client
            .write_all(&ipv4_request(command, target.port()))
            .await
            .unwrap();

        let (status, _, _) = read_reply(&mut client).await;
        assert_eq!(status, 0x07, "command 0x{:02x} must be refused", command);
        assert!(drain(&mut client).await.is_empty());
    }

    wait_until_idle(&manager).await;
    assert_eq!(manager.get_connection_stats().total_connections_admitted, 2);
}

#[tokio::test]
async fn test_ipv6_target_is_refused_as_unsupported_command() {
    let (manager, proxy_addr, _accept) = start_server(test_config()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    let mut request = vec![0x05, 0x01, 0x00, 0x04];
    request.extend_from_slice(&std::net::Ipv6Addr::LOCALHOST.octets());
    request.extend_from_slice(&443u16.to_be_bytes());
    assert_eq!(request.len(), 22);
    client.write_all(&request).await.unwrap();

    let (status, _, _) = read_reply(&mut client).await;
    assert_eq!(status, 0x07);
    assert!(drain(&mut client).await.is_empty());
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_unknown_command_is_refused() {
    let (manager, proxy_addr, _accept) = start_server(test_config()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    // rejected as soon as the CMD byte is seen; the address is never read
    client.write_all(&[0x05, 0x09, 0x00, 0x01]).await.unwrap();

    let (status, host, port) = read_reply(&mut client).await;
    assert_eq!(status, 0x07);
    assert_eq!(host, "127.0.0.1");
    assert_eq!(port, proxy_addr.port());
    assert!(drain(&mut client).await.is_empty());
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_unknown_address_type_is_refused() {
    let (manager, proxy_addr, _accept) = start_server(test_config()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client.write_all(&[0x05, 0x01, 0x00, 0x05]).await.unwrap();

    let (status, _, _) = read_reply(&mut client).await;
    assert_eq!(status, 0x08);
    assert!(drain(&mut client).await.is_empty());
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_wrong_version_is_closed_without_reply() {
    let (manager, proxy_addr, _accept) = start_server(test_config()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(&[0x04, 0x01]).await.unwrap();

    assert!(drain(&mut client).await.is_empty());
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_bad_reserved_byte_is_closed_without_reply() {
    let (manager, proxy_addr, _accept) = start_server(test_config()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client.write_all(&[0x05, 0x01, 0x01, 0x01]).await.unwrap();

    assert!(drain(&mut client).await.is_empty());
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_advertised_host_is_reported() {
    let target = start_echo_target().await;
    let mut config = test_config();
    config.server.advertised_host = Some("proxy.example".to_string());
    let (manager, proxy_addr, _accept) = start_server(config).await;
    assert_eq!(manager.server_identity().unwrap().host(), "proxy.example");

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client
        .write_all(&ipv4_request(0x01, target.port()))
        .await
        .unwrap();

    let (status, host, port) = read_reply(&mut client).await;
    assert_eq!(status, 0x00);
    assert_eq!(host, "proxy.example");
    assert_eq!(port, proxy_addr.port());
}

#[tokio::test]
async fn test_wildcard_bind_reports_reached_address() {
    let mut config = test_config();
    config.server.bind_addr = "0.0.0.0:0".parse().unwrap();
    let (manager, bound, _accept) = start_server(config).await;
    assert!(bound.ip().is_unspecified());

    let proxy_addr = SocketAddr::from(([127, 0, 0, 1], bound.port()));
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client.write_all(&ipv4_request(0x02, 80)).await.unwrap();

    let (status, host, port) = read_reply(&mut client).await;
    assert_eq!(status, 0x07);
    assert_eq!(host, "127.0.0.1");
    assert_eq!(port, bound.port());
    assert!(drain(&mut client).await.is_empty());
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_relay_budget_closes_idle_session() {
    let target = start_echo_target().await;
    let mut config = test_config();
    config.server.relay_timeout = Duration::from_millis(300);
    let (manager, proxy_addr, _accept) = start_server(config).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client
        .write_all(&ipv4_request(0x01, target.port()))
        .await
        .unwrap();
    let (status, _, _) = read_reply(&mut client).await;
    assert_eq!(status, 0x00);

    // nothing is sent; the proxy closes the session on its own
    assert!(drain(&mut client).await.is_empty());
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_handshake_timeout_drops_silent_client() {
    let mut config = test_config();
    config.server.handshake_timeout = Some(Duration::from_millis(200));
    let (manager, proxy_addr, _accept) = start_server(config).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    assert!(drain(&mut client).await.is_empty());
    wait_until_idle(&manager).await;
}

#[tokio::test]
async fn test_capacity_exceeded_closes_new_connection() {
    let mut config = test_config();
    config.server.max_connections = 1;
    let (manager, proxy_addr, _accept) = start_server(config).await;

    // hold the only slot mid-negotiation
    let mut holder = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut holder).await;
    assert_eq!(manager.get_active_connections(), 1);

    let mut rejected = TcpStream::connect(proxy_addr).await.unwrap();
    let _ = rejected.write_all(&[0x05, 0x01, 0x00]).await;
    let leftover = drain(&mut rejected).await;
    assert!(leftover.is_empty(), "rejected client must get no bytes");

    let stats = manager.get_connection_stats();
    assert_eq!(stats.total_connections_rejected, 1);
    assert_eq!(stats.active_connections, 1);

    drop(holder);
    wait_until_idle(&manager).await;

    // the slot is usable again
    let mut next = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut next).await;
}

#[tokio::test]
async fn test_shutdown_stops_accept_loop() {
    let (manager, _proxy_addr, accept_loop) = start_server(test_config()).await;
    assert!(!manager.is_shutting_down());

    manager.shutdown().await.unwrap();

    timeout(IO_TIMEOUT, accept_loop)
        .await
        .expect("accept loop should stop")
        .unwrap();
    assert!(manager.is_shutting_down());
}

#[tokio::test]
async fn test_shutdown_signal_stops_server_and_drains() {
    let target = start_echo_target().await;
    let mut config = test_config();
    config.server.shutdown_timeout = Duration::from_secs(2);

    let mut manager = ConnectionManager::new(Arc::new(config));
    let proxy_addr = manager.bind().await.unwrap();
    let manager = Arc::new(manager);

    let coordinator = ShutdownCoordinator::new();
    let server = {
        let manager = Arc::clone(&manager);
        let signal = coordinator.subscribe();
        tokio::spawn(async move { manager.run_until_shutdown(signal).await })
    };

    // a session in flight when the signal arrives
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    greet(&mut client).await;
    client
        .write_all(&ipv4_request(0x01, target.port()))
        .await
        .unwrap();
    let (status, _, _) = read_reply(&mut client).await;
    assert_eq!(status, 0x00);

    coordinator.trigger();
    sleep(Duration::from_millis(100)).await;
    assert!(manager.is_shutting_down());

    // the session keeps working until it ends on its own
    client.write_all(b"still here").await.unwrap();
    let mut echoed = [0u8; 10];
    timeout(IO_TIMEOUT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"still here");
    drop(client);

    timeout(IO_TIMEOUT, server)
        .await
        .expect("server should stop after draining")
        .unwrap()
        .unwrap();
    assert_eq!(manager.get_active_connections(), 0);
}
