use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rstest::{fixture, rstest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{sleep, timeout};

use chronodb::{
    setup_local_tracing, ClusterConfig, ConnectionRole, GeneralConfig, NetworkConfig, Package,
    PackageHeader, Server, ServerConfig, ServerNode, GLOBAL_CONFIG, HEADER_SIZE, NODE_CONNECTED,
    TYPE_ACK, TYPE_PING,
};

#[fixture]
#[once]
fn setup() {
    GLOBAL_CONFIG.get_or_init(|| ServerConfig {
        general: GeneralConfig {
            server_id: 0,
            log_dir: "logs".to_string(),
        },
        network: NetworkConfig {
            ip: "127.0.0.1".to_string(),
            client_port: 0,
            server_port: 0,
            max_connection: 16,
            max_package_size: 1024 * 1024,
            read_buffer_size: 65536,
        },
        cluster: ClusterConfig { peers: Vec::new() },
    });
    setup_local_tracing().expect("failed to setup tracing");
}

async fn start_server(
    role: ConnectionRole,
    peers: Arc<Vec<Arc<ServerNode>>>,
) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, _shutdown_complete_rx) = mpsc::channel(1);
    let server = Server::new(
        listener,
        role,
        Arc::new(Semaphore::new(16)),
        notify_shutdown,
        shutdown_complete_tx,
        peers,
    );
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    address
}

async fn read_package(stream: &mut TcpStream) -> Package {
    let mut header_bytes = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_bytes).await.unwrap();
    let header = PackageHeader::read_from(&header_bytes);
    let mut body = vec![0u8; header.body_length as usize];
    stream.read_exact(&mut body).await.unwrap();
    Package::new(header.correlation_id, header.message_type, Bytes::from(body))
}

#[rstest]
#[tokio::test]
async fn test_ping_is_acked_with_same_correlation_id(_setup: ()) {
    let address = start_server(ConnectionRole::Client, Arc::new(Vec::new())).await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    let ping = Package::new(42, TYPE_PING, Bytes::from_static(b"hello"));
    stream.write_all(&ping.encode()).await.unwrap();

    let ack = timeout(Duration::from_secs(2), read_package(&mut stream))
        .await
        .expect("no ack before timeout");
    assert_eq!(ack.header.correlation_id, 42);
    assert_eq!(ack.header.message_type, TYPE_ACK);
}

#[rstest]
#[tokio::test]
async fn test_package_split_inside_header_is_reassembled(_setup: ()) {
    let address = start_server(ConnectionRole::Client, Arc::new(Vec::new())).await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    let ping = Package::new(42, TYPE_PING, Bytes::from_static(b"hello")).encode();
    stream.write_all(&ping[..3]).await.unwrap();
    stream.flush().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    stream.write_all(&ping[3..]).await.unwrap();

    let ack = timeout(Duration::from_secs(2), read_package(&mut stream))
        .await
        .expect("no ack before timeout");
    assert_eq!(ack.header.correlation_id, 42);
    assert_eq!(ack.header.message_type, TYPE_ACK);
}

#[rstest]
#[tokio::test]
async fn test_over_delivery_is_dropped_without_closing_the_connection(_setup: ()) {
    let address = start_server(ConnectionRole::Client, Arc::new(Vec::new())).await;
    let mut stream = TcpStream::connect(address).await.unwrap();

    // a complete ping plus unannounced trailing bytes in a single write
    let mut frame = Package::new(7, TYPE_PING, Bytes::from_static(b"hello"))
        .encode()
        .to_vec();
    frame.extend_from_slice(b"junk");
    stream.write_all(&frame).await.unwrap();

    // the over-delivered package is discarded, so no ack correlates to it
    let silent = timeout(Duration::from_millis(300), read_package(&mut stream)).await;
    assert!(silent.is_err(), "over-delivered package must not be acked");

    // the connection is back to idle and frames the next package correctly
    sleep(Duration::from_millis(50)).await;
    let ping = Package::new(8, TYPE_PING, Bytes::new());
    stream.write_all(&ping.encode()).await.unwrap();
    let ack = timeout(Duration::from_secs(2), read_package(&mut stream))
        .await
        .expect("no ack before timeout");
    assert_eq!(ack.header.correlation_id, 8);
    assert_eq!(ack.header.message_type, TYPE_ACK);
}

#[rstest]
#[tokio::test]
async fn test_server_connection_binds_and_clears_node_backpointer(_setup: ()) {
    let node = Arc::new(ServerNode::new(9, "127.0.0.1", 9010));
    let peers = Arc::new(vec![node.clone()]);
    let address = start_server(ConnectionRole::Server, peers).await;

    let stream = TcpStream::connect(address).await.unwrap();
    for _ in 0..100 {
        if node.connection().is_some() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(node.connection().is_some());
    assert_eq!(node.flags() & NODE_CONNECTED, NODE_CONNECTED);

    drop(stream);
    for _ in 0..100 {
        if node.connection().is_none() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(node.connection(), None);
    assert_eq!(node.flags(), 0);
}
