use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use tftp::{
    Client, ClientConfig, Endpoint, Server, ServerConfig, TftpPacket, TransferError,
    TransferOptions,
};

async fn start_server(root: &Path, read_only: bool) -> (SocketAddr, JoinHandle<()>) {
    start_server_with_timeout(root, read_only, Duration::from_millis(100)).await
}

async fn start_server_with_timeout(
    root: &Path,
    read_only: bool,
    timeout: Duration,
) -> (SocketAddr, JoinHandle<()>) {
    let options = TransferOptions::default()
        .with_timeout(timeout)
        .with_max_retries(5);
    let config = ServerConfig::new(
        "127.0.0.1".parse().unwrap(),
        0,
        root.to_path_buf(),
        read_only,
    )
    .with_options(options);
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = server.serve().await;
    });
    (addr, handle)
}

fn client(server: SocketAddr) -> Client {
    Client::new(
        ClientConfig::new(server)
            .with_timeout(Duration::from_millis(300))
            .with_max_retries(5),
    )
}

#[tokio::test]
async fn read_short_file() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    fs::write(remote.path().join("greeting.txt"), b"hello").unwrap();
    let (addr, server) = start_server(remote.path(), false).await;

    let target = local.path().join("greeting.txt");
    let total = client(addr).get("greeting.txt", &target).await.unwrap();

    assert_eq!(total, 5);
    assert_eq!(fs::read(&target).unwrap(), b"hello");
    server.abort();
}

#[tokio::test]
async fn write_exact_block_multiple() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let source = local.path().join("x.bin");
    fs::write(&source, vec![b'x'; 512]).unwrap();
    let (addr, server) = start_server(remote.path(), false).await;

    let total = client(addr).put(&source, "x.bin").await.unwrap();

    assert_eq!(total, 512);
    // The server commits only after the trailing empty block arrived.
    assert_eq!(fs::read(remote.path().join("x.bin")).unwrap(), vec![b'x'; 512]);
    server.abort();
}

#[tokio::test]
async fn peer_error_leaves_no_local_file() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let (addr, server) = start_server(remote.path(), false).await;

    let target = local.path().join("missing.txt");
    let err = client(addr).get("missing.txt", &target).await.unwrap_err();

    match err {
        TransferError::Peer { code, message } => {
            assert_eq!(code, 1);
            assert_eq!(message, "File not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!target.exists());
    server.abort();
}

#[tokio::test]
async fn round_trip_multi_block_file() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let source = local.path().join("data.bin");
    fs::write(&source, &content).unwrap();
    let (addr, server) = start_server(remote.path(), false).await;
    let client = client(addr);

    assert_eq!(client.put(&source, "data.bin").await.unwrap(), 5000);
    let back = local.path().join("back.bin");
    assert_eq!(client.get("data.bin", &back).await.unwrap(), 5000);

    assert_eq!(fs::read(&back).unwrap(), content);
    server.abort();
}

#[tokio::test]
async fn empty_file_round_trip() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let source = local.path().join("empty");
    fs::write(&source, b"").unwrap();
    let (addr, server) = start_server(remote.path(), false).await;
    let client = client(addr);

    assert_eq!(client.put(&source, "empty").await.unwrap(), 0);
    let back = local.path().join("empty.back");
    assert_eq!(client.get("empty", &back).await.unwrap(), 0);

    assert!(back.exists());
    assert_eq!(fs::read(&back).unwrap().len(), 0);
    server.abort();
}

#[tokio::test]
async fn read_only_server_rejects_write() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let source = local.path().join("a.txt");
    fs::write(&source, b"abc").unwrap();
    let (addr, server) = start_server(remote.path(), true).await;

    let err = client(addr).put(&source, "a.txt").await.unwrap_err();

    assert!(matches!(err, TransferError::Peer { code: 2, .. }));
    assert!(!remote.path().join("a.txt").exists());
    server.abort();
}

#[tokio::test]
async fn server_answers_stray_packet_with_error() {
    let remote = tempfile::tempdir().unwrap();
    let (addr, server) = start_server(remote.path(), false).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    socket
        .send_to(&TftpPacket::ACK(3).serialize(), addr)
        .await
        .unwrap();
    let mut buf = [0u8; 600];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        TftpPacket::deserialize(&buf[..n]),
        Ok(TftpPacket::ERROR { code: 4, .. })
    ));
    server.abort();
}

/// Which datagram the relay swallows, counted per direction from 1.
#[derive(Clone, Copy)]
enum Lose {
    Upstream(usize),
    Downstream(usize),
}

/// Forwards datagrams between one client and `server`, dropping the one
/// selected by `lose`.
async fn lossy_relay(server: SocketAddr, lose: Lose) -> (SocketAddr, JoinHandle<()>) {
    let front = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let back = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = front.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut client = None;
        let mut to_server = 0;
        let mut from_server = 0;
        let mut up = [0u8; 1024];
        let mut down = [0u8; 1024];
        loop {
            tokio::select! {
                Ok((n, from)) = front.recv_from(&mut up) => {
                    client = Some(from);
                    to_server += 1;
                    if matches!(lose, Lose::Upstream(nth) if nth == to_server) {
                        continue;
                    }
                    let _ = back.send_to(&up[..n], server).await;
                }
                Ok((n, _)) = back.recv_from(&mut down) => {
                    from_server += 1;
                    if matches!(lose, Lose::Downstream(nth) if nth == from_server) {
                        continue;
                    }
                    if let Some(client) = client {
                        let _ = front.send_to(&down[..n], client).await;
                    }
                }
                else => break,
            }
        }
    });
    (addr, handle)
}

#[tokio::test]
async fn read_recovers_from_lost_data_block() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let content = vec![7u8; 1500];
    fs::write(remote.path().join("lossy.bin"), &content).unwrap();
    let (addr, server) = start_server(remote.path(), false).await;
    let (relay, relay_task) = lossy_relay(addr, Lose::Downstream(2)).await;

    let target = local.path().join("lossy.bin");
    let total = client(relay).get("lossy.bin", &target).await.unwrap();

    assert_eq!(total, 1500);
    assert_eq!(fs::read(&target).unwrap(), content);
    relay_task.abort();
    server.abort();
}

#[tokio::test]
async fn learned_endpoint_works_against_single_port_server() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    fs::write(remote.path().join("f.txt"), b"learn").unwrap();
    let (addr, server) = start_server(remote.path(), false).await;

    let client = Client::new(
        ClientConfig::new(addr)
            .with_timeout(Duration::from_millis(300))
            .with_endpoint(Endpoint::Learn),
    );
    let target = local.path().join("f.txt");

    assert_eq!(client.get("f.txt", &target).await.unwrap(), 5);
    server.abort();
}

async fn put_through(relay: SocketAddr, content: &[u8], remote: &Path) {
    let local = tempfile::tempdir().unwrap();
    let source = local.path().join("up.bin");
    fs::write(&source, content).unwrap();

    let total = client(relay).put(&source, "up.bin").await.unwrap();

    assert_eq!(total, content.len() as u64);
    // The server commits once its session ends.
    for _ in 0..50 {
        if fs::read(remote.join("up.bin")).ok().as_deref() == Some(content) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server never stored the uploaded file");
}

#[tokio::test]
async fn write_recovers_from_lost_data_block() {
    let remote = tempfile::tempdir().unwrap();
    let (addr, server) = start_server(remote.path(), false).await;
    // Datagram 1 is the WRQ, 2 is DATA #1.
    let (relay, relay_task) = lossy_relay(addr, Lose::Upstream(2)).await;

    put_through(relay, &vec![3u8; 1200], remote.path()).await;

    relay_task.abort();
    server.abort();
}

#[tokio::test]
async fn write_recovers_from_lost_initial_ack() {
    let remote = tempfile::tempdir().unwrap();
    let (addr, server) = start_server(remote.path(), false).await;
    let (relay, relay_task) = lossy_relay(addr, Lose::Downstream(1)).await;

    put_through(relay, b"first ack lost", remote.path()).await;

    relay_task.abort();
    server.abort();
}

#[tokio::test]
async fn write_recovers_from_lost_middle_ack() {
    let remote = tempfile::tempdir().unwrap();
    let (addr, server) = start_server(remote.path(), false).await;
    // ACK #0, then ACK #1 goes missing.
    let (relay, relay_task) = lossy_relay(addr, Lose::Downstream(2)).await;

    put_through(relay, &vec![5u8; 1100], remote.path()).await;

    relay_task.abort();
    server.abort();
}

#[tokio::test]
async fn write_succeeds_when_final_ack_is_lost() {
    let remote = tempfile::tempdir().unwrap();
    let (addr, server) =
        start_server_with_timeout(remote.path(), false, Duration::from_millis(300)).await;
    // ACK #0, then the final ACK #1 of a one-block upload.
    let (relay, relay_task) = lossy_relay(addr, Lose::Downstream(2)).await;

    put_through(relay, b"abc", remote.path()).await;

    relay_task.abort();
    server.abort();
}
