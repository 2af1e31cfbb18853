use crate::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn unknown_operation_gets_no_ack() {
    let server = start_server("unknown-op", RecoveryPolicy::unavailable()).await.unwrap();

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"Delete").await.unwrap();
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0, "server must close without replying");

    // The server keeps accepting.
    assert!(server.client.list().await.unwrap().is_empty());

    let events = server.stop().await.unwrap();
    assert!(events.iter().any(|e| e.event == "outcome"
        && e.detail.as_deref().is_some_and(|d| d.contains("unknown operation"))));
}

#[tokio::test]
async fn wire_exchange_for_show() {
    let server = start_server("wire-show", RecoveryPolicy::unavailable()).await.unwrap();
    server.store.write("x.txt", b"1").await.unwrap();

    let mut ch = server.raw().await.unwrap();
    ch.send_message("Show").await.unwrap();
    assert_eq!(ch.recv_text().await.unwrap(), "Recieved Transfer type");
    ch.send_message("Sending Filenames").await.unwrap();
    assert_eq!(ch.recv_to_end().await.unwrap(), "x.txt");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn framed_blob_over_tcp_boundary_sizes() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let sizes = [0usize, 1, 8191, 8192, 8193, 1_000_000];
    let receiver = tokio::spawn(async move {
        let mut got = Vec::new();
        for _ in sizes {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ch = FramedChannel::new(stream, test_channel_config());
            got.push(ch.recv_blob().await.unwrap());
        }
        got
    });

    let mut sent = Vec::new();
    for size in sizes {
        let blob: Vec<u8> = (0..size).map(|i| (i * 31 % 256) as u8).collect();
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut ch = FramedChannel::new(stream, test_channel_config());
        ch.send_blob(&blob).await.unwrap();
        sent.push(blob);
    }

    assert_eq!(receiver.await.unwrap(), sent);
}

#[tokio::test]
async fn dropped_client_mid_upload_does_not_kill_server() {
    let server = start_server("dropped", RecoveryPolicy::unavailable()).await.unwrap();

    let mut ch = server.raw().await.unwrap();
    ch.send_message("Upload").await.unwrap();
    ch.expect_message("Recieved Transfer type").await.unwrap();
    ch.send_message("half.txt").await.unwrap();
    ch.expect_message("filename recieved").await.unwrap();
    ch.send_message("100000").await.unwrap();
    ch.expect_message("OK").await.unwrap();
    drop(ch);

    let report = server.client.upload("whole.txt", b"fine").await.unwrap();
    assert!(report.verified);
    assert!(!server.store.exists("half.txt").await.unwrap());

    server.stop().await.unwrap();
}
