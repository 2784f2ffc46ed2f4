//! End-to-end tests against a scripted bridge on loopback.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use sam_client::{ControlClient, DatagramSession, Error, StreamSession};
use sam_core::chunk::ChunkAssembly;
use sam_core::reply::extract_pair;
use sam_core::{
    BridgeAddr, DatagramError, DatagramHeader, Destination, ReplyError, SessionConfig,
    SessionIdentity,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

const DEADLINE: Duration = Duration::from_secs(5);

async fn bridge() -> (TcpListener, SessionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = SessionConfig::builder()
        .bridge(BridgeAddr {
            host: "127.0.0.1".into(),
            port,
        })
        .tunnel_name("test")
        .build()
        .unwrap();
    (listener, config)
}

async fn read_line(conn: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    conn.read_line(&mut line).await.unwrap();
    line
}

/// Accept one control connection and answer `HELLO`.
async fn handshake(listener: &TcpListener) -> BufReader<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut conn = BufReader::new(stream);
    let hello = read_line(&mut conn).await;
    assert_eq!(hello, "HELLO VERSION MIN=3.0 MAX=3.3\n");
    conn.get_mut()
        .write_all(b"HELLO REPLY RESULT=OK VERSION=3.3\n")
        .await
        .unwrap();
    conn
}

/// Control connection carrying a created session.
async fn session_conn(listener: &TcpListener) -> BufReader<TcpStream> {
    let mut conn = handshake(listener).await;
    let create = read_line(&mut conn).await;
    assert!(create.starts_with("SESSION CREATE STYLE=STREAM  ID=test "), "{create}");
    conn.get_mut()
        .write_all(b"SESSION STATUS RESULT=OK DESTINATION=privdest\n")
        .await
        .unwrap();
    conn
}

#[tokio::test]
async fn session_create_and_close() {
    let (listener, config) = bridge().await;
    let server = tokio::spawn(async move {
        let mut conn = session_conn(&listener).await;
        // EOF once the client closes.
        read_line(&mut conn).await
    });

    let session = tokio::time::timeout(DEADLINE, StreamSession::create(config))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.id(), "test");
    assert_eq!(session.version(), Some("3.3"));
    assert_eq!(session.echoed_destination(), Some("privdest"));
    session.close().await.unwrap();
    assert_eq!(server.await.unwrap(), "");
}

#[tokio::test]
async fn hello_failure_is_reported() {
    let (listener, config) = bridge().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = BufReader::new(stream);
        read_line(&mut conn).await;
        conn.get_mut()
            .write_all(b"HELLO REPLY RESULT=NOVERSION\n")
            .await
            .unwrap();
    });

    let err = StreamSession::create(config).await.unwrap_err();
    assert!(matches!(err, Error::Reply(ReplyError::Failed { .. })), "{err}");
}

#[tokio::test]
async fn generate_destination_on_control_client() {
    let (listener, config) = bridge().await;
    tokio::spawn(async move {
        let mut conn = handshake(&listener).await;
        assert_eq!(
            read_line(&mut conn).await,
            "DEST GENERATE SIGNATURE_TYPE=EdDSA_SHA512_Ed25519\n"
        );
        conn.get_mut()
            .write_all(b"DEST REPLY PUB=pubdest PRIV=privkey\n")
            .await
            .unwrap();
        read_line(&mut conn).await;
    });

    let mut client = ControlClient::connect(&config).await.unwrap();
    let keys = client.generate_destination(&config).await.unwrap();
    assert_eq!(keys.public().as_str(), "pubdest");
    assert_eq!(keys.private(), "privkey");
    client.close().await.unwrap();
}

#[tokio::test]
async fn accept_yields_peer_and_early_bytes() {
    let (listener, config) = bridge().await;
    tokio::spawn(async move {
        let _session = session_conn(&listener).await;
        let mut conn = handshake(&listener).await;
        let accept = read_line(&mut conn).await;
        assert_eq!(accept, "STREAM ACCEPT ID=test  SILENT=false\n");
        conn.get_mut()
            .write_all(b"STREAM STATUS RESULT=OK\npeer.b32.i2p FROM_PORT=5 TO_PORT=6\nhello")
            .await
            .unwrap();
        let mut echo = [0u8; 4];
        conn.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"pong");
    });

    let session = StreamSession::create(config).await.unwrap();
    let mut conn = tokio::time::timeout(DEADLINE, session.listen().accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conn.remote_destination().as_str(), "peer.b32.i2p");
    assert_eq!(conn.from_port(), Some(5));
    assert_eq!(conn.to_port(), Some(6));

    let mut buf = [0u8; 5];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
    conn.write_all(b"pong").await.unwrap();
}

#[tokio::test]
async fn accept_failure_status() {
    let (listener, config) = bridge().await;
    tokio::spawn(async move {
        let _session = session_conn(&listener).await;
        let mut conn = handshake(&listener).await;
        read_line(&mut conn).await;
        conn.get_mut()
            .write_all(b"STREAM STATUS RESULT=I2P_ERROR MESSAGE=\"no tunnels\"\n")
            .await
            .unwrap();
    });

    let session = StreamSession::create(config).await.unwrap();
    let err = tokio::time::timeout(DEADLINE, session.listen().accept())
        .await
        .unwrap()
        .unwrap_err();
    match err {
        Error::Reply(ReplyError::Failed { result, .. }) => assert_eq!(result, "I2P_ERROR"),
        other => panic!("expected failed status, got {other}"),
    }
}

#[tokio::test]
async fn accept_without_destination_line() {
    let (listener, config) = bridge().await;
    tokio::spawn(async move {
        let _session = session_conn(&listener).await;
        let mut conn = handshake(&listener).await;
        read_line(&mut conn).await;
        conn.get_mut()
            .write_all(b"STREAM STATUS RESULT=OK\n")
            .await
            .unwrap();
        drop(conn);
    });

    let session = StreamSession::create(config).await.unwrap();
    let err = session.listen().accept().await.unwrap_err();
    assert!(matches!(err, Error::DestinationMissing), "{err}");
}

#[tokio::test]
async fn accept_times_out() {
    let (listener, config) = bridge().await;
    tokio::spawn(async move {
        let _session = session_conn(&listener).await;
        let mut conn = handshake(&listener).await;
        read_line(&mut conn).await;
        tokio::time::sleep(DEADLINE).await;
    });

    let session = StreamSession::create(config).await.unwrap();
    let listener = session.listen().with_timeout(Duration::from_millis(200));
    let err = listener.accept().await.unwrap_err();
    assert!(matches!(err, Error::AcceptTimeout(t) if t == Duration::from_millis(200)));
}

#[tokio::test]
async fn dial_resolves_then_connects() {
    let (listener, config) = bridge().await;
    tokio::spawn(async move {
        let _session = session_conn(&listener).await;

        let mut lookup = handshake(&listener).await;
        assert_eq!(read_line(&mut lookup).await, "NAMING LOOKUP NAME=echo.i2p\n");
        lookup
            .get_mut()
            .write_all(b"NAMING REPLY RESULT=OK NAME=echo.i2p VALUE=echodest\n")
            .await
            .unwrap();

        let mut stream = handshake(&listener).await;
        assert_eq!(
            read_line(&mut stream).await,
            "STREAM CONNECT ID=test  DESTINATION=echodest\n"
        );
        stream
            .get_mut()
            .write_all(b"STREAM STATUS RESULT=OK\n")
            .await
            .unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        stream.get_mut().write_all(&buf).await.unwrap();
    });

    let session = StreamSession::create(config).await.unwrap();
    let mut conn = tokio::time::timeout(DEADLINE, session.dial("echo.i2p"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conn.remote_destination().as_str(), "echodest");
    conn.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn datagram_chunking_and_receive() {
    let (listener, mut config) = bridge().await;
    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    config.datagram_port = udp.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let mut conn = handshake(&listener).await;
        let create = read_line(&mut conn).await;
        assert!(create.starts_with("SESSION CREATE STYLE=DATAGRAM  ID=dg "), "{create}");
        assert_eq!(extract_pair(&create, "HOST"), Some("127.0.0.1"));
        assert!(extract_pair(&create, "PORT").is_some());
        conn.get_mut()
            .write_all(b"SESSION STATUS RESULT=OK\n")
            .await
            .unwrap();
        read_line(&mut conn).await
    });

    let session =
        DatagramSession::create_with_identity(config, SessionIdentity::new(Some("dg")), 0, None)
            .await
            .unwrap();
    let peer = Destination::parse("peer.b32.i2p").unwrap();

    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(session.send_to(&payload, &peer).await.unwrap(), 20_000);

    let mut frame = vec![0u8; 65_536];
    let mut assembly = ChunkAssembly::new(2);
    let mut sizes = Vec::new();
    for _ in 0..2 {
        let (n, _) = tokio::time::timeout(DEADLINE, udp.recv_from(&mut frame))
            .await
            .unwrap()
            .unwrap();
        let (header, len) = DatagramHeader::parse(&frame[..n]).unwrap();
        assert_eq!(header.session_id, "dg");
        assert_eq!(header.destination, peer);
        let chunk = header.chunk.unwrap();
        sizes.push(n - len);
        assembly
            .mark_received(chunk.index, chunk.total, frame[len..n].to_vec())
            .unwrap();
    }
    sizes.sort_unstable();
    assert_eq!(sizes, vec![8992, 11008]);
    assert_eq!(assembly.reassemble_into_bytes().unwrap(), payload);

    let too_big = vec![0u8; 40_000];
    assert!(matches!(
        session.send_to(&too_big, &peer).await,
        Err(Error::Datagram(DatagramError::TooLarge { .. }))
    ));

    let client = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        session.local_port().unwrap(),
    );
    udp.send_to(b"src.b32.i2p hi there", client).await.unwrap();
    let mut buf = [0u8; 64];
    let (n, from) = session.recv_timeout(&mut buf, DEADLINE).await.unwrap();
    assert_eq!(&buf[..n], b"hi there");
    assert_eq!(from.as_str(), "src.b32.i2p");

    udp.send_to(b"src.b32.i2p 0123456789", client).await.unwrap();
    let mut small = [0u8; 4];
    match session.recv_timeout(&mut small, DEADLINE).await {
        Err(Error::BufferTooSmall {
            copied,
            frame_len,
            from,
        }) => {
            assert_eq!((copied, frame_len), (4, 10));
            assert_eq!(from.as_str(), "src.b32.i2p");
        }
        other => panic!("expected BufferTooSmall, got {other:?}"),
    }
    assert_eq!(&small, b"0123");

    session.close().await.unwrap();
    assert_eq!(server.await.unwrap(), "");
}

#[tokio::test]
async fn datagram_send_requires_remote() {
    let (listener, mut config) = bridge().await;
    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    config.datagram_port = udp.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut conn = handshake(&listener).await;
        let create = read_line(&mut conn).await;
        assert!(create.starts_with("SESSION CREATE STYLE=DATAGRAM  ID=test "), "{create}");
        conn.get_mut()
            .write_all(b"SESSION STATUS RESULT=OK\n")
            .await
            .unwrap();
        read_line(&mut conn).await;
    });

    let mut session = DatagramSession::create(config, 0, None).await.unwrap();
    assert_eq!(session.id(), "test");
    assert!(matches!(session.send(b"x").await, Err(Error::NoRemote)));
    session.dial(Destination::parse("peer.b32.i2p").unwrap());
    assert_eq!(session.send(b"x").await.unwrap(), 1);
    let mut frame = [0u8; 256];
    let (n, _) = udp.recv_from(&mut frame).await.unwrap();
    let (header, len) = DatagramHeader::parse(&frame[..n]).unwrap();
    assert_eq!(header.revision(), "3.1");
    assert!(header.chunk.is_none());
    assert_eq!(&frame[len..n], b"x");
}

#[tokio::test]
async fn datagram_receive_skips_foreign_senders() {
    let (listener, mut config) = bridge().await;
    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    config.datagram_port = udp.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut conn = handshake(&listener).await;
        read_line(&mut conn).await;
        conn.get_mut()
            .write_all(b"SESSION STATUS RESULT=OK\n")
            .await
            .unwrap();
        read_line(&mut conn).await;
    });

    let session = DatagramSession::create(config, 0, None).await.unwrap();
    let client = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        session.local_port().unwrap(),
    );

    let stranger = UdpSocket::bind("127.0.0.2:0").await.unwrap();
    stranger
        .send_to(b"spoof.b32.i2p bad", client)
        .await
        .unwrap();
    udp.send_to(b"src.b32.i2p good", client).await.unwrap();
    let mut buf = [0u8; 64];
    let (n, from) = session.recv_timeout(&mut buf, DEADLINE).await.unwrap();
    assert_eq!(&buf[..n], b"good");
    assert_eq!(from.as_str(), "src.b32.i2p");

    // Payloads well past the caller's buffer still report their full length.
    let mut big = b"src.b32.i2p ".to_vec();
    big.extend(std::iter::repeat(9u8).take(20_000));
    udp.send_to(&big, client).await.unwrap();
    match session.recv_timeout(&mut buf, DEADLINE).await {
        Err(Error::BufferTooSmall {
            copied, frame_len, ..
        }) => assert_eq!((copied, frame_len), (64, 20_000)),
        other => panic!("expected BufferTooSmall, got {other:?}"),
    }
}
