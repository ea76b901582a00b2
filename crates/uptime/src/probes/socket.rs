//! Raw TCP and UDP probes.

use super::BodyCheck;
use crate::types::{Outcome, causes};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

const RECV_BUFFER: usize = 1024;

/// Connect, optionally send `data`, read one reply and judge it
pub(super) async fn probe_tcp(
    host: &str,
    port: u16,
    data: Option<&str>,
    check: BodyCheck<'_>,
    timeout_duration: Duration,
) -> Outcome {
    let start = Instant::now();
    let exchange = async {
        let mut stream = TcpStream::connect((host, port)).await?;
        if let Some(data) = data {
            stream.write_all(data.as_bytes()).await?;
        }
        let mut buf = vec![0u8; RECV_BUFFER];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok::<_, io::Error>(buf)
    };

    let result = timeout(timeout_duration, exchange).await;
    finish("tcp", host, port, result, start, check)
}

/// Same exchange over a connected UDP socket
pub(super) async fn probe_udp(
    host: &str,
    port: u16,
    data: Option<&str>,
    check: BodyCheck<'_>,
    timeout_duration: Duration,
) -> Outcome {
    let start = Instant::now();
    let exchange = async {
        let target = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))?;
        let local: SocketAddr = if target.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        if let Some(data) = data {
            socket.send(data.as_bytes()).await?;
        }
        let mut buf = vec![0u8; RECV_BUFFER];
        let n = socket.recv(&mut buf).await?;
        buf.truncate(n);
        Ok::<_, io::Error>(buf)
    };

    let result = timeout(timeout_duration, exchange).await;
    finish("udp", host, port, result, start, check)
}

fn finish(
    protocol: &str,
    host: &str,
    port: u16,
    result: Result<io::Result<Vec<u8>>, tokio::time::error::Elapsed>,
    start: Instant,
    check: BodyCheck<'_>,
) -> Outcome {
    let received = match result {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            debug!(protocol, host, port, error = %e, "Socket probe failed");
            return Outcome::unreachable(classify_io_error(&e));
        }
        Err(_) => {
            debug!(protocol, host, port, "Socket probe timed out");
            return Outcome::timeout();
        }
    };

    let elapsed = start.elapsed();
    let text = String::from_utf8_lossy(&received).into_owned();
    match check.failure(&text) {
        Some(cause) => Outcome::down(cause, elapsed, text),
        None => Outcome::up(elapsed, text),
    }
}

fn classify_io_error(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => causes::CONNECTION_REFUSED,
        io::ErrorKind::TimedOut => causes::TIMEOUT,
        io::ErrorKind::NotFound => causes::DNS_FAILURE,
        _ if err.to_string().contains("failed to lookup address") => causes::DNS_FAILURE,
        _ => causes::CONNECTION_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = probe_tcp("127.0.0.1", port, None, BodyCheck::None, Duration::from_secs(1)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.cause(), causes::CONNECTION_REFUSED);
        assert_eq!(outcome.response_time, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_tcp_round_trip_with_keyword() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"PING");
            stream.write_all(b"+PONG\r\n").await.unwrap();
        });

        let outcome = probe_tcp(
            "127.0.0.1",
            port,
            Some("PING"),
            BodyCheck::MustContain("PONG"),
            Duration::from_secs(2),
        )
        .await;
        assert!(outcome.success, "unexpected failure: {:?}", outcome.cause);
        assert_eq!(outcome.response_preview, "+PONG\r\n");
    }

    #[tokio::test]
    async fn test_tcp_keyword_not_found() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"-ERR\r\n").await.unwrap();
        });

        let outcome = probe_tcp(
            "127.0.0.1",
            port,
            None,
            BodyCheck::MustContain("PONG"),
            Duration::from_secs(2),
        )
        .await;
        assert!(!outcome.success);
        assert_eq!(outcome.cause(), causes::KEYWORD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tcp_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let outcome = probe_tcp("127.0.0.1", port, None, BodyCheck::None, Duration::from_millis(200)).await;
        assert!(!outcome.success);
        assert_eq!(outcome.cause(), causes::TIMEOUT);
    }

    #[tokio::test]
    async fn test_tcp_unresolvable_host() {
        let outcome = probe_tcp(
            "monitstatus.invalid",
            80,
            None,
            BodyCheck::None,
            Duration::from_secs(10),
        )
        .await;
        assert!(!outcome.success);
        assert_eq!(outcome.cause(), causes::DNS_FAILURE);
    }

    #[tokio::test]
    async fn test_udp_echo() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&buf[..n], peer).await.unwrap();
        });

        let outcome = probe_udp(
            "127.0.0.1",
            port,
            Some("hello"),
            BodyCheck::None,
            Duration::from_secs(2),
        )
        .await;
        assert!(outcome.success);
        assert_eq!(outcome.response_preview, "hello");
    }
}
