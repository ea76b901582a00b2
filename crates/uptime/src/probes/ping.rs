//! ICMP echo probe.

use super::ProbeError;
use crate::types::{Outcome, causes};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tracing::debug;

const PAYLOAD: [u8; 56] = [0; 56];

/// Per-packet timeout when `timeout` is shared by `count` packets
pub(crate) fn packet_timeout(timeout: Duration, count: u32) -> Duration {
    timeout / count.max(1)
}

async fn resolve(host: &str, deadline: Instant) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    let lookup = tokio::time::timeout_at(deadline, tokio::net::lookup_host((host, 0)))
        .await
        .ok()?
        .ok()?;
    lookup.map(|addr| addr.ip()).next()
}

pub(super) async fn probe(
    endpoint: &str,
    num_pings: u32,
    timeout: Duration,
) -> Result<Outcome, ProbeError> {
    let count = num_pings.max(1);
    let deadline = Instant::now() + timeout;
    let Some(addr) = resolve(endpoint, deadline).await else {
        if Instant::now() >= deadline {
            return Ok(Outcome::timeout());
        }
        return Ok(Outcome::unreachable(causes::DNS_FAILURE));
    };

    let config = match addr {
        IpAddr::V4(_) => Config::default(),
        IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
    };
    let client = Client::new(&config)
        .map_err(|e| ProbeError::Setup(format!("ICMP socket unavailable: {}", e)))?;

    let mut pinger = client.pinger(addr, PingIdentifier(rand::random())).await;
    // packets share whatever the lookup left of the budget
    let remaining = deadline.saturating_duration_since(Instant::now());
    pinger.timeout(packet_timeout(remaining, count));

    let mut lines = Vec::with_capacity(count as usize);
    let mut round_trips = Vec::with_capacity(count as usize);
    let mut first_failure: Option<String> = None;

    for seq in 0..count {
        match pinger.ping(PingSequence(seq as u16), &PAYLOAD).await {
            Ok((_, rtt)) => {
                lines.push(format!(
                    "Reply from {}, {} bytes in {:.2}ms",
                    addr,
                    PAYLOAD.len() + 8,
                    rtt.as_secs_f64() * 1000.0
                ));
                round_trips.push(rtt);
            }
            Err(err) => {
                let reason = match err {
                    SurgeError::Timeout { .. } => "Request timed out".to_string(),
                    other => other.to_string(),
                };
                lines.push(reason.clone());
                first_failure.get_or_insert(reason);
            }
        }
    }

    let average = if round_trips.is_empty() {
        Duration::ZERO
    } else {
        round_trips.iter().sum::<Duration>() / round_trips.len() as u32
    };

    debug!(
        %addr,
        sent = count,
        received = round_trips.len(),
        avg_ms = average.as_millis() as u64,
        "Ping probe finished"
    );

    let preview = lines.join("\n");
    Ok(match first_failure {
        None => Outcome::up(average, preview),
        Some(reason) => Outcome::down(reason, average, preview),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_timeout_splits_budget() {
        assert_eq!(packet_timeout(Duration::from_secs(4), 4), Duration::from_secs(1));
        assert_eq!(packet_timeout(Duration::from_secs(3), 0), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let addr = resolve("127.0.0.1", Instant::now() + Duration::from_secs(1)).await;
        assert_eq!(addr, Some("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_a_timeout() {
        let outcome = probe("monitstatus.invalid", 4, Duration::ZERO).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.cause(), causes::TIMEOUT);
    }
}
