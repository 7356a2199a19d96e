//! CIDR enumeration and bounded-concurrency TCP liveness probing
//! (section 4.7 step 2, section 10.5).

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use pb_shared_types::DiscoveryError;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Expands every configured CIDR into its constituent host addresses.
pub fn enumerate_hosts(cidrs: &[String]) -> Result<Vec<IpAddr>, DiscoveryError> {
    let mut hosts = Vec::new();
    for raw in cidrs {
        let net = IpNet::from_str(raw)
            .map_err(|e| DiscoveryError::Store(pb_shared_types::StoreError::Decode(e.to_string())))?;
        hosts.extend(net.hosts());
    }
    Ok(hosts)
}

/// Probes every candidate host's `port` concurrently, bounded by a
/// semaphore sized to `concurrency`, and returns the subset that accepted
/// a TCP connection within `timeout`.
pub async fn scan_responsive(
    hosts: Vec<IpAddr>,
    port: u16,
    concurrency: usize,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Vec<IpAddr> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut joins = tokio::task::JoinSet::new();

    for ip in hosts {
        if cancel.is_cancelled() {
            break;
        }
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        joins.spawn(async move {
            let _permit = semaphore.acquire().await.ok()?;
            if cancel.is_cancelled() {
                return None;
            }
            match tokio::time::timeout(timeout, TcpStream::connect((ip, port))).await {
                Ok(Ok(_)) => Some(ip),
                Ok(Err(e)) => {
                    debug!(%ip, error = %e, "tcp probe refused");
                    None
                }
                Err(_) => {
                    debug!(%ip, "tcp probe timed out");
                    None
                }
            }
        });
    }

    let mut responsive = Vec::new();
    while let Some(result) = joins.join_next().await {
        if let Ok(Some(ip)) = result {
            responsive.push(ip);
        }
    }
    responsive
}
