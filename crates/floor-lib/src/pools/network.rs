//! Network load pool
//!
//! A unit repeatedly opens a loopback TCP connection to a throwaway
//! listener, writes a 10 KB random payload, then sleeps 100 ms.

use super::{ScaleOutcome, StepRule, UnitPool, NETWORK_CAPACITY, NETWORK_DEADBAND};
use crate::models::Resource;
use rand::Rng;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const PAYLOAD_BYTES: usize = 10 * 1024;

pub const BURST_INTERVAL: Duration = Duration::from_millis(100);

const NETWORK_STEPS: StepRule = StepRule {
    deadband: NETWORK_DEADBAND,
    up: network_units_for,
    down: network_units_for,
};

/// One unit plus one more per 10 Mbps of deviation
fn network_units_for(diff_mbps: f64) -> usize {
    (diff_mbps / 10.0) as usize + 1
}

pub struct NetworkPool {
    units: UnitPool,
}

impl Default for NetworkPool {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkPool {
    pub fn new() -> Self {
        Self::with_capacity(NETWORK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            units: UnitPool::new(Resource::Network, capacity, NETWORK_STEPS),
        }
    }

    /// Move the unit count toward `target` Mbps given `current`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn scale_toward(&self, target: f64, current: f64) -> ScaleOutcome {
        self.units
            .scale_toward(target, current, |cancel| tokio::spawn(generate_traffic(cancel)))
    }

    pub fn count(&self) -> usize {
        self.units.count()
    }

    pub fn capacity(&self) -> usize {
        self.units.capacity()
    }

    pub(crate) async fn stop_all(&self, deadline: Instant) -> (usize, usize) {
        self.units.stop_all(deadline).await
    }
}

async fn generate_traffic(cancel: CancellationToken) {
    while !cancel.is_cancelled() {
        if let Err(e) = send_burst().await {
            debug!(error = %e, "Loopback burst failed");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(BURST_INTERVAL) => {}
        }
    }
}

fn random_payload() -> Vec<u8> {
    let mut payload = vec![0u8; PAYLOAD_BYTES];
    rand::thread_rng().fill(&mut payload[..]);
    payload
}

/// Push one payload through a fresh loopback connection, returning the
/// number of bytes the receiving side drained
pub(crate) async fn send_burst() -> io::Result<u64> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    burst_through(listener, addr).await
}

/// Drain one connection on `listener` while sending a payload to `target`
///
/// If sending fails the receiver is aborted and awaited, so the listener
/// is closed before this returns.
async fn burst_through(listener: TcpListener, target: SocketAddr) -> io::Result<u64> {
    let receiver = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await?;
        tokio::io::copy(&mut conn, &mut tokio::io::sink()).await
    });

    let sent = async {
        let payload = random_payload();
        let mut stream = TcpStream::connect(target).await?;
        stream.write_all(&payload).await?;
        stream.shutdown().await
    }
    .await;

    if let Err(e) = sent {
        receiver.abort();
        let _ = receiver.await;
        return Err(e);
    }

    receiver.await.map_err(io::Error::other)?
}
