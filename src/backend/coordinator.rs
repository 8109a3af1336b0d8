//! Bounded coordinator handshake
//!
//! The bootstrap is synchronous, so the check drives its own current-thread
//! `tokio` runtime. Callers already inside a runtime get the handshake on a
//! scoped helper thread, since a runtime cannot block on another in place.

use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Open (and drop) a TCP connection to `address`, giving up after `timeout`
///
/// Safe to call from plain threads and from within a `tokio` runtime.
///
/// # Errors
/// Returns [`Error::BootstrapConnectivity`] if the address does not resolve,
/// refuses the connection, or does not answer within `timeout`.
pub fn connect(address: &str, timeout: Duration) -> Result<SocketAddr> {
    if tokio::runtime::Handle::try_current().is_err() {
        return handshake(address, timeout);
    }

    std::thread::scope(|scope| {
        scope
            .spawn(|| handshake(address, timeout))
            .join()
            .unwrap_or_else(|_| {
                Err(Error::BootstrapConnectivity {
                    address: address.to_string(),
                    reason: "handshake thread panicked".to_string(),
                })
            })
    })
}

fn handshake(address: &str, timeout: Duration) -> Result<SocketAddr> {
    let unreachable = |reason: String| Error::BootstrapConnectivity {
        address: address.to_string(),
        reason,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;

    runtime.block_on(async {
        match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream.peer_addr().map_err(|e| unreachable(e.to_string())),
            Ok(Err(e)) => Err(unreachable(e.to_string())),
            Err(_) => Err(unreachable(format!("no answer within {timeout:?}"))),
        }
    })
}
