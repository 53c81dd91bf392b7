//! Shared HTTP client construction for the remote service adapters

use std::time::Duration;

use crate::{Error, Result};

/// Time allowed to establish a connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest silence on an open response before the read fails
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a client whose connects and reads cannot hang indefinitely
///
/// No total timeout is set, so long synthesis streams are not cut off
/// while they keep delivering bytes.
///
/// # Errors
///
/// Returns error if the TLS backend cannot be initialized
pub fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(Error::Http)
}
