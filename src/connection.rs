//! Remote store connection lifecycle.
//!
//! `Disconnected -> Connecting -> Connected`, and back to `Connecting` when an upload fails.
//! Startup tolerates several credential regenerations ([`connect_with_retry`]); a mid-run
//! refresh gets exactly one ([`reconnect`]).

use std::fmt;

use tracing::{trace, warn};

use crate::contract::{Connector, Session};
use crate::error::{PipelineError, StoreError};

/// Device credential (long-lived) plus the current session credential.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub device: String,
    pub session: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("device", &redact(&self.device))
            .field("session", &redact(&self.session))
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

fn transition(from: ConnectionState, to: ConnectionState) -> ConnectionState {
    trace!(?from, ?to, "connection state");
    to
}

async fn refresh_once(
    connector: &dyn Connector,
    credentials: &mut Credentials,
) -> Result<Box<dyn Session>, StoreError> {
    credentials.session = connector.issue_session_credential(&credentials.device).await?;
    trace!("new session credential issued");
    connector
        .connect(&credentials.device, &credentials.session)
        .await
}

/// Startup connect: one try with the known credentials, then up to `attempts` rounds of
/// "issue a fresh session credential, connect again". Exhausting them is fatal.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    credentials: &mut Credentials,
    attempts: u32,
) -> Result<Box<dyn Session>, PipelineError> {
    let mut state = transition(ConnectionState::Disconnected, ConnectionState::Connecting);

    let mut last_err = match connector
        .connect(&credentials.device, &credentials.session)
        .await
    {
        Ok(session) => {
            transition(state, ConnectionState::Connected);
            return Ok(session);
        }
        Err(e) => {
            trace!(error = %e, "first connection attempt failed");
            e
        }
    };

    for attempt in 1..=attempts {
        trace!(attempt, limit = attempts, "requesting a new session credential");
        match refresh_once(connector, credentials).await {
            Ok(session) => {
                state = transition(state, ConnectionState::Connected);
                trace!(attempt, ?state, "connected to remote store");
                return Ok(session);
            }
            Err(e) => {
                warn!(attempt, limit = attempts, error = %e, "connection attempt failed");
                last_err = e;
            }
        }
    }

    transition(state, ConnectionState::Disconnected);
    Err(PipelineError::Connect {
        attempts: attempts + 1,
        source: last_err,
    })
}

/// Mid-run refresh after a failed upload: a single issue-and-connect attempt.
pub async fn reconnect(
    connector: &dyn Connector,
    credentials: &mut Credentials,
) -> Result<Box<dyn Session>, StoreError> {
    let state = transition(ConnectionState::Connected, ConnectionState::Connecting);
    match refresh_once(connector, credentials).await {
        Ok(session) => {
            transition(state, ConnectionState::Connected);
            Ok(session)
        }
        Err(e) => {
            transition(state, ConnectionState::Disconnected);
            Err(e)
        }
    }
}
