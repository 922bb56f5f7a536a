use {anyhow::Result, async_trait::async_trait, serde_json::Value, tracing::info};

use crate::session::Session;

/// Outbound side of the messaging client.
///
/// The session is passed as sender context so the transport can address the
/// recipient and read per-session preferences.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a chat message to the session's address.
    async fn send(&self, session: &Session, message: &str) -> Result<()>;

    /// Out-of-band request on behalf of the session; resolves with the
    /// response payload.
    async fn rpc(&self, session: &Session, call: Value) -> Result<Value>;
}

/// Transport used when the agent has no messaging client attached (admin
/// tooling). Messages are logged; RPC calls are refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, session: &Session, message: &str) -> Result<()> {
        info!(address = %session.address(), message, "reply");
        Ok(())
    }

    async fn rpc(&self, session: &Session, call: Value) -> Result<Value> {
        anyhow::bail!(
            "no transport attached, cannot send rpc {call} for {}",
            session.address()
        )
    }
}
