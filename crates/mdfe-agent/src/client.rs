//! # Agent Client
//!
//! The agent listens on a TCP endpoint and speaks one command in, one
//! text block out. Replies are terminated by an ETX byte (0x03).
//!
//! The protocol is not safely concurrent on a single channel, so the
//! default mode holds one connection behind a mutex and serializes calls.
//! When the agent supports parallel sessions, `serialize_calls = false`
//! opens an independent connection per call instead.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::AgentError;

/// End-of-reply marker.
const ETX: u8 = 0x03;

/// Abstraction over the external transmission agent. Implementations
/// must be `Send + Sync` so they can be shared across async tasks behind
/// an `Arc`; the trait is object-safe to support swapping the live TCP
/// client for a scripted one in tests.
#[async_trait]
pub trait TransmissionAgent: Send + Sync {
    /// Send one command and return the raw reply text.
    async fn execute(&self, command: &str) -> Result<String, AgentError>;

    /// Connectivity check: whether the agent endpoint currently accepts
    /// connections.
    async fn probe(&self) -> bool;
}

/// Configuration for the TCP agent client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentClientConfig {
    /// Agent endpoint, `host:port`.
    pub endpoint: String,
    /// Per-call deadline in milliseconds.
    pub timeout_ms: u64,
    /// Serialize calls over one shared connection (the safe default), or
    /// open an independent connection per call.
    pub serialize_calls: bool,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:3434".to_string(),
            timeout_ms: 30_000,
            serialize_calls: true,
        }
    }
}

/// Concrete TCP client for the transmission agent.
pub struct TcpAgentClient {
    config: AgentClientConfig,
    /// Shared connection for serialized mode. Dropped on any error so the
    /// next call reconnects from a clean state.
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl TcpAgentClient {
    /// Create a client from configuration. No connection is opened until
    /// the first call.
    pub fn new(config: AgentClientConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn connect(&self) -> Result<BufStream<TcpStream>, AgentError> {
        let stream = TcpStream::connect(&self.config.endpoint)
            .await
            .map_err(|e| AgentError::Unreachable {
                reason: format!("connect {}: {e}", self.config.endpoint),
            })?;
        Ok(BufStream::new(stream))
    }

    /// One command/reply exchange on an open connection.
    async fn exchange(
        stream: &mut BufStream<TcpStream>,
        command: &str,
    ) -> Result<String, AgentError> {
        let io_err = |e: std::io::Error| AgentError::Unreachable {
            reason: format!("exchange: {e}"),
        };
        stream.write_all(command.as_bytes()).await.map_err(io_err)?;
        stream.write_all(b"\r\n").await.map_err(io_err)?;
        stream.flush().await.map_err(io_err)?;

        let mut buf = Vec::new();
        let n = stream.read_until(ETX, &mut buf).await.map_err(io_err)?;
        if n == 0 {
            return Err(AgentError::Unreachable {
                reason: "connection closed before reply".to_string(),
            });
        }
        if buf.last() == Some(&ETX) {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn execute_serialized(&self, command: &str) -> Result<String, AgentError> {
        let mut guard = self.conn.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };
        let result = Self::exchange(&mut stream, command).await;
        if result.is_ok() {
            *guard = Some(stream);
        }
        result
    }

    async fn execute_concurrent(&self, command: &str) -> Result<String, AgentError> {
        let mut stream = self.connect().await?;
        Self::exchange(&mut stream, command).await
    }
}

#[async_trait]
impl TransmissionAgent for TcpAgentClient {
    async fn execute(&self, command: &str) -> Result<String, AgentError> {
        let deadline = self.deadline();
        let call = async {
            if self.config.serialize_calls {
                self.execute_serialized(command).await
            } else {
                self.execute_concurrent(command).await
            }
        };
        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                // The agent may still complete the command; discard the
                // connection so a late reply cannot be read as the answer
                // to the next command.
                if self.config.serialize_calls {
                    if let Ok(mut guard) = self.conn.try_lock() {
                        *guard = None;
                    }
                }
                tracing::warn!(
                    endpoint = %self.config.endpoint,
                    timeout_ms = self.config.timeout_ms,
                    "agent call timed out"
                );
                Err(AgentError::Timeout {
                    elapsed_ms: self.config.timeout_ms,
                })
            }
        }
    }

    async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(self.deadline(), TcpStream::connect(&self.config.endpoint)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Accepts one connection and answers every line with `reply` + ETX.
    async fn spawn_echo_agent(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                let mut out = reply.as_bytes().to_vec();
                out.push(ETX);
                if socket.write_all(&out).await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    fn client_for(endpoint: String, timeout_ms: u64) -> TcpAgentClient {
        TcpAgentClient::new(AgentClientConfig {
            endpoint,
            timeout_ms,
            serialize_calls: true,
        })
    }

    #[tokio::test]
    async fn execute_returns_reply_text() {
        let addr = spawn_echo_agent("cStat=100\nxMotivo=Autorizado\n").await;
        let client = client_for(addr, 2_000);
        let reply = client.execute("MDFE.StatusServico()").await.expect("reply");
        assert!(reply.contains("cStat=100"));
        assert!(!reply.contains('\u{3}'));
    }

    #[tokio::test]
    async fn serialized_client_reuses_connection() {
        let addr = spawn_echo_agent("cStat=100\n").await;
        let client = client_for(addr, 2_000);
        // The echo agent accepts exactly one connection; both calls must
        // travel over it.
        client.execute("first").await.expect("first");
        client.execute("second").await.expect("second");
    }

    #[tokio::test]
    async fn silent_agent_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.expect("accept");
            // Hold the connection open without replying.
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let client = client_for(addr, 100);
        let result = client.execute("MDFE.StatusServico()").await;
        assert!(matches!(result, Err(AgentError::Timeout { .. })));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let client = client_for("127.0.0.1:1".to_string(), 2_000);
        let result = client.execute("MDFE.StatusServico()").await;
        assert!(matches!(result, Err(AgentError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn probe_reflects_reachability() {
        let addr = spawn_echo_agent("cStat=107\n").await;
        let up = client_for(addr, 2_000);
        assert!(up.probe().await);

        let down = client_for("127.0.0.1:1".to_string(), 500);
        assert!(!down.probe().await);
    }
}
