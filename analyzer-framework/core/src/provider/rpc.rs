use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};
use tracing::debug;

use crate::provider::{
    ConditionByCapability, InitConfig, ProviderKind,
    client::{DependencyMap, EvaluationResponse, ProviderClient, ProviderClientError},
};

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ResponseError>,
}

#[derive(Deserialize)]
struct ResponseError {
    message: String,
}

struct Channel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Network client for a containerized provider.
///
/// Speaks newline-delimited JSON envelopes over the provider's TCP port.
pub struct RpcProviderClient {
    kind: ProviderKind,
    address: String,
    next_id: AtomicU64,
    channel: Mutex<Option<Channel>>,
}

impl RpcProviderClient {
    /// Connect to a provider listening on the given local port.
    pub async fn connect(kind: ProviderKind, port: u16) -> Result<Self, ProviderClientError> {
        let address = format!("127.0.0.1:{port}");
        let stream =
            TcpStream::connect(&address)
                .await
                .map_err(|source| ProviderClientError::Connect {
                    kind,
                    address: address.clone(),
                    source,
                })?;
        let (read_half, write_half) = stream.into_split();
        debug!(provider = %kind, address = %address, "provider RPC channel established");
        Ok(Self {
            kind,
            address,
            next_id: AtomicU64::new(1),
            channel: Mutex::new(Some(Channel {
                reader: BufReader::new(read_half),
                writer: write_half,
            })),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ProviderClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_vec(&Request { id, method, params }).map_err(|source| {
            ProviderClientError::Codec {
                kind: self.kind,
                source,
            }
        })?;
        payload.push(b'\n');

        let mut guard = self.channel.lock().await;
        let channel = guard
            .as_mut()
            .ok_or(ProviderClientError::Closed { kind: self.kind })?;

        channel.writer.write_all(&payload).await.map_err(|source| {
            ProviderClientError::Transport {
                kind: self.kind,
                source,
            }
        })?;

        loop {
            let mut line = String::new();
            let read = channel.reader.read_line(&mut line).await.map_err(|source| {
                ProviderClientError::Transport {
                    kind: self.kind,
                    source,
                }
            })?;
            if read == 0 {
                *guard = None;
                return Err(ProviderClientError::Closed { kind: self.kind });
            }
            if line.trim().is_empty() {
                continue;
            }
            let response: Response =
                serde_json::from_str(&line).map_err(|source| ProviderClientError::Codec {
                    kind: self.kind,
                    source,
                })?;
            // Responses for superseded requests are skipped, not fatal.
            if response.id != id {
                debug!(provider = %self.kind, expected = id, got = response.id, "skipping stale response");
                continue;
            }
            if let Some(error) = response.error {
                return Err(ProviderClientError::Remote {
                    kind: self.kind,
                    method: method.to_owned(),
                    message: error.message,
                });
            }
            return Ok(response.result);
        }
    }

    fn decode<T: serde::de::DeserializeOwned + Default>(
        &self,
        value: Value,
    ) -> Result<T, ProviderClientError> {
        if value.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(value).map_err(|source| ProviderClientError::Codec {
            kind: self.kind,
            source,
        })
    }
}

#[async_trait]
impl ProviderClient for RpcProviderClient {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn init(
        &self,
        configs: Vec<InitConfig>,
    ) -> Result<Vec<InitConfig>, ProviderClientError> {
        let result = self.call("init", json!({ "configs": configs })).await?;
        self.decode(result)
    }

    async fn prepare(
        &self,
        conditions: Vec<ConditionByCapability>,
    ) -> Result<(), ProviderClientError> {
        self.call("prepare", json!({ "conditions": conditions }))
            .await?;
        Ok(())
    }

    async fn evaluate(
        &self,
        capability: &str,
        condition: Value,
    ) -> Result<EvaluationResponse, ProviderClientError> {
        let result = self
            .call(
                "evaluate",
                json!({ "capability": capability, "condition": condition }),
            )
            .await?;
        self.decode(result)
    }

    async fn get_dependencies(&self) -> Result<DependencyMap, ProviderClientError> {
        let result = self.call("dependencies", json!({})).await?;
        self.decode(result)
    }

    async fn stop(&self) {
        if let Err(err) = self.call("stop", json!({})).await {
            debug!(provider = %self.kind, error = %err, "provider stop call failed");
        }
        *self.channel.lock().await = None;
    }
}
