//! Caller side of the servo RPC channel.
//!
//! A client performs the initialize handshake when it connects and then
//! issues `execute_servo_commands` calls on that session. Replies may come
//! back as plain JSON or as a server-sent event stream.

use std::error::Error as _;
use std::io;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::constants::{RPC_PATH, SESSION_HEADER, TOOL_NAME};
use crate::error::ClientError;
use crate::rpc::protocol::*;
use crate::types::{Command, CommandResult};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    /// Covers a whole call; a batch takes at least the sum of its holds.
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
        }
    }
}

pub struct RpcClient {
    http: reqwest::Client,
    addr: String,
    url: String,
    session: Option<String>,
    next_id: u64,
    server_info: Value,
}

impl RpcClient {
    /// Opens a session on `host:port`. Fails unless the handshake completes.
    pub async fn connect(
        host: &str,
        port: u16,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let addr = format!("{}:{}", host, port);
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        let mut client = RpcClient {
            http,
            url: format!("http://{}{}", addr, RPC_PATH),
            addr,
            session: None,
            next_id: 1,
            server_info: Value::Null,
        };
        client.initialize().await?;
        Ok(client)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    async fn initialize(&mut self) -> Result<(), ClientError> {
        tracing::debug!("Initializing session with {}", self.url);
        let result = self.call(METHOD_INITIALIZE, initialize_params()).await?;
        if self.session.is_none() {
            tracing::debug!("Server did not assign a session id");
        }
        self.server_info = result.get("serverInfo").cloned().unwrap_or(Value::Null);

        let response = self.post(&RpcRequest::notification(METHOD_INITIALIZED)).await?;
        self.check_status(response).await?;
        tracing::info!("Session established with {}", self.addr);
        Ok(())
    }

    pub async fn list_tools(&mut self) -> Result<Vec<Value>, ClientError> {
        let result = self.call(METHOD_TOOLS_LIST, json!({})).await?;
        result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| ClientError::Protocol("tools/list result has no tools".into()))
    }

    pub async fn execute_servo_commands(
        &mut self,
        commands: &[Command],
    ) -> Result<Vec<CommandResult>, ClientError> {
        let params = json!({
            "name": TOOL_NAME,
            "arguments": { "commands": commands },
        });
        let result = self.call(METHOD_TOOLS_CALL, params).await?;
        let results = parse_tool_result(&result).map_err(ClientError::Protocol)?;

        if results.len() != commands.len() {
            return Err(ClientError::Protocol(format!(
                "sent {} command(s) but received {} result(s)",
                commands.len(),
                results.len()
            )));
        }
        Ok(results)
    }

    /// Ends the session on the server. Errors are logged, not returned.
    pub async fn close(self) {
        let Some(session) = &self.session else {
            return;
        };
        let request = self.http.delete(&self.url).header(SESSION_HEADER, session);
        match request.send().await {
            Ok(response) => tracing::debug!("Session closed ({})", response.status()),
            Err(e) => tracing::debug!("Failed to close session: {}", e),
        }
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let response = self.post(&RpcRequest::new(id, method, params)).await?;
        if self.session.is_none() {
            self.session = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
        }
        let response = self.check_status(response).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let reply = if is_stream {
            self.read_event_stream(response, id).await?
        } else {
            response
                .json::<RpcResponse>()
                .await
                .map_err(|e| self.transport_error(e))?
        };

        if reply.id != Value::from(id) {
            return Err(ClientError::Protocol(format!(
                "reply id {} does not match request {}",
                reply.id, id
            )));
        }
        if let Some(error) = reply.error {
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        reply
            .result
            .ok_or_else(|| ClientError::Protocol("reply has neither result nor error".into()))
    }

    async fn post(&self, message: &RpcRequest) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session) = &self.session {
            request = request.header(SESSION_HEADER, session);
        }
        request.send().await.map_err(|e| self.transport_error(e))
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Http {
            status: status.as_u16(),
            url: self.url.clone(),
            body,
        })
    }

    async fn read_event_stream(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<RpcResponse, ClientError> {
        let mut events = EventBuffer::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(e))?;
            for data in events.push(&chunk)? {
                match serde_json::from_str::<RpcResponse>(&data) {
                    Ok(reply) if reply.id == Value::from(id) => return Ok(reply),
                    // requests and notifications from the server are not handled
                    _ => tracing::debug!("Skipping event: {}", data),
                }
            }
        }
        Err(ClientError::Broken {
            url: self.url.clone(),
            reason: "event stream ended before the reply arrived".into(),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            return ClientError::Timeout(self.url.clone());
        }
        if err.is_decode() {
            return ClientError::Protocol(err.to_string());
        }

        let mut chain = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                match io_err.kind() {
                    io::ErrorKind::ConnectionRefused => {
                        return ClientError::ConnectionRefused(self.addr.clone())
                    }
                    io::ErrorKind::TimedOut => return ClientError::Timeout(self.url.clone()),
                    _ => {}
                }
            }
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }

        let lowered = chain.to_lowercase();
        let lookup_failed =
            lowered.contains("dns error") || lowered.contains("failed to lookup address");
        if err.is_connect() && lookup_failed {
            return ClientError::Resolve(self.addr.clone());
        }
        if lowered.contains("connection refused") {
            return ClientError::ConnectionRefused(self.addr.clone());
        }
        ClientError::Broken {
            url: self.url.clone(),
            reason: chain,
        }
    }
}

/// Opens a session, runs one batch and closes the session again.
pub async fn send_batch(
    host: &str,
    port: u16,
    commands: &[Command],
    options: ClientOptions,
) -> Result<Vec<CommandResult>, ClientError> {
    let mut client = RpcClient::connect(host, port, options).await?;
    let results = client.execute_servo_commands(commands).await;
    client.close().await;
    results
}

/// Splits a server-sent event stream into the `data` payload of each event.
///
/// Bytes are buffered until a full line arrives, so a chunk boundary inside
/// a multi-byte character or between `\r` and `\n` is harmless.
#[derive(Debug, Default)]
struct EventBuffer {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl EventBuffer {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ClientError> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() {
                if !self.data.is_empty() {
                    payloads.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }

            let line = String::from_utf8(line)
                .map_err(|e| ClientError::Protocol(format!("event stream is not UTF-8: {}", e)))?;
            if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
        Ok(payloads)
    }
}
