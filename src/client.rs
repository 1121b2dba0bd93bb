//! Blocking line-protocol client for a running depot server.
//!
//! Used by `depot fetch`; one connection, one or more calls, each call a
//! single request/response line pair.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::dispatch::{RpcRequest, RpcResponse};

const IO_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DepotClient {
    stream: TcpStream,
}

impl DepotClient {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("cannot connect to depot server at {addr}"))?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        Ok(Self { stream })
    }

    /// Invoke one RPC by name; returns the response payload text, or the
    /// server's error code and message as the failure.
    pub fn call(&mut self, rpc: &str, payload: &str) -> Result<String> {
        let request = RpcRequest {
            rpc: rpc.to_string(),
            payload: payload.to_string(),
            user_id: None,
        };
        writeln!(self.stream, "{}", serde_json::to_string(&request)?)?;
        self.stream.flush()?;

        let mut reader = BufReader::new(self.stream.try_clone()?);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.trim().is_empty() {
            bail!("server closed the connection without a response");
        }

        let response: RpcResponse =
            serde_json::from_str(line.trim()).context("malformed response envelope")?;
        if response.ok {
            Ok(response.payload.unwrap_or_default())
        } else {
            bail!(
                "rpc {rpc} failed (code {}): {}",
                response.code.unwrap_or_default(),
                response.message.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
