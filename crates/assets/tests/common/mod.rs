//! Shared fixtures for asset cache integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use replaydeck_assets::{
    CacheConfig, Error, Protocol, RemoteConfig, RemoteHost, RemotePath, Result, Transport,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

/// Transport serving files from memory, with fault injection.
#[derive(Default)]
pub struct StubTransport {
    files: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    fault_after: Mutex<Option<usize>>,
    failure: Mutex<Option<Error>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, remote_path: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(remote_path.to_string(), bytes);
        self
    }

    /// Sleep this long before copying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every copy until the gate is opened.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// The next copy writes `bytes` bytes and then drops the connection.
    pub fn fault_next_after(&self, bytes: usize) {
        *self.fault_after.lock().unwrap() = Some(bytes);
    }

    /// Fail every copy with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<Error>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn copy_to_local(
        &self,
        host: &RemoteHost,
        remote_path: &RemotePath,
        dest: &Path,
        _timeout: Duration,
    ) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        let body = self
            .files
            .get(remote_path.as_str())
            .ok_or_else(|| Error::remote_not_found(&host.host, remote_path.as_str()))?;
        let fault = self.fault_after.lock().unwrap().take();

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(dest)
            .await
            .map_err(|e| Error::cache_io(e, dest, "open"))?;

        if let Some(limit) = fault {
            let limit = limit.min(body.len());
            file.write_all(&body[..limit]).await.unwrap();
            file.flush().await.unwrap();
            return Err(Error::transport("connection reset by peer"));
        }

        file.write_all(body).await.unwrap();
        file.flush().await.unwrap();
        Ok(body.len() as u64)
    }
}

/// Cache configuration rooted at `dir`.
pub fn config(dir: &Path) -> CacheConfig {
    CacheConfig::new(RemoteConfig::new(Protocol::Https, "media.example.com")).with_cache_dir(dir)
}

/// Deterministic, non-repeating-looking payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Names of temporary files the cache left in `dir`.
pub fn temp_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(std::result::Result::ok)
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(".replaydeck-"))
        .collect()
}
