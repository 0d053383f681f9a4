//! Content-addressed body storage with optional gzip and capped ingestion.
//!
//! Bodies are stored under a key derived from the SHA-256 of the bytes
//! actually written, so identical payloads share a single entry regardless
//! of how many metadata records reference them. The store itself is
//! format-agnostic: whether the bytes were compressed is recorded in the
//! metadata, not here.

use std::io::{Read, Write};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use sha2::{Digest, Sha256};

use crate::body::{replay_then, Body};
use crate::error::{Error, Result};
use crate::metadata::DIGEST_LEN;
use crate::store::CacheStore;

/// Buffering granularity while draining response bodies into the store.
pub const INGEST_CHUNK_SIZE: usize = 80 * 1024;

/// Content-addressed storage over the backing store.
#[derive(Clone)]
pub struct ContentStore {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ContentStore {
    /// Creates a content store writing under `prefix` in the backing store.
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self { store, prefix: prefix.into() }
    }

    fn key(&self, digest: &[u8; DIGEST_LEN]) -> String {
        format!("{}{}", self.prefix, hex::encode(digest))
    }

    /// Computes the SHA-256 digest of `bytes`.
    #[must_use]
    pub fn digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
        Sha256::digest(bytes).into()
    }

    /// Writes `bytes` under their digest and returns it.
    ///
    /// Identical payloads land on the same key, so concurrent writers
    /// deduplicate naturally.
    pub async fn put(&self, bytes: Bytes) -> Result<[u8; DIGEST_LEN]> {
        let digest = Self::digest(&bytes);
        self.store.set(&self.key(&digest), bytes).await?;
        Ok(digest)
    }

    /// Reads the entry for `digest`, when present.
    pub async fn get(&self, digest: &[u8; DIGEST_LEN]) -> Result<Option<Bytes>> {
        self.store.get(&self.key(digest)).await
    }

    /// Removes the entry for `digest`.
    pub async fn remove(&self, digest: &[u8; DIGEST_LEN]) -> Result<()> {
        self.store.remove(&self.key(digest)).await
    }
}

/// Outcome of draining a response body under a size cap.
#[derive(Debug)]
pub enum Ingested {
    /// The whole body, buffered and ready to store.
    Complete(Bytes),
    /// The cap was exceeded mid-read. The body replays every byte already
    /// consumed ahead of the untouched remainder, so the caller still
    /// observes the full response; nothing is stored.
    TooLarge(Body),
}

/// Drains `body`, stopping as soon as `limit` would be exceeded.
///
/// Streaming bodies are consumed chunk by chunk so the transient buffer
/// never grows past the cap; rejected reads surface the accumulated bytes
/// back to the caller in [`INGEST_CHUNK_SIZE`] pieces.
pub async fn ingest(body: Body, limit: Option<u64>) -> Result<Ingested> {
    match body {
        Body::Full(bytes) => {
            if exceeds(bytes.len() as u64, limit) {
                Ok(Ingested::TooLarge(Body::Full(bytes)))
            } else {
                Ok(Ingested::Complete(bytes))
            }
        }
        Body::Stream(mut chunks) => {
            let mut buf = BytesMut::with_capacity(INGEST_CHUNK_SIZE);
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(Error::Transport)?;
                if exceeds((buf.len() + chunk.len()) as u64, limit) {
                    let mut consumed = rechunk(buf.freeze());
                    consumed.push(chunk);
                    return Ok(Ingested::TooLarge(replay_then(
                        consumed, chunks,
                    )));
                }
                buf.extend_from_slice(&chunk);
            }
            Ok(Ingested::Complete(buf.freeze()))
        }
    }
}

fn exceeds(len: u64, limit: Option<u64>) -> bool {
    limit.is_some_and(|cap| len > cap)
}

fn rechunk(bytes: Bytes) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(bytes.len() / INGEST_CHUNK_SIZE + 1);
    let mut rest = bytes;
    while rest.len() > INGEST_CHUNK_SIZE {
        chunks.push(rest.split_to(INGEST_CHUNK_SIZE));
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// Gzip-compresses `bytes` at a latency-favoring level.
pub fn compress(bytes: &[u8]) -> Result<Bytes> {
    let mut encoder =
        GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::fast());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?.into())
}

/// Decompresses a gzip-compressed content entry.
pub fn decompress(bytes: &[u8]) -> Result<Bytes> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out.into())
}
