//! Payload compression for raw history.
//!
//! Payloads above a size threshold are gzipped and base64-encoded behind a
//! `COMPRESSED:gzip:` prefix. Anything without the prefix is stored and
//! returned verbatim.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use thiserror::Error;

/// Marker for compressed payloads.
pub const COMPRESSED_PREFIX: &str = "COMPRESSED:";

/// Algorithm tag written after [`COMPRESSED_PREFIX`].
pub const GZIP_ALGORITHM: &str = "gzip";

/// Payloads at or below this size are stored uncompressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Errors from compressing or restoring a payload.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("gzip stream failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decompressed payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("unsupported compression algorithm '{0}'")]
    Unsupported(String),
}

/// Compression settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub threshold_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

/// Compression counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub enabled: bool,
    pub threshold_bytes: usize,
    pub payloads_compressed: u64,
    pub payloads_skipped: u64,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub bytes_saved: u64,
    /// Compressed size over original size for compressed payloads; 1.0 when none.
    pub compression_ratio: f64,
}

/// Gzip + base64 payload codec with running statistics.
#[derive(Debug)]
pub struct PayloadCompressor {
    enabled: AtomicBool,
    threshold_bytes: usize,
    compressed: AtomicU64,
    skipped: AtomicU64,
    original_bytes: AtomicU64,
    compressed_bytes: AtomicU64,
}

impl PayloadCompressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            threshold_bytes: config.threshold_bytes,
            compressed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            original_bytes: AtomicU64::new(0),
            compressed_bytes: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "Raw payload compression toggled");
    }

    /// Compress a payload if enabled, above threshold, and worthwhile.
    pub fn compress(&self, payload: &str) -> Result<String, CompressionError> {
        if !self.is_enabled() || payload.len() <= self.threshold_bytes {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(payload.to_string());
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload.as_bytes())?;
        let gzipped = encoder.finish()?;
        let encoded = format!(
            "{}{}:{}",
            COMPRESSED_PREFIX,
            GZIP_ALGORITHM,
            base64::engine::general_purpose::STANDARD.encode(gzipped)
        );

        if encoded.len() >= payload.len() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                original = payload.len(),
                encoded = encoded.len(),
                "Compression would not save space, storing raw"
            );
            return Ok(payload.to_string());
        }

        self.compressed.fetch_add(1, Ordering::Relaxed);
        self.original_bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        self.compressed_bytes
            .fetch_add(encoded.len() as u64, Ordering::Relaxed);
        tracing::trace!(
            original = payload.len(),
            compressed = encoded.len(),
            "Payload compressed"
        );
        Ok(encoded)
    }

    /// Restore a payload written by [`PayloadCompressor::compress`].
    pub fn decompress(&self, data: &str) -> Result<String, CompressionError> {
        decompress(data)
    }

    pub fn stats(&self) -> CompressionStats {
        let original = self.original_bytes.load(Ordering::Relaxed);
        let compressed = self.compressed_bytes.load(Ordering::Relaxed);
        CompressionStats {
            enabled: self.is_enabled(),
            threshold_bytes: self.threshold_bytes,
            payloads_compressed: self.compressed.load(Ordering::Relaxed),
            payloads_skipped: self.skipped.load(Ordering::Relaxed),
            original_bytes: original,
            compressed_bytes: compressed,
            bytes_saved: original.saturating_sub(compressed),
            compression_ratio: if original == 0 {
                1.0
            } else {
                compressed as f64 / original as f64
            },
        }
    }

    pub fn reset_stats(&self) {
        self.compressed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.original_bytes.store(0, Ordering::Relaxed);
        self.compressed_bytes.store(0, Ordering::Relaxed);
    }
}

impl Default for PayloadCompressor {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

/// Whether a stored payload carries the compression prefix.
pub fn is_compressed(data: &str) -> bool {
    data.starts_with(COMPRESSED_PREFIX)
}

/// Restore a stored payload. Unprefixed data is returned unchanged.
pub fn decompress(data: &str) -> Result<String, CompressionError> {
    let Some(rest) = data.strip_prefix(COMPRESSED_PREFIX) else {
        return Ok(data.to_string());
    };
    let (algorithm, body) = rest
        .split_once(':')
        .ok_or_else(|| CompressionError::Unsupported(rest.chars().take(16).collect()))?;
    if algorithm != GZIP_ALGORITHM {
        return Err(CompressionError::Unsupported(algorithm.to_string()));
    }

    let gzipped = base64::engine::general_purpose::STANDARD.decode(body)?;
    let mut decoder = GzDecoder::new(gzipped.as_slice());
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}
