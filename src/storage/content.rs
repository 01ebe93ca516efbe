//! Content store: registered compression presets and tiered body storage
//!
//! Bodies below [`INLINE_THRESHOLD`] live in the `content_store` row,
//! up to [`BUCKET_THRESHOLD`] in the bucket table, and above that in a
//! spill file named by digest. Compression above
//! [`BLOCKING_THRESHOLD`] runs on the blocking pool.

use std::io::{Read, Write};

use sha2::{Digest, Sha256};
use sqlx::Row;

use super::Storage;
use crate::error::{CrawlError, Result};

/// Bodies at or below this size are stored in the row itself
pub const INLINE_THRESHOLD: usize = 4 * 1024;
/// Bodies at or below this size go to the bucket table
pub const BUCKET_THRESHOLD: usize = 1024 * 1024;
/// Compression work above this size is moved off the async runtime
const BLOCKING_THRESHOLD: usize = 256 * 1024;

/// Opaque reference into the content store
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ContentRef(pub i64);

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered compression preset.
///
/// The name is what configuration and the database speak; the variant
/// carries the codec parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionPreset {
    None,
    Gzip(u32),
    Brotli(u32),
    Zstd(i32),
}

impl CompressionPreset {
    /// Resolve a preset by its registered name (`gzip-6`, `zstd-19`, ...)
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(Self::None),
            "gzip-1" => Ok(Self::Gzip(1)),
            "gzip-3" => Ok(Self::Gzip(3)),
            "gzip-6" => Ok(Self::Gzip(6)),
            "gzip-9" => Ok(Self::Gzip(9)),
            "zstd-3" => Ok(Self::Zstd(3)),
            "zstd-19" => Ok(Self::Zstd(19)),
            _ => {
                if let Some(level) = name.strip_prefix("brotli-") {
                    let q: u32 = level
                        .parse()
                        .map_err(|_| CrawlError::InvalidInput(format!("unknown preset {name:?}")))?;
                    if q <= 11 {
                        return Ok(Self::Brotli(q));
                    }
                }
                Err(CrawlError::InvalidInput(format!(
                    "unknown compression preset {name:?}"
                )))
            }
        }
    }

    /// The registered name of this preset
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::None => "none".to_string(),
            Self::Gzip(l) => format!("gzip-{l}"),
            Self::Brotli(q) => format!("brotli-{q}"),
            Self::Zstd(l) => format!("zstd-{l}"),
        }
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Gzip(level) => {
                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::new(*level),
                );
                encoder
                    .write_all(data)
                    .and_then(|()| encoder.finish())
                    .map_err(|e| CrawlError::Internal(format!("gzip encode: {e}")))
            }
            Self::Brotli(q) => {
                let mut out = Vec::with_capacity(data.len() / 2);
                let mut writer = brotli::CompressorWriter::new(&mut out, 4096, *q, 22);
                writer
                    .write_all(data)
                    .map_err(|e| CrawlError::Internal(format!("brotli encode: {e}")))?;
                drop(writer);
                Ok(out)
            }
            Self::Zstd(level) => zstd::bulk::compress(data, *level)
                .map_err(|e| CrawlError::Internal(format!("zstd encode: {e}"))),
        }
    }

    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Gzip(_) => {
                let mut decoder = flate2::read::GzDecoder::new(data);
                let mut out = Vec::with_capacity(uncompressed_size);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| CrawlError::ParseFailure(format!("gzip decode: {e}")))?;
                Ok(out)
            }
            Self::Brotli(_) => {
                let mut decoder = brotli::Decompressor::new(data, 4096);
                let mut out = Vec::with_capacity(uncompressed_size);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| CrawlError::ParseFailure(format!("brotli decode: {e}")))?;
                Ok(out)
            }
            Self::Zstd(_) => zstd::bulk::decompress(data, uncompressed_size.max(1))
                .map_err(|e| CrawlError::ParseFailure(format!("zstd decode: {e}"))),
        }
    }
}

/// A body read back out of the store
#[derive(Debug, Clone)]
pub struct StoredContent {
    pub content_ref: ContentRef,
    pub bytes: Vec<u8>,
    pub sha256: String,
    pub compression: CompressionPreset,
}

impl Storage {
    /// Compress and persist a body, choosing the storage tier by size.
    pub async fn put_content(&self, bytes: Vec<u8>, preset: CompressionPreset) -> Result<ContentRef> {
        let uncompressed_size = bytes.len();

        let (compressed, digest) = if uncompressed_size > BLOCKING_THRESHOLD {
            tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, String)> {
                let digest = hex_digest(&bytes);
                Ok((preset.compress(&bytes)?, digest))
            })
            .await
            .map_err(|e| CrawlError::Internal(format!("compression task: {e}")))??
        } else {
            let digest = hex_digest(&bytes);
            (preset.compress(&bytes)?, digest)
        };

        let compressed_size = compressed.len();
        let storage_type = if compressed_size <= INLINE_THRESHOLD {
            "inline"
        } else if compressed_size <= BUCKET_THRESHOLD {
            "bucket"
        } else {
            "file"
        };

        let row = sqlx::query(
            "INSERT INTO content_store
                (storage_type, compression, sha256, uncompressed_size, compressed_size, blob, file_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)
             RETURNING content_ref",
        )
        .bind(storage_type)
        .bind(preset.name())
        .bind(&digest)
        .bind(uncompressed_size as i64)
        .bind(compressed_size as i64)
        .bind(if storage_type == "inline" {
            Some(compressed.as_slice())
        } else {
            None
        })
        .fetch_one(self.pool())
        .await?;
        let content_ref = ContentRef(row.get::<i64, _>(0));

        match storage_type {
            "bucket" => {
                sqlx::query("INSERT INTO content_buckets (content_ref, blob) VALUES (?1, ?2)")
                    .bind(content_ref.0)
                    .bind(compressed.as_slice())
                    .execute(self.pool())
                    .await?;
            }
            "file" => {
                let file_path = self.content_dir().join(format!("{digest}.bin"));
                tokio::fs::write(&file_path, &compressed)
                    .await
                    .map_err(|e| CrawlError::Internal(format!("content spill write: {e}")))?;
                sqlx::query("UPDATE content_store SET file_path = ?1 WHERE content_ref = ?2")
                    .bind(file_path.to_string_lossy().into_owned())
                    .bind(content_ref.0)
                    .execute(self.pool())
                    .await?;
            }
            _ => {}
        }

        Ok(content_ref)
    }

    /// Read a body back, decompressing it
    pub async fn get_content(&self, content_ref: ContentRef) -> Result<StoredContent> {
        let row = sqlx::query(
            "SELECT storage_type, compression, sha256, uncompressed_size, blob, file_path
             FROM content_store WHERE content_ref = ?1",
        )
        .bind(content_ref.0)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| CrawlError::InvalidInput(format!("unknown content ref {content_ref}")))?;

        let storage_type: String = row.get(0);
        let preset = CompressionPreset::by_name(&row.get::<String, _>(1))?;
        let sha256: String = row.get(2);
        let uncompressed_size: i64 = row.get(3);

        let compressed: Vec<u8> = match storage_type.as_str() {
            "inline" => row.get::<Option<Vec<u8>>, _>(4).ok_or_else(|| {
                CrawlError::Internal(format!("inline content {content_ref} missing blob"))
            })?,
            "bucket" => {
                let bucket = sqlx::query("SELECT blob FROM content_buckets WHERE content_ref = ?1")
                    .bind(content_ref.0)
                    .fetch_one(self.pool())
                    .await?;
                bucket.get::<Vec<u8>, _>(0)
            }
            "file" => {
                let path: Option<String> = row.get(5);
                let path = path.ok_or_else(|| {
                    CrawlError::Internal(format!("file content {content_ref} missing path"))
                })?;
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| CrawlError::Internal(format!("content spill read: {e}")))?
            }
            other => {
                return Err(CrawlError::Internal(format!(
                    "unknown storage type {other:?}"
                )));
            }
        };

        let size = uncompressed_size as usize;
        let bytes = if compressed.len() > BLOCKING_THRESHOLD {
            tokio::task::spawn_blocking(move || preset.decompress(&compressed, size))
                .await
                .map_err(|e| CrawlError::Internal(format!("decompression task: {e}")))??
        } else {
            preset.decompress(&compressed, size)?
        };

        Ok(StoredContent {
            content_ref,
            bytes,
            sha256,
            compression: preset,
        })
    }

    /// Re-compress an existing body with a different preset; used by the
    /// background compress task. Returns the new compressed size.
    pub async fn recompress_content(
        &self,
        content_ref: ContentRef,
        preset: CompressionPreset,
    ) -> Result<usize> {
        let current = self.get_content(content_ref).await?;
        if current.compression == preset {
            let row = sqlx::query("SELECT compressed_size FROM content_store WHERE content_ref = ?1")
                .bind(content_ref.0)
                .fetch_one(self.pool())
                .await?;
            return Ok(row.get::<i64, _>(0) as usize);
        }
        let compressed = preset.compress(&current.bytes)?;
        let compressed_size = compressed.len();

        // Keep the tier decision from the original write simple: rewrite
        // whichever tier the new size lands in, clearing the others.
        let storage_type = if compressed_size <= INLINE_THRESHOLD {
            "inline"
        } else if compressed_size <= BUCKET_THRESHOLD {
            "bucket"
        } else {
            "file"
        };
        sqlx::query(
            "UPDATE content_store
             SET storage_type = ?1, compression = ?2, compressed_size = ?3, blob = ?4
             WHERE content_ref = ?5",
        )
        .bind(storage_type)
        .bind(preset.name())
        .bind(compressed_size as i64)
        .bind(if storage_type == "inline" {
            Some(compressed.as_slice())
        } else {
            None
        })
        .bind(content_ref.0)
        .execute(self.pool())
        .await?;
        sqlx::query("DELETE FROM content_buckets WHERE content_ref = ?1")
            .bind(content_ref.0)
            .execute(self.pool())
            .await?;
        match storage_type {
            "bucket" => {
                sqlx::query("INSERT INTO content_buckets (content_ref, blob) VALUES (?1, ?2)")
                    .bind(content_ref.0)
                    .bind(compressed.as_slice())
                    .execute(self.pool())
                    .await?;
            }
            "file" => {
                let file_path = self.content_dir().join(format!("{}.bin", current.sha256));
                tokio::fs::write(&file_path, &compressed)
                    .await
                    .map_err(|e| CrawlError::Internal(format!("content spill write: {e}")))?;
                sqlx::query("UPDATE content_store SET file_path = ?1 WHERE content_ref = ?2")
                    .bind(file_path.to_string_lossy().into_owned())
                    .bind(content_ref.0)
                    .execute(self.pool())
                    .await?;
            }
            _ => {}
        }
        Ok(compressed_size)
    }

    /// All content refs, oldest first; used by background tasks
    pub async fn list_content_refs(&self) -> Result<Vec<ContentRef>> {
        let rows = sqlx::query("SELECT content_ref FROM content_store ORDER BY content_ref")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(|r| ContentRef(r.get::<i64, _>(0))).collect())
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{b:02x}");
    }
    out
}
