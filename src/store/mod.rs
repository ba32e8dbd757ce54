//! Filesystem capture store.
//!
//! One directory per proxied request, `{root}/{YYYY-MM-DD}/{request_id}/`,
//! holding the artifacts the analyzer consumes. The request directory is
//! created with a non-recursive exclusive create — a collision means two
//! requests minted the same id, which must fail loudly rather than let their
//! artifacts interleave. Every file write goes through a `.tmp` + rename so
//! readers never see a partial artifact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::fs;

use crate::models::capture::{CaptureMeta, ResponseMeta};

pub const REQUEST_HEADERS_FILE: &str = "request.headers.json";
pub const REQUEST_BODY_FILE: &str = "request.body.json";
pub const REQUEST_NORMALIZED_FILE: &str = "request.body.normalized.json";
pub const CAPTURE_META_FILE: &str = "capture.meta.json";
pub const RESPONSE_META_FILE: &str = "response.meta.json";
pub const RESPONSE_BODY_FILE: &str = "response.body.json";
pub const RESPONSE_SSE_FILE: &str = "response.sse.txt";

/// Handle to the store root. Cheap to clone; the streaming path moves a clone
/// into its persistence task.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    root: PathBuf,
}

/// An allocated capture directory. The id doubles as the directory name and
/// sorts lexicographically by creation time.
#[derive(Debug, Clone)]
pub struct CapturePaths {
    pub request_id: String,
    pub dir: PathBuf,
}

impl CapturePaths {
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl CaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mint a request id and allocate its directory.
    pub async fn create_capture(&self) -> anyhow::Result<CapturePaths> {
        let now = Utc::now();
        self.allocate(&now.format("%Y-%m-%d").to_string(), &request_id_at(now))
            .await
    }

    async fn allocate(&self, day: &str, request_id: &str) -> anyhow::Result<CapturePaths> {
        let day_dir = self.root.join(day);
        fs::create_dir_all(&day_dir)
            .await
            .with_context(|| format!("create day dir {}", day_dir.display()))?;

        let dir = day_dir.join(request_id);
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                anyhow::bail!("capture dir already exists: {}", dir.display());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create capture dir {}", dir.display()));
            }
        }

        Ok(CapturePaths {
            request_id: request_id.to_string(),
            dir,
        })
    }

    pub async fn save_request_headers(
        &self,
        paths: &CapturePaths,
        headers: &Value,
    ) -> anyhow::Result<()> {
        self.write_json(paths, REQUEST_HEADERS_FILE, headers).await
    }

    /// Persists the body exactly as received, byte for byte.
    pub async fn save_request_body(&self, paths: &CapturePaths, raw: &[u8]) -> anyhow::Result<()> {
        self.write_atomic(paths, REQUEST_BODY_FILE, raw).await
    }

    pub async fn save_request_normalized(
        &self,
        paths: &CapturePaths,
        normalized: &Value,
    ) -> anyhow::Result<()> {
        self.write_json(paths, REQUEST_NORMALIZED_FILE, normalized)
            .await
    }

    pub async fn save_capture_meta(
        &self,
        paths: &CapturePaths,
        meta: &CaptureMeta,
    ) -> anyhow::Result<()> {
        self.write_json(paths, CAPTURE_META_FILE, meta).await
    }

    pub async fn save_response_meta(
        &self,
        paths: &CapturePaths,
        meta: &ResponseMeta,
    ) -> anyhow::Result<()> {
        self.write_json(paths, RESPONSE_META_FILE, meta).await
    }

    pub async fn save_response_body(
        &self,
        paths: &CapturePaths,
        body: &Value,
    ) -> anyhow::Result<()> {
        self.write_json(paths, RESPONSE_BODY_FILE, body).await
    }

    pub async fn save_response_sse(&self, paths: &CapturePaths, text: &str) -> anyhow::Result<()> {
        self.write_atomic(paths, RESPONSE_SSE_FILE, text.as_bytes())
            .await
    }

    async fn write_json<T: Serialize>(
        &self,
        paths: &CapturePaths,
        name: &str,
        value: &T,
    ) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serialize {name}"))?;
        self.write_atomic(paths, name, &bytes).await
    }

    async fn write_atomic(
        &self,
        paths: &CapturePaths,
        name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<()> {
        let tmp = paths.artifact(&format!("{name}.tmp"));
        let target = paths.artifact(name);
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("rename {} into place", target.display()))?;
        Ok(())
    }
}

/// `YYYYMMDDTHHMMSSZ_{hex8}`: second-precision UTC stamp plus a random
/// suffix, so concurrent requests within the same second stay distinct.
fn request_id_at(now: DateTime<Utc>) -> String {
    format!(
        "{}_{:08x}",
        now.format("%Y%m%dT%H%M%SZ"),
        rand::random::<u32>()
    )
}
