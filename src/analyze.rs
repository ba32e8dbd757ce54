//! Offline analysis of the capture store.
//!
//! Reads only closed capture directories; never writes. Metadata reads are
//! lenient — a missing or malformed field degrades that one statistic, not
//! the whole run.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::models::capture::CacheIdentity;
use crate::models::usage;
use crate::store::{
    CAPTURE_META_FILE, REQUEST_BODY_FILE, REQUEST_NORMALIZED_FILE, RESPONSE_META_FILE,
};

/// Report at most this many identity groups.
const TOP_GROUPS: usize = 20;

/// Naive timestamp spellings accepted by `--since`/`--until`, taken as UTC.
const NAIVE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// One qualifying capture directory with whatever metadata it yielded.
#[derive(Debug)]
pub struct CaptureEntry {
    pub request_id: String,
    pub dir: PathBuf,
    pub captured_at: Option<DateTime<Utc>>,
    pub usage: Option<Value>,
    pub elapsed_ms: Option<u64>,
    pub cache_key: Option<String>,
}

#[derive(Debug, Default)]
pub struct CacheSummary {
    pub captures: usize,
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub hit_rate: f64,
    pub avg_elapsed_ms: Option<f64>,
    /// Identity groups, largest first, capped at [`TOP_GROUPS`].
    pub groups: Vec<(String, usize)>,
}

/// Walk `root/{day}/{request_id}/` and collect every directory that holds the
/// three request-side artifacts. Result is ordered by `(captured_at,
/// request_id)`; entries without a timestamp sort first.
pub fn find_captures(root: &Path) -> anyhow::Result<Vec<CaptureEntry>> {
    if !root.is_dir() {
        anyhow::bail!("capture root not found: {}", root.display());
    }

    let mut entries = Vec::new();
    for day in sorted_subdirs(root)? {
        for dir in sorted_subdirs(&day)? {
            if let Some(entry) = load_entry(dir) {
                entries.push(entry);
            }
        }
    }

    entries.sort_by(|a, b| {
        let ka = (a.captured_at.unwrap_or(DateTime::<Utc>::MIN_UTC), &a.request_id);
        let kb = (b.captured_at.unwrap_or(DateTime::<Utc>::MIN_UTC), &b.request_id);
        ka.cmp(&kb)
    });
    Ok(entries)
}

/// Inclusive time-range filter. Captures that never got a timestamp are
/// excluded the moment either bound is set.
pub fn filter_captures(
    entries: Vec<CaptureEntry>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Vec<CaptureEntry> {
    if since.is_none() && until.is_none() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|entry| match entry.captured_at {
            Some(ts) => since.map_or(true, |s| ts >= s) && until.map_or(true, |u| ts <= u),
            None => false,
        })
        .collect()
}

pub fn summarize(entries: &[CaptureEntry]) -> CacheSummary {
    let mut input_tokens = 0u64;
    let mut cached_tokens = 0u64;
    let mut elapsed_sum = 0u64;
    let mut elapsed_count = 0usize;
    let mut groups: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        if let Some(usage_obj) = &entry.usage {
            input_tokens += usage::input_tokens(usage_obj);
            cached_tokens += usage::cached_tokens(usage_obj);
        }
        if let Some(ms) = entry.elapsed_ms {
            elapsed_sum += ms;
            elapsed_count += 1;
        }
        if let Some(key) = &entry.cache_key {
            *groups.entry(key.clone()).or_default() += 1;
        }
    }

    let hit_rate = if input_tokens == 0 {
        0.0
    } else {
        cached_tokens as f64 / input_tokens as f64
    };
    let avg_elapsed_ms = (elapsed_count > 0).then(|| elapsed_sum as f64 / elapsed_count as f64);

    let mut ranked: Vec<(String, usize)> = groups.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_GROUPS);

    CacheSummary {
        captures: entries.len(),
        input_tokens,
        cached_tokens,
        hit_rate,
        avg_elapsed_ms,
        groups: ranked,
    }
}

pub fn render(summary: &CacheSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "captures: {}", summary.captures);
    let _ = writeln!(out, "input_tokens: {}", summary.input_tokens);
    let _ = writeln!(out, "cached_tokens: {}", summary.cached_tokens);
    let _ = writeln!(out, "cache_hit_rate: {:.3}", summary.hit_rate);
    if let Some(avg) = summary.avg_elapsed_ms {
        let _ = writeln!(out, "avg_elapsed_ms: {avg:.0}");
    }
    if !summary.groups.is_empty() {
        let _ = writeln!(out, "cache_ident groups:");
        for (key, count) in &summary.groups {
            let _ = writeln!(out, "  {key}: {count}");
        }
    }
    out
}

/// Locate two captures by id and return their normalized-body paths, for
/// feeding an external diff tool.
pub fn diff_paths(root: &Path, id_a: &str, id_b: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
    let dir_a = find_request_dir(root, id_a)?
        .ok_or_else(|| anyhow::anyhow!("capture '{id_a}' not found under {}", root.display()))?;
    let dir_b = find_request_dir(root, id_b)?
        .ok_or_else(|| anyhow::anyhow!("capture '{id_b}' not found under {}", root.display()))?;
    Ok((
        dir_a.join(REQUEST_NORMALIZED_FILE),
        dir_b.join(REQUEST_NORMALIZED_FILE),
    ))
}

/// `--since`/`--until` parser. Accepts RFC 3339 (`2024-03-09T14:05:31Z`,
/// offsets included) or a naive `YYYY-MM-DD HH:MM[:SS]` taken as UTC.
pub fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc());
        }
    }
    anyhow::bail!("unrecognized time '{raw}': use RFC 3339 or YYYY-MM-DD HH:MM")
}

pub fn run_summary(dir: &Path, since: Option<&str>, until: Option<&str>) -> anyhow::Result<()> {
    let since = since.map(parse_time).transpose()?;
    let until = until.map(parse_time).transpose()?;
    let entries = filter_captures(find_captures(dir)?, since, until);
    print!("{}", render(&summarize(&entries)));
    Ok(())
}

pub fn run_diff(dir: &Path, id_a: &str, id_b: &str) -> anyhow::Result<()> {
    let (path_a, path_b) = diff_paths(dir, id_a, id_b)?;
    println!("{}", path_a.display());
    println!("{}", path_b.display());
    println!();
    println!(
        "git diff --no-index -- {} {}",
        path_a.display(),
        path_b.display()
    );
    Ok(())
}

fn sorted_subdirs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.sort();
    Ok(subdirs)
}

fn load_entry(dir: PathBuf) -> Option<CaptureEntry> {
    // Qualification: a capture counts only once its request-side artifacts
    // and response metadata all exist.
    for required in [REQUEST_BODY_FILE, REQUEST_NORMALIZED_FILE, RESPONSE_META_FILE] {
        if !dir.join(required).is_file() {
            return None;
        }
    }
    let request_id = dir.file_name()?.to_str()?.to_string();

    let capture_meta = read_json(&dir.join(CAPTURE_META_FILE));
    let response_meta = read_json(&dir.join(RESPONSE_META_FILE));

    let captured_at = capture_meta
        .as_ref()
        .and_then(timestamp_of)
        .or_else(|| response_meta.as_ref().and_then(timestamp_of));
    let usage = response_meta
        .as_ref()
        .and_then(|m| m.get("usage"))
        .filter(|u| u.is_object())
        .cloned();
    let elapsed_ms = response_meta
        .as_ref()
        .and_then(|m| m.get("elapsed_ms"))
        .and_then(Value::as_u64);
    let cache_key = capture_meta.as_ref().and_then(primary_cache_key);

    Some(CaptureEntry {
        request_id,
        dir,
        captured_at,
        usage,
        elapsed_ms,
        cache_key,
    })
}

fn read_json(path: &Path) -> Option<Value> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn timestamp_of(meta: &Value) -> Option<DateTime<Utc>> {
    let raw = meta.get("captured_at")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn primary_cache_key(meta: &Value) -> Option<String> {
    let ident: CacheIdentity = serde_json::from_value(meta.get("cache_ident")?.clone()).ok()?;
    ident.primary().map(String::from)
}

fn find_request_dir(root: &Path, request_id: &str) -> anyhow::Result<Option<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("capture root not found: {}", root.display());
    }
    for day in sorted_subdirs(root)? {
        let candidate = day.join(request_id);
        if candidate.is_dir() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}
