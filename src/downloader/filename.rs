//! Safe, collision-resistant file names

use crate::utils::error::{LoaderError, Result};
use chrono::{DateTime, Local};
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};
use tracing::warn;
use url::Url;

pub const DEFAULT_NAME: &str = "downloaded_file";

/// Characters that are unsafe in file names on at least one platform
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Most filesystems cap a single path component at 255 bytes
const MAX_NAME_BYTES: usize = 255;

/// Longest suffix still treated as an extension when shortening names
const MAX_EXT_BYTES: usize = 32;

/// Picks the on-disk name for a download and keeps it inside the save root
#[derive(Debug, Clone)]
pub struct FilenameResolver {
    save_root: PathBuf,
    /// Where files land; the save root or a directory below it
    destination: PathBuf,
}

impl FilenameResolver {
    pub fn new(save_root: impl Into<PathBuf>) -> Self {
        let save_root = save_root.into();
        Self {
            destination: save_root.clone(),
            save_root,
        }
    }

    /// Resolver writing into `destination`, which must lie inside `save_root`.
    ///
    /// Relative destinations are taken relative to the root. The root must
    /// exist; the destination is only checked, not created.
    pub fn with_destination(save_root: impl Into<PathBuf>, destination: &Path) -> Result<Self> {
        let save_root = save_root.into();
        let canonical_root = save_root.canonicalize()?;
        let candidate = if destination.is_relative() {
            save_root.join(destination)
        } else {
            destination.to_path_buf()
        };

        let destination = if candidate == save_root || candidate == canonical_root {
            canonical_root
        } else {
            ensure_within(&save_root, &candidate)?
        };
        Ok(Self {
            save_root,
            destination,
        })
    }

    pub fn save_root(&self) -> &Path {
        &self.save_root
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Resolve the final name and path for a download.
    ///
    /// The name comes from Content-Disposition, then the URL, then
    /// [`DEFAULT_NAME`], and is decorated with a timestamp and a hash of the
    /// content sample.
    pub fn resolve(
        &self,
        content_disposition: Option<&str>,
        url: &str,
        sample: &[u8],
        now: DateTime<Local>,
    ) -> Result<(String, PathBuf)> {
        let base = base_name(content_disposition, url);
        let name = unique_name(&base, sample, now);
        let path = ensure_within(&self.save_root, &self.destination.join(&name))?;
        Ok((name, path))
    }
}

/// Create the save root, check `destination` against it and create it.
///
/// Nothing is created outside the root.
pub async fn prepare_destination(save_root: &Path, destination: &Path) -> Result<FilenameResolver> {
    tokio::fs::create_dir_all(save_root).await?;
    let resolver = FilenameResolver::with_destination(save_root, destination)?;
    tokio::fs::create_dir_all(resolver.destination()).await?;
    Ok(resolver)
}

/// Sanitized name from the headers or URL, without decoration
pub fn base_name(content_disposition: Option<&str>, url: &str) -> String {
    let raw = content_disposition
        .and_then(from_content_disposition)
        .or_else(|| name_from_url(url))
        .unwrap_or_else(|| DEFAULT_NAME.to_string());

    let name = sanitize(raw.trim());
    if name.is_empty() || name == "." || name == ".." {
        DEFAULT_NAME.to_string()
    } else {
        name
    }
}

/// Name reported before the headers are known
pub fn provisional_name(url: &str) -> String {
    base_name(None, url)
}

/// Extract a file name from a Content-Disposition value.
///
/// `filename*=` (RFC 5987) wins over `filename=`.
pub fn from_content_disposition(header: &str) -> Option<String> {
    let params = disposition_params(header);

    let extended = params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("filename*"))
        .map(|(_, value)| decode_extended(value))
        .filter(|name| !name.trim().is_empty());
    if extended.is_some() {
        return extended;
    }

    params
        .into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("filename"))
        .map(|(_, value)| value)
        .filter(|name| !name.trim().is_empty())
}

/// Split `attachment; a=1; b="x; y"` into `(key, unquoted value)` pairs.
fn disposition_params(header: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = header.chars().peekable();

    // Skip the disposition type
    for c in chars.by_ref() {
        if c == ';' {
            break;
        }
    }

    loop {
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            chars.next();
            if c == '=' || c == ';' {
                if c == ';' {
                    key.clear();
                    continue;
                }
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            break;
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
            // Drop anything between the closing quote and the next separator
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
            }
        } else {
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
                value.push(c);
            }
            value = value.trim().to_string();
        }

        params.push((key, value));
    }

    params
}

/// Decode `charset'lang'percent-encoded`.
///
/// Non-UTF-8 bytes are mapped one byte per char.
fn decode_extended(value: &str) -> String {
    let encoded = match value.splitn(3, '\'').collect::<Vec<_>>().as_slice() {
        [_, _, encoded] => *encoded,
        _ => value,
    };

    let bytes = urlencoding::decode_binary(encoded.as_bytes()).into_owned();
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// Last non-empty path segment of the URL, percent-decoded.
pub fn name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?
        .to_string();

    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    Some(decoded).filter(|name| !name.trim().is_empty())
}

/// Replace path separators, reserved characters and control characters with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Split `name` into stem and extension (with its dot).
///
/// Leading dots never start an extension, so `.bashrc` has none.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// `{stem}_{YYYYMMDD_HHMMSS}_{md5[..8]}{ext}`
pub fn unique_name(name: &str, sample: &[u8], now: DateTime<Local>) -> String {
    let (mut stem, mut ext) = split_extension(name);
    if ext.len() > MAX_EXT_BYTES {
        stem = name;
        ext = "";
    }

    let digest = format!("{:x}", md5::compute(sample));
    let suffix = format!("_{}_{}{}", now.format("%Y%m%d_%H%M%S"), &digest[..8], ext);

    let budget = MAX_NAME_BYTES.saturating_sub(suffix.len());
    format!("{}{}", truncate_on_char_boundary(stem, budget), suffix)
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Confirm `candidate` lies strictly inside `root`.
///
/// The root is canonicalized (it must exist); the candidate is normalized
/// lexically since the file may not exist yet.
pub fn ensure_within(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let canonical_root = root.canonicalize()?;

    let rebased = match candidate.strip_prefix(root) {
        Ok(rest) => canonical_root.join(rest),
        Err(_) => candidate.to_path_buf(),
    };
    let resolved = rebased.absolutize_from(&canonical_root)?.into_owned();

    if resolved != canonical_root && resolved.starts_with(&canonical_root) {
        Ok(resolved)
    } else {
        warn!(
            root = %canonical_root.display(),
            candidate = %resolved.display(),
            "Rejected file path outside the save directory"
        );
        Err(LoaderError::PathTraversal(resolved))
    }
}
