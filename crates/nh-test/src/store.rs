//! File-backed session store.
//!
//! Sessions live as `*.session.json` (optionally gzip-compressed) files in
//! the working copy, or in a golden branch of the same repository read
//! through `git`. Candidate traces and result bundles use the same JSON
//! (and gzip) handling.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use nh_compare::report::ResultBundle;
use nh_compare::trace::{CandidateTrace, Session, SessionDocument, SessionKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LoadError;

pub const SESSION_SUFFIX: &str = ".session.json";
pub const SESSION_SUFFIX_GZ: &str = ".session.json.gz";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_session_file(name: &str) -> bool {
    name.ends_with(SESSION_SUFFIX) || name.ends_with(SESSION_SUFFIX_GZ)
}

/// Where a session is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SessionSource {
    File { path: PathBuf },
    Golden { branch: String, path: String },
}

impl SessionSource {
    /// File name of the session, used as its identifier in results.
    pub fn name(&self) -> String {
        let full = match self {
            SessionSource::File { path } => path.to_string_lossy().into_owned(),
            SessionSource::Golden { path, .. } => path.clone(),
        };
        full.rsplit(['/', '\\']).next().unwrap_or(&full).to_string()
    }

    pub fn kind(&self) -> SessionKind {
        SessionKind::infer_from_name(&self.name())
    }

    /// Scheduling cost proxy: stored size in bytes.
    pub fn cost(&self) -> u64 {
        match self {
            SessionSource::File { path } => fs::metadata(path).map_or(0, |m| m.len()),
            SessionSource::Golden { branch, path } => {
                git(&["cat-file", "-s", &format!("{}:{}", branch, path)])
                    .ok()
                    .and_then(|out| String::from_utf8_lossy(&out).trim().parse().ok())
                    .unwrap_or(0)
            }
        }
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>, LoadError> {
        let raw = match self {
            SessionSource::File { path } => fs::read(path).map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?,
            SessionSource::Golden { branch, path } => {
                git(&["show", &format!("{}:{}", branch, path)])?
            }
        };
        decode_bytes(raw).map_err(|source| LoadError::Io {
            path: PathBuf::from(self.to_string()),
            source,
        })
    }

    pub fn load(&self) -> Result<Session, LoadError> {
        let bytes = self.read_bytes()?;
        parse_session(&bytes, &self.name())
    }
}

impl core::fmt::Display for SessionSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SessionSource::File { path } => write!(f, "{}", path.display()),
            SessionSource::Golden { branch, path } => write!(f, "{}:{}", branch, path),
        }
    }
}

/// Gunzip `raw` if it carries the gzip magic, otherwise return it unchanged.
pub fn decode_bytes(raw: Vec<u8>) -> std::io::Result<Vec<u8>> {
    if !raw.starts_with(&GZIP_MAGIC) {
        return Ok(raw);
    }
    let mut decoder = GzDecoder::new(raw.as_slice());
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

pub fn parse_session(bytes: &[u8], name: &str) -> Result<Session, LoadError> {
    let doc: SessionDocument = serde_json::from_slice(bytes).map_err(|source| LoadError::Parse {
        name: name.to_string(),
        source,
    })?;
    Ok(doc.into_session(name))
}

fn git(args: &[&str]) -> Result<Vec<u8>, LoadError> {
    let output = Command::new("git")
        .args(args)
        .output()
        .map_err(|e| LoadError::Git {
            args: args.join(" "),
            message: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(LoadError::Git {
            args: args.join(" "),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

// ============================================================================
// Discovery
// ============================================================================

/// Session files in `dirs`, sorted by name within each directory.
///
/// Missing directories are skipped.
pub fn discover(dirs: &[PathBuf]) -> Vec<SessionSource> {
    let mut sources = Vec::new();
    for dir in dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping sessions directory");
                continue;
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(is_session_file))
            .collect();
        paths.sort();
        sources.extend(paths.into_iter().map(|path| SessionSource::File { path }));
    }
    sources
}

/// Session files of `dirs` as committed on `branch`.
///
/// A directory missing on the branch yields nothing; a missing branch or
/// git failure is an error.
pub fn discover_golden(branch: &str, dirs: &[PathBuf]) -> Result<Vec<SessionSource>, LoadError> {
    git(&["rev-parse", "--verify", "--quiet", &format!("{}^{{commit}}", branch)]).map_err(|_| {
        LoadError::NotFound(format!("golden branch {:?}", branch))
    })?;

    let mut sources = Vec::new();
    for dir in dirs {
        let rel = dir.to_string_lossy().trim_end_matches('/').to_string();
        let listing = match git(&["ls-tree", "--name-only", &format!("{}:{}", branch, rel)]) {
            Ok(out) => out,
            Err(e) => {
                warn!(%branch, dir = %rel, error = %e, "no golden sessions directory");
                continue;
            }
        };
        let mut names: Vec<String> = String::from_utf8_lossy(&listing)
            .lines()
            .map(str::trim)
            .filter(|n| is_session_file(n))
            .map(str::to_string)
            .collect();
        names.sort();
        sources.extend(names.into_iter().map(|name| SessionSource::Golden {
            branch: branch.to_string(),
            path: format!("{}/{}", rel, name),
        }));
    }
    Ok(sources)
}

/// Selects sessions by kind and name.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub kinds: Vec<SessionKind>,
    /// Exact file names, or file names without the session suffix.
    pub names: Vec<String>,
}

fn strip_session_suffix(name: &str) -> &str {
    name.strip_suffix(SESSION_SUFFIX_GZ)
        .or_else(|| name.strip_suffix(SESSION_SUFFIX))
        .unwrap_or(name)
}

impl SessionFilter {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty() && self.names.is_empty()
    }

    /// Add every name listed in a file, one per line. Blank lines and `#`
    /// comments are ignored.
    pub fn add_names_from_file(&mut self, path: &Path) -> Result<(), LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.names.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
        Ok(())
    }

    pub fn matches(&self, source: &SessionSource) -> bool {
        let name = source.name();
        if !self.kinds.is_empty() && !self.kinds.contains(&source.kind()) {
            return false;
        }
        if !self.names.is_empty() {
            let stem = strip_session_suffix(&name);
            return self
                .names
                .iter()
                .any(|n| n == &name || strip_session_suffix(n) == stem);
        }
        true
    }

    pub fn apply(&self, sources: Vec<SessionSource>) -> Vec<SessionSource> {
        sources.into_iter().filter(|s| self.matches(s)).collect()
    }
}

// ============================================================================
// Traces and bundles
// ============================================================================

/// Read a JSON file, gunzipping it when compressed.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let raw = fs::read(path).map_err(io_err)?;
    let bytes = decode_bytes(raw).map_err(io_err)?;
    serde_json::from_slice(&bytes).map_err(|source| LoadError::Parse {
        name: path.display().to_string(),
        source,
    })
}

/// Write pretty JSON, gzip-compressed when the path ends in `.gz`.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    if path.extension().is_some_and(|e| e == "gz") {
        let mut encoder = GzEncoder::new(fs::File::create(path)?, Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()?;
        Ok(())
    } else {
        fs::write(path, json)
    }
}

pub fn load_trace(path: &Path) -> Result<CandidateTrace, LoadError> {
    read_json_file(path)
}

pub fn write_trace(path: &Path, trace: &CandidateTrace) -> std::io::Result<()> {
    write_json_file(path, trace)
}

pub fn load_bundle(path: &Path) -> Result<ResultBundle, LoadError> {
    read_json_file(path)
}

/// Write the names of failed sessions, one per line.
pub fn write_failed_list(path: &Path, bundle: &ResultBundle) -> std::io::Result<()> {
    let mut text = bundle.failed_sessions().join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    fs::write(path, text)
}
