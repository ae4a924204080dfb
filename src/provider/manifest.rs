//! Manifest-described provider modules
//!
//! A provider module on disk is a `<name>.provider.json` manifest. Each
//! exported entry point maps to a program invocation; the program takes no
//! input and prints its result on stdout, either as a JSON scalar or as
//! plain text.
//!
//! ```json
//! {
//!   "name": "vendor_board",
//!   "architectures": ["x86_64"],
//!   "entry_points": {
//!     "GetBoardSerial": { "program": "bin/board-serial", "sha256": "9f86d0..." }
//!   }
//! }
//! ```
//!
//! Loading validates the whole manifest up front: a host architecture
//! mismatch, a missing program or a digest mismatch fails the load instead
//! of failing later at invocation.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::provider::{ModuleError, ModuleLoader, ProviderHandle, ProviderModule};
use crate::query::PropertyValue;

/// File suffix identifying a provider manifest
pub const MANIFEST_SUFFIX: &str = ".provider.json";

/// Environment variable with extra provider search directories
pub const PROVIDER_PATH_ENV: &str = "HWINVENTORY_PROVIDER_PATH";

/// Default limit on one entry-point program run
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Manifest Types
// ============================================================================

/// On-disk description of a provider module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderManifest {
    pub name: String,

    /// Host architectures the module supports (empty = any)
    #[serde(default)]
    pub architectures: Vec<String>,

    pub entry_points: BTreeMap<String, EntryPointSpec>,
}

/// Program backing one entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPointSpec {
    /// Program path, relative paths resolve against the manifest directory
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Expected SHA-256 of the program (lowercase hex)
    #[serde(default)]
    pub sha256: Option<String>,
}

// ============================================================================
// Manifest Loader
// ============================================================================

/// Loads provider modules from manifests on a search path
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    search_dirs: Vec<PathBuf>,
    host_arch: String,
    invoke_timeout: Duration,
}

impl ManifestLoader {
    /// Search the current directory, then `search_dirs`
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        let mut dirs = vec![PathBuf::from(".")];
        dirs.extend(search_dirs);
        Self {
            search_dirs: dirs,
            host_arch: std::env::consts::ARCH.to_string(),
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    /// Kill entry-point programs still running after `timeout`
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// Also search the directories listed in `HWINVENTORY_PROVIDER_PATH`
    pub fn with_env_search_path(mut self) -> Self {
        if let Some(paths) = std::env::var_os(PROVIDER_PATH_ENV) {
            self.search_dirs.extend(std::env::split_paths(&paths));
        }
        self
    }

    /// Override the host architecture used for compatibility checks
    pub fn with_host_arch(mut self, arch: impl Into<String>) -> Self {
        self.host_arch = arch.into();
        self
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Locate the manifest for `name`
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ModuleError> {
        let is_path = name.contains(MAIN_SEPARATOR) || name.contains('/');
        if is_path || name.ends_with(MANIFEST_SUFFIX) {
            let path = PathBuf::from(name);
            if path.is_file() {
                return Ok(path);
            }
            return Err(ModuleError::ModuleNotFound {
                name: name.to_string(),
                searched: vec![path],
            });
        }

        let file_name = format!("{name}{MANIFEST_SUFFIX}");
        let mut searched = Vec::new();
        for dir in &self.search_dirs {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                debug!("Resolved provider {} to {}", name, candidate.display());
                return Ok(candidate);
            }
            searched.push(candidate);
        }
        Err(ModuleError::ModuleNotFound {
            name: name.to_string(),
            searched,
        })
    }

    fn read_manifest(name: &str, path: &Path) -> Result<ProviderManifest, ModuleError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ModuleError::load(name, format!("cannot read manifest: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| ModuleError::load(name, format!("malformed manifest: {e}")))
    }

    fn validate(
        &self,
        name: &str,
        manifest: &ProviderManifest,
        manifest_dir: &Path,
    ) -> Result<BTreeMap<String, ResolvedEntry>, ModuleError> {
        if !manifest.architectures.is_empty()
            && !manifest
                .architectures
                .iter()
                .any(|arch| arch.eq_ignore_ascii_case(&self.host_arch))
        {
            return Err(ModuleError::load(
                name,
                format!(
                    "architecture mismatch: module supports {:?}, host is {}",
                    manifest.architectures, self.host_arch
                ),
            ));
        }
        if manifest.entry_points.is_empty() {
            return Err(ModuleError::load(name, "manifest exports no entry points"));
        }

        let mut resolved = BTreeMap::new();
        for (symbol, spec) in &manifest.entry_points {
            let program = resolve_program(manifest_dir, &spec.program);
            if !program.is_file() {
                return Err(ModuleError::load(
                    name,
                    format!(
                        "missing dependency for {}: {}",
                        symbol,
                        program.display()
                    ),
                ));
            }
            if let Some(expected) = &spec.sha256 {
                let actual = sha256_file(&program)
                    .map_err(|e| ModuleError::load(name, format!("cannot hash program: {e}")))?;
                if !actual.eq_ignore_ascii_case(expected.trim()) {
                    return Err(ModuleError::load(
                        name,
                        format!(
                            "digest mismatch for {}: expected {}, found {}",
                            program.display(),
                            expected,
                            actual
                        ),
                    ));
                }
            }
            resolved.insert(
                symbol.clone(),
                ResolvedEntry {
                    program,
                    args: spec.args.clone(),
                },
            );
        }
        Ok(resolved)
    }
}

impl Default for ManifestLoader {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ModuleLoader for ManifestLoader {
    fn load(&self, name: &str) -> Result<ProviderHandle, ModuleError> {
        let path = self.resolve(name)?;
        let manifest = Self::read_manifest(name, &path)?;
        let manifest_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let entries = self.validate(name, &manifest, &manifest_dir)?;

        info!(
            "Loaded provider module {} from {} ({} entry point(s))",
            manifest.name,
            path.display(),
            entries.len()
        );

        let module = ManifestModule {
            name: manifest.name,
            working_dir: manifest_dir,
            entries,
            timeout: self.invoke_timeout,
        };
        Ok(ProviderHandle::loaded(name, Some(path), Box::new(module)))
    }

    fn list_available(&self) -> Vec<String> {
        let mut names = Vec::new();
        for dir in &self.search_dirs {
            for entry in WalkDir::new(dir).max_depth(1).into_iter() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!("Skipping provider search entry: {}", e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy();
                if let Some(stem) = file_name.strip_suffix(MANIFEST_SUFFIX) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }
}

// ============================================================================
// Manifest Module
// ============================================================================

#[derive(Debug, Clone)]
struct ResolvedEntry {
    program: PathBuf,
    args: Vec<String>,
}

/// Provider module whose entry points run external programs
struct ManifestModule {
    name: String,
    working_dir: PathBuf,
    entries: BTreeMap<String, ResolvedEntry>,
    timeout: Duration,
}

struct ProgramOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = pipe.read_to_end(&mut bytes);
        bytes
    })
}

impl ManifestModule {
    /// Run `entry` to completion, killing it once the timeout elapses
    fn run(&self, symbol: &str, entry: &ResolvedEntry) -> Result<ProgramOutput, ModuleError> {
        let invocation = |reason: String| ModuleError::invocation(&self.name, symbol, reason);

        let mut child = Command::new(&entry.program)
            .args(&entry.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| invocation(e.to_string()))?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        "{}::{} still running after {:?} - killing",
                        self.name, symbol, self.timeout
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(invocation(format!("timed out after {:?}", self.timeout)));
                }
                Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(invocation(e.to_string()));
                }
            }
        };

        let collect = |pipe: Option<JoinHandle<Vec<u8>>>| {
            pipe.and_then(|drain| drain.join().ok()).unwrap_or_default()
        };
        Ok(ProgramOutput {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

impl ProviderModule for ManifestModule {
    fn entry_points(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn invoke(&self, symbol: &str) -> Result<PropertyValue, ModuleError> {
        let entry = self
            .entries
            .get(symbol)
            .ok_or_else(|| ModuleError::SymbolNotFound {
                module: self.name.clone(),
                symbol: symbol.to_string(),
            })?;

        let output = self.run(symbol, entry)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("{}::{} exited with {}", self.name, symbol, output.status);
            return Err(ModuleError::invocation(
                &self.name,
                symbol,
                if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            ));
        }

        parse_entry_output(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| ModuleError::invocation(&self.name, symbol, "empty result"))
    }
}

fn resolve_program(manifest_dir: &Path, program: &str) -> PathBuf {
    let path = PathBuf::from(program);
    if path.is_absolute() {
        path
    } else {
        manifest_dir.join(path)
    }
}

/// Decode entry-point stdout: JSON scalar, `{"value": ...}`, or plain text
fn parse_entry_output(stdout: &str) -> Option<PropertyValue> {
    let text = stdout.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => object.get("value").map(PropertyValue::from_json),
        Ok(Value::Array(_)) | Err(_) => Some(PropertyValue::String(text.to_string())),
        Ok(scalar) => Some(PropertyValue::from_json(&scalar)),
    }
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Tests
// ============================================================================
