//! CIM/WMI backend driven through PowerShell
//!
//! Each query runs `Get-CimInstance` in a child PowerShell process that
//! prints one compressed JSON object per line. The stream reads stdout line
//! by line, so records are pulled one at a time and `next_record` blocks on
//! the child. A non-zero exit after end of output is reported as a query
//! rejection carrying the child's stderr.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::backend::{
    AuthenticationLevel, BackendError, ImpersonationLevel, ManagementBackend, RecordStream,
    SecurityContext,
};
use crate::query::{PropertyRecord, QueryRequest};

/// PowerShell executable used on Windows hosts
#[cfg(target_os = "windows")]
pub const DEFAULT_POWERSHELL: &str = "powershell.exe";

/// PowerShell executable used elsewhere (PowerShell 7 with CIM remoting)
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_POWERSHELL: &str = "pwsh";

/// Backend that executes WQL through PowerShell `Get-CimInstance`
pub struct CimBackend {
    powershell: String,
    namespace: Option<String>,
}

impl CimBackend {
    pub fn new() -> Self {
        Self::with_powershell(DEFAULT_POWERSHELL)
    }

    /// Use a specific PowerShell executable
    pub fn with_powershell(powershell: impl Into<String>) -> Self {
        Self {
            powershell: powershell.into(),
            namespace: None,
        }
    }

    fn command(&self, script: &str) -> Command {
        let mut command = Command::new(&self.powershell);
        command.args(["-NoProfile", "-NonInteractive", "-Command", script]);
        command
    }

    /// Run a short script to completion, returning trimmed stdout
    fn run_script(&self, script: &str) -> Result<String, BackendError> {
        let output = self.command(script).stdin(Stdio::null()).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BackendError::rejected(if stderr.is_empty() {
                format!("PowerShell exited with {}", output.status)
            } else {
                stderr
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for CimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagementBackend for CimBackend {
    fn name(&self) -> &'static str {
        "cim"
    }

    fn initialize_security(&mut self) -> Result<SecurityContext, BackendError> {
        let version = self
            .run_script("$PSVersionTable.PSVersion.Major")
            .map_err(|e| {
                BackendError::unavailable(format!(
                    "cannot start '{}' for CIM access: {}",
                    self.powershell, e
                ))
            })?;
        if !command_exists("Get-CimInstance", self)? {
            return Err(BackendError::unavailable(
                "Get-CimInstance is not available in this PowerShell",
            ));
        }
        info!("CIM backend using PowerShell {}", version);
        Ok(SecurityContext {
            mechanism: "powershell-cim".to_string(),
            authentication: AuthenticationLevel::PacketPrivacy,
            impersonation: ImpersonationLevel::Impersonate,
        })
    }

    fn connect(&mut self, namespace: &str) -> Result<(), BackendError> {
        let script = format!(
            "[void](Get-CimClass -Namespace {} -ErrorAction Stop | Select-Object -First 1)",
            ps_quote(namespace)
        );
        self.run_script(&script).map_err(|e| match e {
            BackendError::Rejected { reason } => BackendError::refused(namespace, reason),
            other => other,
        })?;
        self.namespace = Some(namespace.to_string());
        Ok(())
    }

    fn exec_query<'a>(
        &'a mut self,
        request: &QueryRequest,
    ) -> Result<Box<dyn RecordStream + 'a>, BackendError> {
        let namespace = self
            .namespace
            .as_deref()
            .ok_or_else(|| BackendError::unavailable("not connected to a namespace"))?;
        if request.text.trim().is_empty() {
            return Err(BackendError::rejected("empty query"));
        }

        let script = query_script(namespace, &request.text);
        debug!("Spawning CIM query: {}", request.text);
        Ok(Box::new(CimStream::spawn(self.command(&script))?))
    }

    fn disconnect(&mut self) {
        self.namespace = None;
    }

    fn release_security(&mut self) {}
}

fn command_exists(name: &str, backend: &CimBackend) -> Result<bool, BackendError> {
    let script = format!(
        "if (Get-Command {} -ErrorAction SilentlyContinue) {{ 'yes' }} else {{ 'no' }}",
        ps_quote(name)
    );
    Ok(backend.run_script(&script)? == "yes")
}

/// Quote a value as a PowerShell single-quoted literal
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Script emitting one compressed JSON object per CIM instance
fn query_script(namespace: &str, wql: &str) -> String {
    format!(
        "Get-CimInstance -Namespace {} -Query {} -ErrorAction Stop | \
         Select-Object -Property * -ExcludeProperty Cim* | \
         ForEach-Object {{ $_ | ConvertTo-Json -Compress -Depth 2 }}",
        ps_quote(namespace),
        ps_quote(wql)
    )
}

/// Decode one line of query output
fn parse_record_line(line: &str) -> Result<Option<PropertyRecord>, BackendError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(line)?;
    PropertyRecord::from_json_object(&value)
        .map(Some)
        .ok_or_else(|| BackendError::parse(format!("expected a JSON object, got: {line}")))
}

/// Read stderr to the end on its own thread so the child never blocks on a
/// full pipe while stdout is still being consumed
fn drain_stderr(mut pipe: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut stderr = String::new();
        if let Err(e) = pipe.read_to_string(&mut stderr) {
            debug!("Reading PowerShell stderr failed: {}", e);
        }
        stderr
    })
}

struct CimStream {
    child: Option<Child>,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    line: String,
}

impl CimStream {
    fn spawn(mut command: Command) -> Result<Self, BackendError> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::unavailable("stdout not available"))?;
        let stderr = child.stderr.take().map(drain_stderr);

        Ok(Self {
            child: Some(child),
            stdout: BufReader::new(stdout),
            stderr,
            line: String::new(),
        })
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|drain| drain.join().ok())
            .unwrap_or_default();
        if status.success() {
            return Ok(());
        }
        let stderr = stderr.trim();
        Err(BackendError::rejected(if stderr.is_empty() {
            format!("Get-CimInstance exited with {status}")
        } else {
            stderr.to_string()
        }))
    }
}

impl RecordStream for CimStream {
    fn next_record(&mut self) -> Result<Option<PropertyRecord>, BackendError> {
        loop {
            self.line.clear();
            if self.stdout.read_line(&mut self.line)? == 0 {
                self.finish()?;
                return Ok(None);
            }
            if let Some(record) = parse_record_line(&self.line)? {
                return Ok(Some(record));
            }
        }
    }
}

impl Drop for CimStream {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    warn!("CIM query released before completion - killing PowerShell");
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}
