//! Linux backend answering CIM hardware classes from procfs and sysfs
//!
//! Maps the subset of `root\cimv2` classes the inventory needs onto files
//! under a configurable root:
//!
//! | Class                  | Source                                          |
//! |------------------------|-------------------------------------------------|
//! | Win32_BaseBoard        | `sys/class/dmi/id/board_*`                      |
//! | Win32_BIOS             | `sys/class/dmi/id/bios_*`, `product_serial`     |
//! | Win32_Processor        | `proc/cpuinfo`, one instance per package        |
//! | Win32_ComputerSystem   | `proc/meminfo`, `proc/sys/kernel/hostname`      |
//! | Win32_OperatingSystem  | `etc/os-release`, `proc/meminfo`, kernel release|
//!
//! Unreadable files (DMI serials are often root-only) leave the property
//! out of the record rather than failing the query.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::backend::{
    BackendError, DEFAULT_NAMESPACE, ManagementBackend, RecordStream, SecurityContext,
    VecRecordStream, same_namespace,
};
use crate::query::{ParsedQuery, PropertyRecord, PropertyValue, QueryRequest};

/// Backend reading hardware facts from a procfs/sysfs tree
pub struct SysfsBackend {
    root: PathBuf,
    arch: String,
    connected: bool,
}

impl SysfsBackend {
    /// Backend over the live filesystem
    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Backend over an alternative root (chroot, container image, test tree)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            arch: std::env::consts::ARCH.to_string(),
            connected: false,
        }
    }

    /// Override the architecture reported by `Win32_Processor`
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn read_trimmed(&self, relative: &str) -> Option<String> {
        let path = self.path(relative);
        match fs::read_to_string(&path) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) => {
                trace!("Skipping {}: {}", path.display(), e);
                None
            }
        }
    }

    fn dmi(&self, record: &mut PropertyRecord, property: &str, file: &str) {
        if let Some(value) = self.read_trimmed(&format!("sys/class/dmi/id/{file}")) {
            record.insert(property, value);
        }
    }

    fn base_board(&self) -> Vec<PropertyRecord> {
        let mut record = PropertyRecord::new();
        self.dmi(&mut record, "SerialNumber", "board_serial");
        self.dmi(&mut record, "Manufacturer", "board_vendor");
        self.dmi(&mut record, "Product", "board_name");
        self.dmi(&mut record, "Version", "board_version");
        if record.is_empty() {
            return Vec::new();
        }
        record.insert("Tag", "Base Board");
        vec![record]
    }

    fn bios(&self) -> Vec<PropertyRecord> {
        let mut record = PropertyRecord::new();
        self.dmi(&mut record, "SerialNumber", "product_serial");
        self.dmi(&mut record, "Manufacturer", "bios_vendor");
        self.dmi(&mut record, "SMBIOSBIOSVersion", "bios_version");
        self.dmi(&mut record, "ReleaseDate", "bios_date");
        if record.is_empty() {
            Vec::new()
        } else {
            vec![record]
        }
    }

    fn processors(&self) -> Result<Vec<PropertyRecord>, BackendError> {
        let cpuinfo = fs::read_to_string(self.path("proc/cpuinfo"))?;
        let packages = parse_cpuinfo(&cpuinfo);
        let architecture = architecture_code(&self.arch);

        Ok(packages
            .into_iter()
            .map(|(package_id, package)| {
                let mut record = PropertyRecord::new()
                    .with("DeviceID", format!("CPU{package_id}"))
                    .with("NumberOfCores", package.cores() as u64)
                    .with("NumberOfLogicalProcessors", package.logical as u64);
                record.insert(
                    "Architecture",
                    architecture.map_or(PropertyValue::Null, PropertyValue::Unsigned),
                );
                if let Some(name) = package.model_name {
                    record.insert("Name", name);
                }
                record
            })
            .collect())
    }

    fn computer_system(&self) -> Result<Vec<PropertyRecord>, BackendError> {
        let meminfo = parse_meminfo(&fs::read_to_string(self.path("proc/meminfo"))?);
        let mut record = PropertyRecord::new();
        if let Some(total_kb) = meminfo.get("MemTotal") {
            record.insert("TotalPhysicalMemory", total_kb * 1024);
        }
        if let Some(hostname) = self.read_trimmed("proc/sys/kernel/hostname") {
            record.insert("Name", hostname);
        }
        if let Ok(cpuinfo) = fs::read_to_string(self.path("proc/cpuinfo")) {
            let packages = parse_cpuinfo(&cpuinfo);
            let logical: usize = packages.values().map(|p| p.logical).sum();
            record.insert("NumberOfProcessors", packages.len() as u64);
            record.insert("NumberOfLogicalProcessors", logical as u64);
        }
        Ok(vec![record])
    }

    fn operating_system(&self) -> Result<Vec<PropertyRecord>, BackendError> {
        let meminfo = parse_meminfo(&fs::read_to_string(self.path("proc/meminfo"))?);
        let mut record = PropertyRecord::new();
        // Win32_OperatingSystem reports memory sizes in kilobytes
        if let Some(total_kb) = meminfo.get("MemTotal") {
            record.insert("TotalVisibleMemorySize", *total_kb);
        }
        if let Some(free_kb) = meminfo.get("MemAvailable").or_else(|| meminfo.get("MemFree")) {
            record.insert("FreePhysicalMemory", *free_kb);
        }
        if let Some(release) = self.read_trimmed("proc/sys/kernel/osrelease") {
            record.insert("Version", release);
        }
        if let Some(os_release) = self.read_trimmed("etc/os-release")
            && let Some(caption) = os_release_field(&os_release, "PRETTY_NAME")
        {
            record.insert("Caption", caption);
        }
        record.insert("OSArchitecture", self.arch.clone());
        Ok(vec![record])
    }

    fn instances(&self, class: &str) -> Result<Vec<PropertyRecord>, BackendError> {
        match class.to_ascii_lowercase().as_str() {
            "win32_baseboard" => Ok(self.base_board()),
            "win32_bios" => Ok(self.bios()),
            "win32_processor" => self.processors(),
            "win32_computersystem" => self.computer_system(),
            "win32_operatingsystem" => self.operating_system(),
            _ => Err(BackendError::rejected(format!("invalid class: {class}"))),
        }
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagementBackend for SysfsBackend {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn initialize_security(&mut self) -> Result<SecurityContext, BackendError> {
        let proc_dir = self.path("proc");
        if !proc_dir.is_dir() {
            return Err(BackendError::unavailable(format!(
                "procfs not mounted at {}",
                proc_dir.display()
            )));
        }
        Ok(SecurityContext::new("procfs"))
    }

    fn connect(&mut self, namespace: &str) -> Result<(), BackendError> {
        if !same_namespace(namespace, DEFAULT_NAMESPACE) {
            return Err(BackendError::refused(
                namespace,
                "only root\\cimv2 is served from procfs/sysfs",
            ));
        }
        self.connected = true;
        Ok(())
    }

    fn exec_query<'a>(
        &'a mut self,
        request: &QueryRequest,
    ) -> Result<Box<dyn RecordStream + 'a>, BackendError> {
        let parsed = ParsedQuery::parse(&request.text).map_err(BackendError::rejected)?;
        let records: Vec<PropertyRecord> = self
            .instances(&parsed.class)?
            .into_iter()
            .filter(|record| parsed.matches(record))
            .map(|record| parsed.project(record))
            .collect();
        debug!(
            "sysfs query on {} produced {} record(s)",
            parsed.class,
            records.len()
        );
        Ok(Box::new(VecRecordStream::new(records)))
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn release_security(&mut self) {}
}

// ============================================================================
// Parsing helpers
// ============================================================================

/// Win32_Processor.Architecture code for a Rust target architecture
pub fn architecture_code(arch: &str) -> Option<u64> {
    match arch {
        "x86" => Some(0),
        "mips" | "mips64" => Some(1),
        "powerpc" | "powerpc64" => Some(3),
        "arm" => Some(5),
        "x86_64" => Some(9),
        "aarch64" => Some(12),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct CpuPackage {
    logical: usize,
    core_ids: std::collections::BTreeSet<String>,
    model_name: Option<String>,
}

impl CpuPackage {
    fn cores(&self) -> usize {
        if self.core_ids.is_empty() {
            self.logical
        } else {
            self.core_ids.len()
        }
    }
}

/// Group `/proc/cpuinfo` processor blocks by physical package id
fn parse_cpuinfo(content: &str) -> BTreeMap<String, CpuPackage> {
    let mut packages: BTreeMap<String, CpuPackage> = BTreeMap::new();

    for block in content.split("\n\n") {
        let fields: BTreeMap<&str, &str> = block
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        if !fields.contains_key("processor") {
            continue;
        }

        let package_id = fields.get("physical id").copied().unwrap_or("0");
        let package = packages.entry(package_id.to_string()).or_default();
        package.logical += 1;
        if let Some(core_id) = fields.get("core id") {
            package.core_ids.insert((*core_id).to_string());
        }
        if package.model_name.is_none() {
            package.model_name = fields
                .get("model name")
                .or_else(|| fields.get("Model"))
                .map(|s| (*s).to_string());
        }
    }

    packages
}

/// Parse `/proc/meminfo` into kilobyte values keyed by field name
fn parse_meminfo(content: &str) -> BTreeMap<String, u64> {
    content
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse::<u64>().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}

fn os_release_field(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"').to_string())
    })
}
