//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and shared fixtures.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG` and writes through the test writer so output is
    /// captured per test.
    ///
    /// For automatic initialization in a test module:
    /// ```rust
    /// #[cfg(feature = "test-logging")]
    /// #[ctor::ctor]
    /// fn init_test_logging() {
    ///     crate::test_utils::logging::init();
    /// }
    /// ```
    ///
    /// ```bash
    /// RUST_LOG=hwinventory::provider=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok();
        });
    }
}

/// Fake host trees for the sysfs backend
#[cfg(test)]
pub mod host {
    use std::fs;
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    /// One package, two cores, four hardware threads
    pub const CPUINFO: &str = "processor\t: 0\nphysical id\t: 0\ncore id\t: 0\nmodel name\t: Test CPU @ 3.00GHz\n\n\
processor\t: 1\nphysical id\t: 0\ncore id\t: 0\nmodel name\t: Test CPU @ 3.00GHz\n\n\
processor\t: 2\nphysical id\t: 0\ncore id\t: 1\nmodel name\t: Test CPU @ 3.00GHz\n\n\
processor\t: 3\nphysical id\t: 0\ncore id\t: 1\nmodel name\t: Test CPU @ 3.00GHz\n";

    pub const MEMINFO: &str =
        "MemTotal:       16384000 kB\nMemFree:         1000000 kB\nMemAvailable:    8000000 kB\n";

    pub fn write_file(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Root with procfs, DMI board data and os-release
    pub fn fake_host() -> TempDir {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "proc/cpuinfo", CPUINFO);
        write_file(dir.path(), "proc/meminfo", MEMINFO);
        write_file(dir.path(), "proc/sys/kernel/hostname", "ws-01\n");
        write_file(dir.path(), "proc/sys/kernel/osrelease", "6.1.0-test\n");
        write_file(dir.path(), "etc/os-release", "NAME=Test\nPRETTY_NAME=\"Test Linux 1\"\n");
        write_file(dir.path(), "sys/class/dmi/id/board_serial", "ABC123\n");
        write_file(dir.path(), "sys/class/dmi/id/board_vendor", "ACME\n");
        dir
    }
}
