//! Configuration for the indicator-of-compromise check.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Files matching a pattern under a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePattern {
    /// Directory to list.
    pub directory: String,
    /// File name pattern, e.g. `*.exe`.
    pub pattern: String,
    /// Recursion depth.
    pub depth: u32,
}

impl FilePattern {
    /// Creates a new file pattern.
    pub fn new(directory: impl Into<String>, pattern: impl Into<String>, depth: u32) -> Self {
        Self {
            directory: directory.into(),
            pattern: pattern.into(),
            depth,
        }
    }
}

/// Files matching a pattern whose SHA-256 equals a known hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashSearch {
    /// Where to search.
    pub files: FilePattern,
    /// Hex-encoded SHA-256 to look for.
    pub sha256: String,
}

/// A named value under a registry key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryValueQuery {
    /// Registry key to list.
    pub key: String,
    /// Value name, matched case-insensitively.
    pub value: String,
}

/// A YARA signature applied to files matching a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YaraFileScan {
    /// Compiled or source signature file read on the local host.
    pub signature: PathBuf,
    /// Files to scan.
    pub files: FilePattern,
}

/// A YARA signature applied to processes matching a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YaraProcessScan {
    /// Signature file read on the local host.
    pub signature: PathBuf,
    /// Process name pattern.
    pub process_pattern: String,
}

/// Everything an [`IocCheck`](crate::checks::IocCheck) looks for on a sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IocCheckConfig {
    /// Exact file paths.
    #[serde(default)]
    pub files: Vec<String>,

    /// Directory listings.
    #[serde(default)]
    pub file_patterns: Vec<FilePattern>,

    /// Hash searches.
    #[serde(default)]
    pub file_hashes: Vec<FileHashSearch>,

    /// Registry keys that must not exist.
    #[serde(default)]
    pub registry_keys: Vec<String>,

    /// Registry values that must not exist.
    #[serde(default)]
    pub registry_values: Vec<RegistryValueQuery>,

    /// Signatures scanned against the whole system.
    #[serde(default)]
    pub yara_system: Vec<PathBuf>,

    /// Signatures scanned against files.
    #[serde(default)]
    pub yara_files: Vec<YaraFileScan>,

    /// Signatures scanned against processes.
    #[serde(default)]
    pub yara_processes: Vec<YaraProcessScan>,

    /// Timeout for single-response lookups.
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,

    /// Timeout for hash searches and between YARA scan events.
    #[serde(default = "default_long_timeout", with = "duration_secs")]
    pub long_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_long_timeout() -> Duration {
    Duration::from_secs(3600)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl Default for IocCheckConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            file_patterns: Vec::new(),
            file_hashes: Vec::new(),
            registry_keys: Vec::new(),
            registry_values: Vec::new(),
            yara_system: Vec::new(),
            yara_files: Vec::new(),
            yara_processes: Vec::new(),
            request_timeout: default_request_timeout(),
            long_timeout: default_long_timeout(),
        }
    }
}

impl IocCheckConfig {
    /// Creates an empty configuration with default timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks for an exact file path.
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Lists files matching a pattern.
    pub fn with_file_pattern(
        mut self,
        directory: impl Into<String>,
        pattern: impl Into<String>,
        depth: u32,
    ) -> Self {
        self.file_patterns.push(FilePattern::new(directory, pattern, depth));
        self
    }

    /// Searches for files with a given SHA-256.
    pub fn with_file_hash(
        mut self,
        directory: impl Into<String>,
        pattern: impl Into<String>,
        depth: u32,
        sha256: impl Into<String>,
    ) -> Self {
        self.file_hashes.push(FileHashSearch {
            files: FilePattern::new(directory, pattern, depth),
            sha256: sha256.into(),
        });
        self
    }

    /// Looks for a registry key.
    pub fn with_registry_key(mut self, key: impl Into<String>) -> Self {
        self.registry_keys.push(key.into());
        self
    }

    /// Looks for a named value under a registry key.
    pub fn with_registry_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.registry_values.push(RegistryValueQuery {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Scans the whole system with a signature file.
    pub fn with_yara_system(mut self, signature: impl Into<PathBuf>) -> Self {
        self.yara_system.push(signature.into());
        self
    }

    /// Scans files matching a pattern with a signature file.
    pub fn with_yara_files(mut self, signature: impl Into<PathBuf>, files: FilePattern) -> Self {
        self.yara_files.push(YaraFileScan {
            signature: signature.into(),
            files,
        });
        self
    }

    /// Scans processes matching a pattern with a signature file.
    pub fn with_yara_processes(
        mut self,
        signature: impl Into<PathBuf>,
        process_pattern: impl Into<String>,
    ) -> Self {
        self.yara_processes.push(YaraProcessScan {
            signature: signature.into(),
            process_pattern: process_pattern.into(),
        });
        self
    }

    /// Sets the timeout for single-response lookups.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the timeout for hash searches and YARA scans.
    pub fn with_long_timeout(mut self, timeout: Duration) -> Self {
        self.long_timeout = timeout;
        self
    }

    /// Returns `true` if no lookup is configured.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.file_patterns.is_empty()
            && self.file_hashes.is_empty()
            && self.registry_keys.is_empty()
            && self.registry_values.is_empty()
            && self.yara_system.is_empty()
            && self.yara_files.is_empty()
            && self.yara_processes.is_empty()
    }
}
