//! The generic indicator-of-compromise check.

use crate::audit;
use crate::checks::config::{FilePattern, IocCheckConfig};
use crate::checks::hit::{Hit, HitRecord, HitSink};
use crate::core::{ArcSensor, CheckError, SensorResponse};
use crate::scheduler::Check;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Looks for the configured files, registry entries and YARA matches on a
/// sensor and reports every hit to a [`HitSink`].
///
/// A sensor is done once every lookup has completed, whether or not anything
/// was found. A lookup that gets no answer in time fails the whole check.
pub struct IocCheck {
    config: IocCheckConfig,
    /// Base64-encoded signature file contents, keyed by path.
    signatures: HashMap<PathBuf, String>,
    sink: Arc<dyn HitSink>,
}

impl IocCheck {
    /// Validates the configuration and loads every signature file.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if a hash is not a valid SHA-256.
    /// - `Io` if a signature file cannot be read.
    pub fn new(config: IocCheckConfig, sink: Arc<dyn HitSink>) -> Result<Self, CheckError> {
        for search in &config.file_hashes {
            validate_sha256(&search.sha256)?;
        }

        let mut signatures = HashMap::new();
        let paths = config
            .yara_system
            .iter()
            .chain(config.yara_files.iter().map(|scan| &scan.signature))
            .chain(config.yara_processes.iter().map(|scan| &scan.signature));
        for path in paths {
            if !signatures.contains_key(path) {
                signatures.insert(path.clone(), load_signature(path)?);
            }
        }

        tracing::debug!(
            signatures = signatures.len(),
            files = config.files.len(),
            registry_keys = config.registry_keys.len(),
            "IOC check ready"
        );

        Ok(Self {
            config,
            signatures,
            sink,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &IocCheckConfig {
        &self.config
    }

    fn report(&self, sensor: &ArcSensor, hit: Hit) {
        let record = HitRecord::new(sensor, hit);
        audit::emit_hit_detected(&record);
        self.sink.report(&record);
    }

    fn signature(&self, path: &Path) -> Result<&str, CheckError> {
        self.signatures
            .get(path)
            .map(String::as_str)
            .ok_or_else(|| CheckError::invalid_argument(format!("signature {} not loaded", path.display())))
    }

    async fn simple(
        &self,
        sensor: &ArcSensor,
        command: &str,
        timeout: Duration,
    ) -> Result<SensorResponse, CheckError> {
        tracing::trace!(sensor_id = %sensor.id(), command = %verb(command), "Issuing task");
        sensor
            .simple_request(command, timeout)
            .await?
            .ok_or_else(|| CheckError::timeout(command))
    }

    async fn list_directory(
        &self,
        sensor: &ArcSensor,
        files: &FilePattern,
    ) -> Result<Vec<Value>, CheckError> {
        let command = format!(
            "dir_list \"{}\" \"{}\" -d {}",
            escape_path(&files.directory),
            files.pattern,
            files.depth
        );
        let response = self
            .simple(sensor, &command, self.config.request_timeout)
            .await?;
        directory_list(&response, &command)
    }

    async fn check_files(&self, sensor: &ArcSensor) -> Result<(), CheckError> {
        for file in &self.config.files {
            let path = escape_path(file);
            let info = self
                .simple(sensor, &format!("file_info \"{path}\""), self.config.request_timeout)
                .await?;
            if !info.is_success() {
                continue;
            }

            let hash = self
                .simple(sensor, &format!("file_hash \"{path}\""), self.config.request_timeout)
                .await?;
            let file_hash = hash.is_success().then_some(hash.event);

            self.report(
                sensor,
                Hit::File {
                    file_info: info.event,
                    file_hash,
                },
            );
        }

        for files in &self.config.file_patterns {
            for entry in self.list_directory(sensor, files).await? {
                self.report(
                    sensor,
                    Hit::File {
                        file_info: entry,
                        file_hash: None,
                    },
                );
            }
        }

        for search in &self.config.file_hashes {
            let command = format!(
                "dir_find_hash \"{}\" \"{}\" -d {} --hash {}",
                escape_path(&search.files.directory),
                search.files.pattern,
                search.files.depth,
                search.sha256
            );
            let response = self
                .simple(sensor, &command, self.config.long_timeout)
                .await?;
            for entry in directory_list(&response, &command)? {
                self.report(sensor, Hit::FileHash { file_hash: entry });
            }
        }

        Ok(())
    }

    async fn check_registry(&self, sensor: &ArcSensor) -> Result<(), CheckError> {
        for key in &self.config.registry_keys {
            let command = format!("reg_list \"{}\"", escape_path(key));
            let response = self
                .simple(sensor, &command, self.config.request_timeout)
                .await?;
            if !response.is_success() {
                continue;
            }
            self.report(sensor, Hit::RegistryKey { reg_key: response.event });
        }

        for query in &self.config.registry_values {
            let command = format!("reg_list \"{}\"", escape_path(&query.key));
            let response = self
                .simple(sensor, &command, self.config.request_timeout)
                .await?;
            if !response.is_success() {
                continue;
            }

            let values = response
                .list("REGISTRY_VALUE")
                .ok_or_else(|| CheckError::malformed(&command, "REGISTRY_VALUE"))?;
            let wanted = query.value.to_lowercase();
            let matches: Vec<Value> = values
                .iter()
                .filter(|entry| {
                    entry
                        .get("NAME")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_lowercase()
                        == wanted
                })
                .cloned()
                .collect();
            if matches.is_empty() {
                continue;
            }

            let root = response
                .field("ROOT")
                .cloned()
                .ok_or_else(|| CheckError::malformed(&command, "ROOT"))?;
            for reg_value in matches {
                self.report(
                    sensor,
                    Hit::RegistryValue {
                        reg_key: root.clone(),
                        reg_value,
                    },
                );
            }
        }

        Ok(())
    }

    async fn check_yara(&self, sensor: &ArcSensor) -> Result<(), CheckError> {
        for path in &self.config.yara_system {
            let command = format!("yara_scan {}", self.signature(path)?);
            self.drain_yara(sensor, &command).await?;
        }

        for scan in &self.config.yara_files {
            let signature = self.signature(&scan.signature)?;
            for entry in self.list_directory(sensor, &scan.files).await? {
                let Some(file_path) = entry.get("FILE_PATH").and_then(Value::as_str) else {
                    continue;
                };
                let command = format!("yara_scan {signature} -f \"{}\"", escape_path(file_path));
                self.drain_yara(sensor, &command).await?;
            }
        }

        for scan in &self.config.yara_processes {
            let command = format!(
                "yara_scan {} -e {}",
                self.signature(&scan.signature)?,
                escape_path(&scan.process_pattern)
            );
            self.drain_yara(sensor, &command).await?;
        }

        Ok(())
    }

    /// Reads scan events until the `done` marker, reporting every
    /// successful event as a match.
    async fn drain_yara(&self, sensor: &ArcSensor, command: &str) -> Result<(), CheckError> {
        tracing::trace!(sensor_id = %sensor.id(), "Starting YARA scan");
        let mut responses = sensor.request(command).await?;

        loop {
            let response = match tokio::time::timeout(self.config.long_timeout, responses.next()).await {
                Err(_) => return Err(CheckError::timeout(command)),
                Ok(None) => return Ok(()),
                Ok(Some(response)) => response,
            };

            if response.is_done_marker() {
                return Ok(());
            }
            if response.is_success() {
                self.report(sensor, Hit::Yara { yara: response.event });
            }
        }
    }
}

impl std::fmt::Debug for IocCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IocCheck")
            .field("config", &self.config)
            .field("signatures", &self.signatures.len())
            .finish()
    }
}

#[async_trait]
impl Check for IocCheck {
    async fn check(&self, sensor: &ArcSensor) -> Result<bool, CheckError> {
        self.check_files(sensor).await?;
        self.check_registry(sensor).await?;
        self.check_yara(sensor).await?;
        Ok(true)
    }
}

/// Doubles backslashes so a path survives the sensor's command parser.
pub fn escape_path(path: &str) -> String {
    path.replace('\\', "\\\\")
}

fn verb(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

fn directory_list(response: &SensorResponse, command: &str) -> Result<Vec<Value>, CheckError> {
    response
        .list("DIRECTORY_LIST")
        .cloned()
        .ok_or_else(|| CheckError::malformed(command, "DIRECTORY_LIST"))
}

fn validate_sha256(hash: &str) -> Result<(), CheckError> {
    if hash.len() != 64 {
        return Err(CheckError::invalid_argument(format!(
            "hash '{hash}' is not a valid sha256"
        )));
    }
    hex::decode(hash).map_err(|_| {
        CheckError::invalid_argument(format!("hash '{hash}' contains invalid characters"))
    })?;
    Ok(())
}

fn load_signature(path: &Path) -> Result<String, CheckError> {
    let bytes = std::fs::read(path)?;
    Ok(STANDARD.encode(bytes))
}
