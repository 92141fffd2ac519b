//! Ready-made checks.
//!
//! [`IocCheck`] looks for indicators of compromise on a sensor: files,
//! file hashes, registry keys and values, and YARA signature matches.
//! Every finding is delivered to a [`HitSink`] as a [`HitRecord`].

mod config;
mod hit;
mod ioc;

pub use config::{
    FileHashSearch, FilePattern, IocCheckConfig, RegistryValueQuery, YaraFileScan,
    YaraProcessScan,
};
pub use hit::{CollectingSink, Hit, HitRecord, HitSink};
pub use ioc::{escape_path, IocCheck};
