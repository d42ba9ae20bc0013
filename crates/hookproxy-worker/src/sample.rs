//! A small setuptools-shaped build backend.
//!
//! Reads `setup.json` from the current directory and implements the
//! standard build hooks. Wheels are zip archives and source distributions
//! are gzipped tarballs, both containing the project's top-level modules.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use hookproxy_core::{Backend, HookCall, HookFailure};
use serde::Deserialize;
use serde_json::Value;
use tar::Header;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Name the backend is registered under.
pub const NAME: &str = "sample.build_meta";

/// Project configuration file read from the working directory.
pub const SETUP_FILE: &str = "setup.json";

const WHEEL_TAG: &str = "py3-none-any";

type HookResult = Result<Value, HookFailure>;

#[derive(Debug, Deserialize)]
struct SetupConfig {
    name: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    py_modules: Vec<String>,
    #[serde(default)]
    setup_requires: Vec<String>,
    #[serde(default)]
    entry_points: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    zip_safe: bool,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl SetupConfig {
    fn load() -> Result<Self, HookFailure> {
        let contents = fs::read_to_string(SETUP_FILE).map_err(|e| {
            HookFailure::new("FileNotFoundError", format!("{}: {}", SETUP_FILE, e))
        })?;
        serde_json::from_str(&contents)
            .map_err(|e| HookFailure::new("ValueError", format!("invalid {}: {}", SETUP_FILE, e)))
    }

    /// Distribution name with the characters wheel filenames disallow replaced.
    fn distribution(&self) -> String {
        self.name.replace(['-', '.'], "_")
    }

    fn dist_info(&self) -> String {
        format!("{}-{}.dist-info", self.distribution(), self.version)
    }

    fn metadata(&self) -> String {
        format!(
            "Metadata-Version: 2.1\nName: {}\nVersion: {}\n",
            self.name, self.version
        )
    }

    fn wheel_file(&self) -> String {
        format!(
            "Wheel-Version: 1.0\nGenerator: {} ({})\nRoot-Is-Purelib: true\nTag: {}\n",
            NAME,
            env!("CARGO_PKG_VERSION"),
            WHEEL_TAG
        )
    }

    fn entry_points_file(&self) -> Option<String> {
        if self.entry_points.is_empty() {
            return None;
        }
        let mut out = String::new();
        for (group, entries) in &self.entry_points {
            out.push_str(&format!("[{}]\n", group));
            for entry in entries {
                out.push_str(entry);
                out.push('\n');
            }
            out.push('\n');
        }
        Some(out)
    }

    /// The `.dist-info` files, in archive order.
    fn dist_info_files(&self) -> Vec<(&'static str, String)> {
        let mut files = vec![("METADATA", self.metadata()), ("WHEEL", self.wheel_file())];
        if let Some(entry_points) = self.entry_points_file() {
            files.push(("entry_points.txt", entry_points));
        }
        if !self.zip_safe {
            files.push(("not-zip-safe", "\n".to_string()));
        }
        files
    }

    /// Read the declared top-level modules from the project directory.
    fn module_sources(&self) -> Result<Vec<(String, Vec<u8>)>, HookFailure> {
        self.py_modules
            .iter()
            .map(|module| {
                let path = format!("{}.py", module);
                fs::read(&path)
                    .map(|bytes| (path.clone(), bytes))
                    .map_err(|e| HookFailure::new("FileNotFoundError", format!("{}: {}", path, e)))
            })
            .collect()
    }
}

/// Build the backend.
pub fn backend() -> Backend {
    Backend::new(NAME)
        .hook("get_requires_for_build_wheel", get_requires_for_build_wheel)
        .hook("get_requires_for_build_sdist", get_requires_for_build_sdist)
        .hook(
            "prepare_metadata_for_build_wheel",
            prepare_metadata_for_build_wheel,
        )
        .hook("build_wheel", build_wheel)
        .hook("build_sdist", build_sdist)
}

fn requirements(config: &SetupConfig, build: &[&str]) -> Value {
    let mut requires = config.setup_requires.clone();
    requires.extend(build.iter().map(|r| r.to_string()));
    Value::from(requires)
}

fn get_requires_for_build_wheel(call: &HookCall<'_>) -> HookResult {
    let _config_settings: Option<Value> = call.optional_arg(0, "config_settings")?;
    let config = SetupConfig::load()?;
    Ok(requirements(&config, &["setuptools", "wheel"]))
}

fn get_requires_for_build_sdist(call: &HookCall<'_>) -> HookResult {
    let _config_settings: Option<Value> = call.optional_arg(0, "config_settings")?;
    let config = SetupConfig::load()?;
    Ok(requirements(&config, &["setuptools"]))
}

fn prepare_metadata_for_build_wheel(call: &HookCall<'_>) -> HookResult {
    let metadata_directory: PathBuf = call.arg(0, "metadata_directory")?;
    let _config_settings: Option<Value> = call.optional_arg(1, "config_settings")?;
    let config = SetupConfig::load()?;

    let dist_info = config.dist_info();
    let target = metadata_directory.join(&dist_info);
    fs::create_dir_all(&target)?;
    for (name, contents) in config.dist_info_files() {
        fs::write(target.join(name), contents)?;
    }

    tracing::debug!("Prepared metadata in {}", target.display());
    Ok(Value::from(dist_info))
}

fn build_wheel(call: &HookCall<'_>) -> HookResult {
    let wheel_directory: PathBuf = call.arg(0, "wheel_directory")?;
    let _config_settings: Option<Value> = call.optional_arg(1, "config_settings")?;
    let metadata_directory: Option<PathBuf> = call.optional_arg(2, "metadata_directory")?;
    let config = SetupConfig::load()?;

    let dist_info = config.dist_info();
    let dist_info_files = match &metadata_directory {
        Some(dir) => read_prepared_metadata(dir)?,
        None => config
            .dist_info_files()
            .into_iter()
            .map(|(name, contents)| (name.to_string(), contents.into_bytes()))
            .collect(),
    };

    let filename = format!("{}-{}-{}.whl", config.distribution(), config.version, WHEEL_TAG);
    let file = File::create(wheel_directory.join(&filename))?;
    let mut zip = ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut record = Vec::new();
    for (path, bytes) in config.module_sources()? {
        zip.start_file(path.as_str(), options)?;
        zip.write_all(&bytes)?;
        record.push(path);
    }
    for (name, bytes) in dist_info_files {
        let path = format!("{}/{}", dist_info, name);
        zip.start_file(path.as_str(), options)?;
        zip.write_all(&bytes)?;
        record.push(path);
    }

    let record_path = format!("{}/RECORD", dist_info);
    record.push(record_path.clone());
    let record_contents: String = record.iter().map(|path| format!("{},,\n", path)).collect();
    zip.start_file(record_path.as_str(), options)?;
    zip.write_all(record_contents.as_bytes())?;
    zip.finish()?;

    tracing::debug!("Built wheel {}", filename);
    Ok(Value::from(filename))
}

/// Files of an already prepared `.dist-info` directory.
fn read_prepared_metadata(dir: &Path) -> Result<Vec<(String, Vec<u8>)>, HookFailure> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push((name, fs::read(entry.path())?));
        }
    }
    files.sort();
    Ok(files)
}

fn build_sdist(call: &HookCall<'_>) -> HookResult {
    let sdist_directory: PathBuf = call.arg(0, "sdist_directory")?;
    let _config_settings: Option<Value> = call.optional_arg(1, "config_settings")?;
    let config = SetupConfig::load()?;

    let top_level = format!("{}-{}", config.name, config.version);
    let filename = format!("{}.tar.gz", top_level);

    let file = File::create(sdist_directory.join(&filename))?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let mut entries = vec![
        (SETUP_FILE.to_string(), fs::read(SETUP_FILE)?),
        ("PKG-INFO".to_string(), config.metadata().into_bytes()),
    ];
    entries.extend(config.module_sources()?);

    for (path, bytes) in entries {
        let mut header = Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        tar.append_data(
            &mut header,
            format!("{}/{}", top_level, path),
            Cursor::new(bytes),
        )?;
    }
    tar.into_inner()?.finish()?;

    tracing::debug!("Built sdist {}", filename);
    Ok(Value::from(filename))
}
