//! Build hooks of the sample backend, called through the proxy.

mod support;

use std::fs::{self, File};
use std::io::Read;

use flate2::read::GzDecoder;
use hookproxy_core::Error;
use serde_json::{Map, Value, json};

use support::{SAMPLE_BACKEND, build_files, proxy, sample_project};

fn path_arg(path: &std::path::Path) -> Value {
    Value::from(path.to_string_lossy().into_owned())
}

#[test]
fn test_get_requires_for_build_wheel() {
    let project = sample_project();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let mut requires: Vec<String> = backend
        .call_as("get_requires_for_build_wheel", vec![], Map::new())
        .unwrap();
    requires.sort();

    assert_eq!(requires, vec!["setuptools", "six", "wheel"]);
}

#[test]
fn test_get_requires_for_build_sdist() {
    let project = sample_project();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let mut requires: Vec<String> = backend
        .call_as("get_requires_for_build_sdist", vec![Value::Null], Map::new())
        .unwrap();
    requires.sort();

    assert_eq!(requires, vec!["setuptools", "six"]);
}

#[test]
fn test_build_wheel() {
    let project = sample_project();
    let dist_dir = project.path().join("pip-wheel");
    fs::create_dir_all(&dist_dir).unwrap();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let wheel_name: String = backend
        .call_as("build_wheel", vec![path_arg(&dist_dir)], Map::new())
        .unwrap();

    let wheel_path = dist_dir.join(&wheel_name);
    assert!(wheel_path.is_file());
    assert_eq!(wheel_name, "foo-0.0.0-py3-none-any.whl");

    let mut archive = zip::ZipArchive::new(File::open(&wheel_path).unwrap()).unwrap();
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    assert!(names.contains(&"hello.py".to_string()));
    assert!(names.contains(&"foo-0.0.0.dist-info/METADATA".to_string()));
    assert!(names.contains(&"foo-0.0.0.dist-info/entry_points.txt".to_string()));
    assert!(names.contains(&"foo-0.0.0.dist-info/RECORD".to_string()));

    let mut module = String::new();
    archive
        .by_name("hello.py")
        .unwrap()
        .read_to_string(&mut module)
        .unwrap();
    assert_eq!(module, support::HELLO_PY);
}

#[test]
fn test_build_wheel_with_keyword_arguments() {
    let project = sample_project();
    let dist_dir = project.path().join("kw-wheel");
    fs::create_dir_all(&dist_dir).unwrap();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let mut kwargs = Map::new();
    kwargs.insert("wheel_directory".to_string(), path_arg(&dist_dir));
    kwargs.insert("config_settings".to_string(), json!({}));

    let wheel_name: String = backend.call_as("build_wheel", vec![], kwargs).unwrap();
    assert!(dist_dir.join(wheel_name).is_file());
}

#[test]
fn test_build_sdist() {
    let project = sample_project();
    let dist_dir = project.path().join("pip-sdist");
    fs::create_dir_all(&dist_dir).unwrap();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let sdist_name: String = backend
        .call_as("build_sdist", vec![path_arg(&dist_dir)], Map::new())
        .unwrap();

    let sdist_path = dist_dir.join(&sdist_name);
    assert!(sdist_path.is_file());
    assert_eq!(sdist_name, "foo-0.0.0.tar.gz");

    let mut archive = tar::Archive::new(GzDecoder::new(File::open(&sdist_path).unwrap()));
    let mut entries: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    entries.sort();

    assert_eq!(
        entries,
        vec![
            "foo-0.0.0/PKG-INFO",
            "foo-0.0.0/hello.py",
            "foo-0.0.0/setup.json",
        ]
    );
}

#[test]
fn test_prepare_metadata_for_build_wheel() {
    let project = sample_project();
    let dist_dir = project.path().join("pip-dist-info");
    fs::create_dir_all(&dist_dir).unwrap();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let dist_info: String = backend
        .call_as(
            "prepare_metadata_for_build_wheel",
            vec![path_arg(&dist_dir)],
            Map::new(),
        )
        .unwrap();

    let metadata = dist_dir.join(&dist_info).join("METADATA");
    assert!(metadata.is_file());
    let contents = fs::read_to_string(metadata).unwrap();
    assert!(contents.contains("Name: foo"));
    assert!(contents.contains("Version: 0.0.0"));
}

#[test]
fn test_build_wheel_reuses_prepared_metadata() {
    let project = sample_project();
    let metadata_dir = project.path().join("metadata");
    let dist_dir = project.path().join("dist");
    fs::create_dir_all(&metadata_dir).unwrap();
    fs::create_dir_all(&dist_dir).unwrap();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let dist_info: String = backend
        .call_as(
            "prepare_metadata_for_build_wheel",
            vec![path_arg(&metadata_dir)],
            Map::new(),
        )
        .unwrap();

    // Anything already in the prepared directory ends up in the wheel.
    let prepared = metadata_dir.join(&dist_info);
    fs::write(prepared.join("INSTALLER"), "hookproxy\n").unwrap();

    let wheel_name: String = backend
        .call_as(
            "build_wheel",
            vec![path_arg(&dist_dir), Value::Null, path_arg(&prepared)],
            Map::new(),
        )
        .unwrap();

    let mut archive = zip::ZipArchive::new(File::open(dist_dir.join(wheel_name)).unwrap()).unwrap();
    let mut installer = String::new();
    archive
        .by_name(&format!("{}/INSTALLER", dist_info))
        .unwrap()
        .read_to_string(&mut installer)
        .unwrap();
    assert_eq!(installer, "hookproxy\n");
}

#[test]
fn test_missing_module_is_hook_failure() {
    let project = tempfile::TempDir::new().unwrap();
    build_files(
        project.path(),
        &[("setup.json", r#"{"name": "bar", "py_modules": ["missing"]}"#)],
    )
    .unwrap();
    let dist_dir = project.path().join("dist");
    fs::create_dir_all(&dist_dir).unwrap();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let err = backend
        .call("build_wheel", vec![path_arg(&dist_dir)], Map::new())
        .unwrap_err();

    match err {
        Error::HookExecution { hook, failure } => {
            assert_eq!(hook, "build_wheel");
            assert_eq!(failure.kind, "FileNotFoundError");
            assert!(failure.message.contains("missing.py"));
        }
        other => panic!("Expected a hook failure, got: {:?}", other),
    }
}

#[test]
fn test_missing_required_argument_is_type_error() {
    let project = sample_project();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let err = backend.call("build_sdist", vec![], Map::new()).unwrap_err();
    let failure = err.hook_failure().expect("hook-level failure");
    assert_eq!(failure.kind, "TypeError");
    assert!(failure.message.contains("sdist_directory"));
}

#[test]
fn test_project_without_setup_file() {
    let project = tempfile::TempDir::new().unwrap();
    let backend = proxy(project.path(), SAMPLE_BACKEND);

    let err = backend
        .call("get_requires_for_build_wheel", vec![], Map::new())
        .unwrap_err();
    assert_eq!(
        err.hook_failure().map(|f| f.kind.as_str()),
        Some("FileNotFoundError")
    );
}

#[cfg(target_os = "linux")]
#[test]
fn test_project_in_non_utf8_directory() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let root = tempfile::TempDir::new().unwrap();
    let project = root.path().join(OsStr::from_bytes(b"caf\xe9"));
    fs::create_dir(&project).unwrap();
    build_files(
        &project,
        &[("setup.json", support::SETUP_JSON), ("hello.py", support::HELLO_PY)],
    )
    .unwrap();
    let backend = proxy(&project, SAMPLE_BACKEND);

    let mut requires: Vec<String> = backend
        .call_as("get_requires_for_build_wheel", vec![], Map::new())
        .unwrap();
    requires.sort();

    assert_eq!(requires, vec!["setuptools", "six", "wheel"]);
}
