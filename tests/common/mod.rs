/*
 *  tests/common/mod.rs
 *
 *  Shared helpers for the fixture extension tests
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 */

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use pgext::InstallLayout;
use pgext::loader::library_suffix;
use tempfile::TempDir;

/// Serializes tests that read the process-wide report history
static REPORTS: Mutex<()> = Mutex::new(());

pub fn serialize_reports() -> MutexGuard<'static, ()> {
    REPORTS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build file name of a workspace cdylib
pub fn artifact_file_name(crate_name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.dll", crate_name)
    } else if cfg!(target_os = "macos") {
        format!("lib{}.dylib", crate_name)
    } else {
        format!("lib{}.so", crate_name)
    }
}

/// Directory a cdylib build for this test run lands in (`target/<profile>`)
fn profile_dir() -> PathBuf {
    let exe = std::env::current_exe().expect("test binary path");
    let deps = exe.parent().expect("test binary directory");
    deps.parent().unwrap_or(deps).to_path_buf()
}

/// Finds a cdylib next to the test binary (`target/<profile>/deps`) or one
/// directory up (`target/<profile>`)
pub fn artifact(crate_name: &str) -> Option<PathBuf> {
    let profile = profile_dir();
    let file_name = artifact_file_name(crate_name);
    [profile.join("deps"), profile]
        .into_iter()
        .map(|dir| dir.join(&file_name))
        .find(|p| p.is_file())
}

static CDYLIBS: OnceLock<(PathBuf, PathBuf)> = OnceLock::new();

/// Builds the runtime and fixture cdylibs into this run's profile directory,
/// once per test binary. `cargo test` does not build cdylib-only members.
pub fn built_cdylibs() -> &'static (PathBuf, PathBuf) {
    CDYLIBS.get_or_init(|| {
        let profile = profile_dir();
        let target_dir = profile.parent().expect("target directory");

        let mut build = Command::new(env!("CARGO"));
        build
            .current_dir(env!("CARGO_MANIFEST_DIR"))
            .args(["build", "-p", "pgext-runtime", "-p", "pgext-fixture"])
            .arg("--target-dir")
            .arg(target_dir);
        if profile.file_name().is_some_and(|name| name == "release") {
            build.arg("--release");
        }
        let status = build.status().expect("running cargo build");
        assert!(status.success(), "building the runtime and fixture cdylibs failed");

        let runtime = artifact("pgext_runtime")
            .unwrap_or_else(|| panic!("{} missing from {}", artifact_file_name("pgext_runtime"), profile.display()));
        let fixture = artifact("pgext_fixture")
            .unwrap_or_else(|| panic!("{} missing from {}", artifact_file_name("pgext_fixture"), profile.display()));
        (runtime, fixture)
    })
}

/// The built companion runtime
pub fn runtime_library() -> PathBuf {
    built_cdylibs().0.clone()
}

/// An installation tree holding only the fixture extension
pub struct FixtureInstall {
    pub root: TempDir,
    pub layout: InstallLayout,
    pub library: PathBuf,
}

/// Lays out `share/extension` and `lib` for the fixture extension, building
/// the cdylibs first when needed
pub fn fixture_install() -> FixtureInstall {
    let (_, fixture) = built_cdylibs();

    let root = tempfile::tempdir().unwrap();
    let layout = InstallLayout::from_root(root.path());
    fs::create_dir_all(&layout.share_extension_dir).unwrap();
    fs::create_dir_all(&layout.lib_dir).unwrap();

    let sql_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("drivers/pgext-fixture/sql");
    for entry in fs::read_dir(&sql_dir).unwrap() {
        let entry = entry.unwrap();
        fs::copy(entry.path(), layout.share_extension_dir.join(entry.file_name())).unwrap();
    }

    let library = layout.lib_dir.join(format!("pgext_fixture.{}", library_suffix()));
    fs::copy(fixture, &library).unwrap();

    FixtureInstall { root, layout, library }
}
