/*
 *  extension.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Extension descriptor loader - control files, scripts and libraries
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! An installed extension is spread over two directories:
//!
//! - `<root>/share/extension/<name>.control` and `<name>--<version>.sql`,
//!   `<name>--<from>--<to>.sql` registration scripts
//! - `<root>/lib/<name>.<suffix>`, the compiled module
//!
//! The scripts tell us which C symbols the module must export: every
//! `CREATE FUNCTION ... LANGUAGE C` names one, either explicitly as the
//! second `AS` literal or implicitly through the SQL function name.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use log::{debug, info, warn};
use regex::Regex;

use crate::error::{ExtensionError, Result};
use crate::loader::{LoadOptions, LoadedLibrary};

/// Finds the start of the next `CREATE [OR REPLACE] FUNCTION`
static CREATE_FUNCTION_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)create\s+(?:or\s+replace\s+)?function").expect("valid CREATE FUNCTION pattern")
});

/// Captures the SQL name (1) and the explicit C symbol, written either
/// after (2) or before (3) the `LANGUAGE C` clause
static CREATE_FUNCTION_CAPTURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?is)create\s+(?:or\s+replace\s+)?function\s+(.*?)\s*\(.*?\)\s+(?:",
        r".*?language\s+(?:'c'|c\b).*?as\s+'.*?'\s*,\s*'(.*?)'.*?;",
        r"|.*?as\s+'.*?'\s*,\s*'(.*?)'.*?language\s+(?:'c'|c\b).*?;",
        r"|.*?language\s+(?:'c'|c\b).*?;)",
    ))
    .expect("valid CREATE FUNCTION capture pattern")
});

/// Where an installation keeps extension scripts and modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    pub share_extension_dir: PathBuf,
    pub lib_dir: PathBuf,
}

impl InstallLayout {
    pub fn new(share_extension_dir: impl Into<PathBuf>, lib_dir: impl Into<PathBuf>) -> Self {
        Self {
            share_extension_dir: share_extension_dir.into(),
            lib_dir: lib_dir.into(),
        }
    }

    /// Standard layout below an install root
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(root.join("share").join("extension"), root.join("lib"))
    }
}

/// Everything on disk that belongs to one extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFiles {
    pub name: String,
    pub control_file_name: String,
    /// Registration scripts in execution order
    pub sql_file_names: Vec<String>,
    pub library_file_name: Option<String>,
    pub control_file_dir: PathBuf,
    pub library_file_dir: PathBuf,
}

/// Discovers every extension of an installation, keyed by name.
///
/// A control file defines an extension; `<name>--*.sql` scripts and the
/// module whose file name starts with `<name>.` are attached to it.
pub fn load_extensions(layout: &InstallLayout) -> Result<BTreeMap<String, ExtensionFiles>> {
    let share_entries = list_files(&layout.share_extension_dir)?;
    let lib_entries = list_files(&layout.lib_dir)?;

    let mut extensions = BTreeMap::new();
    for file_name in &share_entries {
        if let Some(name) = file_name.strip_suffix(".control") {
            extensions.insert(name.to_string(), ExtensionFiles {
                name: name.to_string(),
                control_file_name: file_name.clone(),
                sql_file_names: Vec::new(),
                library_file_name: None,
                control_file_dir: layout.share_extension_dir.clone(),
                library_file_dir: layout.lib_dir.clone(),
            });
        }
    }

    for extension in extensions.values_mut() {
        let script_prefix = format!("{}--", extension.name);
        extension.sql_file_names = share_entries
            .iter()
            .filter(|f| f.starts_with(&script_prefix) && f.ends_with(".sql"))
            .cloned()
            .collect();

        let module_prefix = format!("{}.", extension.name);
        // Last match wins
        extension.library_file_name = lib_entries
            .iter()
            .filter(|f| f.starts_with(&module_prefix))
            .last()
            .cloned();

        order_sql_files(&extension.name, &mut extension.sql_file_names);
        debug!("Extension {}: scripts={:?} library={:?}",
            extension.name, extension.sql_file_names, extension.library_file_name);
    }

    info!("Found {} extensions in {}", extensions.len(), layout.share_extension_dir.display());
    Ok(extensions)
}

/// Sorts scripts by version pair and drops migrations that precede the
/// newest base script
pub fn order_sql_files(name: &str, sql_file_names: &mut Vec<String>) {
    sql_file_names.sort_by_key(|f| sql_file_versions(name, f));

    // Keep cutting at the first base script past the front until none is left
    loop {
        let Some(base) = sql_file_names
            .iter()
            .skip(1)
            .position(|f| f.matches("--").count() == 1)
        else {
            break;
        };
        sql_file_names.drain(..base + 1);
    }
}

/// Encodes the from and to versions of a script name as
/// `(major << 8) + minor`. Base scripts have `from == to`; a name that does
/// not parse encodes as `[0, 0]`.
pub fn sql_file_versions(name: &str, sql_file_name: &str) -> [u16; 2] {
    let Some(versions) = sql_file_name
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix("--"))
        .and_then(|rest| rest.strip_suffix(".sql"))
    else {
        return [0, 0];
    };

    let (from, to) = versions.split_once("--").unwrap_or((versions, versions));
    match (encode_version(from), encode_version(to)) {
        (Some(from), Some(to)) => [from, to],
        _ => [0, 0],
    }
}

fn encode_version(version: &str) -> Option<u16> {
    let (major, minor) = version.split_once('.')?;
    let major: i64 = major.parse().ok()?;
    let minor: i64 = minor.parse().ok()?;
    Some(((major as u16) << 8).wrapping_add(minor as u16))
}

impl ExtensionFiles {
    pub fn control_file_path(&self) -> PathBuf {
        self.control_file_dir.join(&self.control_file_name)
    }

    pub fn sql_file_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.sql_file_names.iter().map(|f| self.control_file_dir.join(f))
    }

    pub fn library_path(&self) -> Option<PathBuf> {
        self.library_file_name.as_ref().map(|f| self.library_file_dir.join(f))
    }

    /// Raw contents of the control file
    pub fn load_control(&self) -> Result<String> {
        let path = self.control_file_path();
        fs::read_to_string(&path).map_err(|e| ExtensionError::io(path, e))
    }

    /// Contents of every registration script, in execution order
    pub fn load_sql_files(&self) -> Result<Vec<String>> {
        self.sql_file_paths()
            .map(|path| fs::read_to_string(&path).map_err(|e| ExtensionError::io(path, e)))
            .collect()
    }

    /// Every C symbol the registration scripts declare, sorted and deduplicated
    pub fn load_sql_function_names(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for script in self.load_sql_files()? {
            names.extend(extract_c_function_names(&script));
        }
        debug!("Extension {} declares {} C functions", self.name, names.len());
        Ok(names.into_iter().collect())
    }

    /// Maps the module and resolves every declared C function
    pub fn load_library(&self, options: &LoadOptions) -> Result<LoadedLibrary> {
        let path = self
            .library_path()
            .ok_or_else(|| ExtensionError::NoLibraryReference(self.name.clone()))?;
        let function_names = self.load_sql_function_names()?;
        LoadedLibrary::load(path, &function_names, options)
    }
}

/// C symbols named by the `LANGUAGE C` functions of one script, in order of
/// appearance
///
/// Each statement is cut at its first `;` before matching, so one function's
/// clauses never leak into the next. Statements the pattern cannot match
/// (other languages, or text it cannot parse) are skipped.
pub fn extract_c_function_names(script: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut position = 0;

    while let Some(start) = CREATE_FUNCTION_START.find_at(script, position) {
        let statement_start = start.start();
        let Some(end) = script[statement_start..].find(';') else {
            break;
        };
        let statement = &script[statement_start..statement_start + end + 1];

        match CREATE_FUNCTION_CAPTURE.captures(statement) {
            Some(caps) => {
                let symbol = [2, 3, 1]
                    .into_iter()
                    .filter_map(|i| caps.get(i))
                    .map(|m| m.as_str())
                    .find(|s| !s.is_empty());
                if let Some(symbol) = symbol {
                    names.push(symbol.to_string());
                }
            }
            None => debug!("Skipping non-C function: {}", first_line(statement)),
        }

        // Step past this keyword so the next search finds the next statement
        position = start.end();
    }

    names
}

fn first_line(statement: &str) -> &str {
    statement.lines().next().unwrap_or(statement)
}

/// Regular file names in `dir`, sorted
fn list_files(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| ExtensionError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ExtensionError::io(dir, e))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => warn!("Ignoring non UTF-8 file name {:?} in {}", name, dir.display()),
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn install_tree(share: &[(&str, &str)], lib: &[&str]) -> (TempDir, InstallLayout) {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::from_root(dir.path());
        fs::create_dir_all(&layout.share_extension_dir).unwrap();
        fs::create_dir_all(&layout.lib_dir).unwrap();
        for (name, contents) in share {
            fs::write(layout.share_extension_dir.join(name), contents).unwrap();
        }
        for name in lib {
            fs::write(layout.lib_dir.join(name), b"").unwrap();
        }
        (dir, layout)
    }

    fn names(files: &[&str]) -> Vec<String> {
        files.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_sql_file_versions() {
        assert_eq!(sql_file_versions("ext", "ext--1.0.sql"), [0x100, 0x100]);
        assert_eq!(sql_file_versions("ext", "ext--1.0--1.1.sql"), [0x100, 0x101]);
        assert_eq!(sql_file_versions("uuid-ossp", "uuid-ossp--1.1--1.2.sql"), [0x101, 0x102]);
        assert_eq!(sql_file_versions("ext", "ext--2.13.sql"), [0x20d, 0x20d]);
    }

    #[test]
    fn test_malformed_versions_encode_zero() {
        assert_eq!(sql_file_versions("ext", "ext--1.sql"), [0, 0]);
        assert_eq!(sql_file_versions("ext", "ext--1.0.txt"), [0, 0]);
        assert_eq!(sql_file_versions("ext", "ext--a.b.sql"), [0, 0]);
        assert_eq!(sql_file_versions("ext", "other--1.0.sql"), [0, 0]);
        assert_eq!(sql_file_versions("ext", "ext--1.0--x.sql"), [0, 0]);
    }

    #[test]
    fn test_ordering_by_version_pair() {
        let mut files = names(&["ext--1.0--1.1.sql", "ext--1.1--2.0.sql", "ext--1.0.sql"]);
        order_sql_files("ext", &mut files);
        assert_eq!(files, names(&["ext--1.0.sql", "ext--1.0--1.1.sql", "ext--1.1--2.0.sql"]));
    }

    #[test]
    fn test_leading_migrations_are_pruned() {
        let mut files = names(&["ext--1.0--1.1.sql", "ext--1.0.sql", "ext--0.9--1.0.sql"]);
        order_sql_files("ext", &mut files);
        assert_eq!(files, names(&["ext--1.0.sql", "ext--1.0--1.1.sql"]));
    }

    #[test]
    fn test_pruning_repeats_to_newest_base() {
        let mut files = names(&[
            "ext--1.0.sql",
            "ext--1.0--1.1.sql",
            "ext--1.1.sql",
            "ext--1.1--1.2.sql",
        ]);
        order_sql_files("ext", &mut files);
        assert_eq!(files, names(&["ext--1.1.sql", "ext--1.1--1.2.sql"]));
    }

    #[test]
    fn test_explicit_symbol_wins() {
        let script = "CREATE FUNCTION foo(int) RETURNS int LANGUAGE C AS '$libdir/ext', 'c_foo';";
        assert_eq!(extract_c_function_names(script), vec!["c_foo"]);

        let script = "CREATE FUNCTION uuid_nil()\nRETURNS uuid\nAS 'MODULE_PATHNAME', 'uuid_nil_impl'\nIMMUTABLE STRICT LANGUAGE C PARALLEL SAFE;";
        assert_eq!(extract_c_function_names(script), vec!["uuid_nil_impl"]);
    }

    #[test]
    fn test_default_symbol_is_sql_name() {
        let script = "create or replace function foo(text) returns text as '$libdir/ext' language c strict;";
        assert_eq!(extract_c_function_names(script), vec!["foo"]);
    }

    #[test]
    fn test_other_languages_skipped() {
        let script = "\
            CREATE FUNCTION plain() RETURNS int AS $$ SELECT 1 $$ LANGUAGE sql;\n\
            CREATE FUNCTION cfunc() RETURNS int AS 'MODULE_PATHNAME' LANGUAGE C;\n\
            CREATE FUNCTION notc() RETURNS int LANGUAGE plpgsql AS $$ BEGIN RETURN 1 END $$;\n";
        assert_eq!(extract_c_function_names(script), vec!["cfunc"]);
    }

    #[test]
    fn test_unterminated_statement_stops_scan() {
        let script = "CREATE FUNCTION a() RETURNS int AS 'm' LANGUAGE C;\nCREATE FUNCTION b() RETURNS int";
        assert_eq!(extract_c_function_names(script), vec!["a"]);
    }

    #[test]
    fn test_load_extensions_associates_files() {
        let (_dir, layout) = install_tree(
            &[
                ("ext.control", "default_version = '1.1'\n"),
                ("ext--1.0.sql", "CREATE FUNCTION foo(int) RETURNS int AS 'MODULE_PATHNAME', 'c_foo' LANGUAGE C;"),
                ("ext--1.0--1.1.sql", "CREATE OR REPLACE FUNCTION foo(int) RETURNS int AS 'MODULE_PATHNAME', 'c_foo' LANGUAGE C;\nCREATE FUNCTION bar() RETURNS int AS 'MODULE_PATHNAME' LANGUAGE C;"),
                ("ext--0.9--1.0.sql", "CREATE FUNCTION old() RETURNS int AS 'MODULE_PATHNAME' LANGUAGE C;"),
                ("nolib.control", ""),
                ("README", ""),
            ],
            &["ext.so", "other.so"],
        );

        let extensions = load_extensions(&layout).unwrap();
        assert_eq!(extensions.len(), 2);

        let ext = &extensions["ext"];
        assert_eq!(ext.control_file_name, "ext.control");
        assert_eq!(ext.sql_file_names, names(&["ext--1.0.sql", "ext--1.0--1.1.sql"]));
        assert_eq!(ext.library_file_name.as_deref(), Some("ext.so"));
        assert_eq!(ext.library_path(), Some(layout.lib_dir.join("ext.so")));
        assert!(ext.load_control().unwrap().contains("default_version"));
        assert_eq!(ext.load_sql_files().unwrap().len(), 2);

        // foo is declared twice; the pruned migration's function is gone
        assert_eq!(ext.load_sql_function_names().unwrap(), vec!["bar", "c_foo"]);

        let nolib = &extensions["nolib"];
        assert!(nolib.sql_file_names.is_empty());
        assert!(nolib.library_file_name.is_none());
    }

    #[test]
    fn test_missing_library_reference() {
        let (_dir, layout) = install_tree(&[("nolib.control", "")], &[]);
        let extensions = load_extensions(&layout).unwrap();
        let err = extensions["nolib"].load_library(&LoadOptions::default()).unwrap_err();
        assert!(matches!(err, ExtensionError::NoLibraryReference(ref name) if name == "nolib"));
    }

    #[test]
    fn test_unreadable_directory_is_io_failure() {
        let layout = InstallLayout::from_root("/nonexistent/pgext/install");
        let err = load_extensions(&layout).unwrap_err();
        assert!(matches!(err, ExtensionError::IoFailure { .. }));
    }

    #[test]
    fn test_unreadable_script_is_io_failure() {
        let (_dir, layout) = install_tree(&[("ext.control", "")], &["ext.so"]);
        let mut ext = load_extensions(&layout).unwrap().remove("ext").unwrap();
        ext.sql_file_names.push("ext--9.9.sql".into());
        let err = ext.load_sql_function_names().unwrap_err();
        match err {
            ExtensionError::IoFailure { path, .. } => assert!(path.ends_with("ext--9.9.sql")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
