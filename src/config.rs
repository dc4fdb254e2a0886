/*
 *  config.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Layered configuration - defaults, YAML, environment, command line
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

use serde::{Deserialize, Serialize};
use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::extension::InstallLayout;
use crate::fmgr::CallPolicy;
use crate::loader::{LoadOptions, RuntimeConfig, RUNTIME_PATH_ENV};

/// Environment override for the install root
pub const INSTALL_DIR_ENV: &str = "PGEXT_INSTALL_DIR";

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    /// Postgres install root holding `share/extension` and `lib`
    pub install_dir: Option<PathBuf>,
    /// overrides `<install_dir>/share/extension`
    pub share_extension_dir: Option<PathBuf>,
    /// overrides `<install_dir>/lib`
    pub lib_dir: Option<PathBuf>,
    /// companion runtime library
    pub runtime_path: Option<PathBuf>,
    /// fail calls that raise an ERROR report
    pub strict_calls: Option<bool>,
    /// skip declared functions the module does not export
    pub skip_missing_symbols: Option<bool>,
    pub smoke: Option<SmokeConfig>,
}

/// What the smoke run loads and calls
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SmokeConfig {
    pub extension: Option<String>,
    pub function: Option<String>,
    pub result_bytes: Option<usize>,
}

pub const DEFAULT_EXTENSION: &str = "uuid-ossp";
pub const DEFAULT_FUNCTION: &str = "uuid_generate_v4";
pub const DEFAULT_RESULT_BYTES: usize = 16;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "pgext", about = "Load and call Postgres extensions without a server", version)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// Postgres install root
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub install_dir: Option<PathBuf>,
    /// Companion runtime library
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub runtime_path: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Extension to load
    #[arg(long)]
    pub extension: Option<String>,
    /// Zero-argument function to call
    #[arg(long)]
    pub function: Option<String>,
    /// Bytes of the result to print
    #[arg(long)]
    pub result_bytes: Option<usize>,
    /// list discovered extensions and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub list: bool,
    /// fail when the function raises an ERROR report
    #[arg(long, action = ArgAction::SetTrue)]
    pub strict: bool,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<(Config, Cli), ConfigError> {
    let cli = Cli::parse();
    let cfg = load_with(&cli, |key| std::env::var(key).ok())?;

    if cli.dump_config {
        // Pretty YAML of effective config
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok((cfg, cli))
}

/// Layers defaults, YAML, environment (through `env`) and `cli`
pub fn load_with<F>(cli: &Cli, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) environment
    apply_env_overrides(&mut cfg, env);

    // 4) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 5) Validate
    validate(&cfg)?;

    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/pgext/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/pgext/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/pgext.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    let p = PathBuf::from("pgext.yaml");
    if p.exists() { return Some(p) }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some()            { dst.log_level = src.log_level; }
    if src.install_dir.is_some()          { dst.install_dir = src.install_dir; }
    if src.share_extension_dir.is_some()  { dst.share_extension_dir = src.share_extension_dir; }
    if src.lib_dir.is_some()              { dst.lib_dir = src.lib_dir; }
    if src.runtime_path.is_some()         { dst.runtime_path = src.runtime_path; }
    if src.strict_calls.is_some()         { dst.strict_calls = src.strict_calls; }
    if src.skip_missing_symbols.is_some() { dst.skip_missing_symbols = src.skip_missing_symbols; }
    match (&mut dst.smoke, src.smoke) {
        (None, Some(s)) => dst.smoke = Some(s),
        (Some(d), Some(s)) => merge_smoke(d, s),
        _ => {}
    }
}

fn merge_smoke(dst: &mut SmokeConfig, src: SmokeConfig) {
    if src.extension.is_some()     { dst.extension = src.extension; }
    if src.function.is_some()      { dst.function = src.function; }
    if src.result_bytes.is_some()  { dst.result_bytes = src.result_bytes; }
}

fn apply_env_overrides<F>(cfg: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = env(INSTALL_DIR_ENV).filter(|v| !v.is_empty()) {
        cfg.install_dir = Some(PathBuf::from(dir));
    }
    if let Some(path) = env(RUNTIME_PATH_ENV).filter(|v| !v.is_empty()) {
        cfg.runtime_path = Some(PathBuf::from(path));
    }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()     { cfg.log_level = cli.log_level.clone(); }
    if cli.install_dir.is_some()   { cfg.install_dir = cli.install_dir.clone(); }
    if cli.runtime_path.is_some()  { cfg.runtime_path = cli.runtime_path.clone(); }
    if cli.strict                  { cfg.strict_calls = Some(true); }

    let any_smoke = cli.extension.is_some()
        || cli.function.is_some()
        || cli.result_bytes.is_some();

    if any_smoke && cfg.smoke.is_none() {
        cfg.smoke = Some(SmokeConfig::default());
    }
    if let Some(smoke) = cfg.smoke.as_mut() {
        if cli.extension.is_some()     { smoke.extension = cli.extension.clone(); }
        if cli.function.is_some()      { smoke.function = cli.function.clone(); }
        if cli.result_bytes.is_some()  { smoke.result_bytes = cli.result_bytes; }
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.install_dir.is_none() && (cfg.share_extension_dir.is_none() || cfg.lib_dir.is_none()) {
        return Err(ConfigError::Validation(format!(
            "install_dir is required (set it in YAML, ${} or --install-dir)",
            INSTALL_DIR_ENV
        )));
    }
    if let Some(level) = cfg.log_level.as_deref() {
        match level.to_ascii_lowercase().as_str() {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => {},
            _ => return Err(ConfigError::Validation(format!("unknown log_level: {level}"))),
        }
    }
    if let Some(smoke) = cfg.smoke.as_ref() {
        if smoke.result_bytes == Some(0) {
            return Err(ConfigError::Validation("smoke result_bytes must be > 0".into()));
        }
        if smoke.function.as_deref() == Some("") {
            return Err(ConfigError::Validation("smoke function must not be empty".into()));
        }
    }
    Ok(())
}

impl Config {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Install layout; explicit directories win over the install root
    pub fn install_layout(&self) -> Option<InstallLayout> {
        let base = self.install_dir.as_ref().map(InstallLayout::from_root);
        let share = self.share_extension_dir.clone()
            .or_else(|| base.as_ref().map(|b| b.share_extension_dir.clone()))?;
        let lib = self.lib_dir.clone()
            .or_else(|| base.as_ref().map(|b| b.lib_dir.clone()))?;
        Some(InstallLayout::new(share, lib))
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            runtime_path: self.runtime_path.clone(),
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            skip_missing_symbols: self.skip_missing_symbols.unwrap_or(false),
        }
    }

    pub fn call_policy(&self) -> CallPolicy {
        if self.strict_calls.unwrap_or(false) {
            CallPolicy::Fail
        } else {
            CallPolicy::Log
        }
    }

    pub fn smoke_extension(&self) -> &str {
        self.smoke.as_ref().and_then(|s| s.extension.as_deref()).unwrap_or(DEFAULT_EXTENSION)
    }

    pub fn smoke_function(&self) -> &str {
        self.smoke.as_ref().and_then(|s| s.function.as_deref()).unwrap_or(DEFAULT_FUNCTION)
    }

    pub fn smoke_result_bytes(&self) -> usize {
        self.smoke.as_ref().and_then(|s| s.result_bytes).unwrap_or(DEFAULT_RESULT_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn yaml_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_yaml_then_cli() {
        let file = yaml_file("install_dir: /opt/pg17\nlog_level: debug\nsmoke:\n  extension: pgcrypto\n  result_bytes: 8\n");
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            function: Some("gen_random_uuid".into()),
            ..Cli::default()
        };
        let cfg = load_with(&cli, no_env).unwrap();

        assert_eq!(cfg.log_level(), "debug");
        assert_eq!(cfg.smoke_extension(), "pgcrypto");
        assert_eq!(cfg.smoke_function(), "gen_random_uuid");
        assert_eq!(cfg.smoke_result_bytes(), 8);
        let layout = cfg.install_layout().unwrap();
        assert_eq!(layout.share_extension_dir, PathBuf::from("/opt/pg17/share/extension"));
        assert_eq!(layout.lib_dir, PathBuf::from("/opt/pg17/lib"));
    }

    #[test]
    fn test_env_between_yaml_and_cli() {
        let file = yaml_file("install_dir: /from/yaml\nruntime_path: /from/yaml/libpgext_runtime.so\n");
        let env = |key: &str| match key {
            INSTALL_DIR_ENV => Some("/from/env".to_string()),
            RUNTIME_PATH_ENV => Some("/from/env/libpgext_runtime.so".to_string()),
            _ => None,
        };

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Cli::default()
        };
        let cfg = load_with(&cli, env).unwrap();
        assert_eq!(cfg.install_dir, Some(PathBuf::from("/from/env")));
        assert_eq!(cfg.runtime_config().runtime_path, Some(PathBuf::from("/from/env/libpgext_runtime.so")));

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            install_dir: Some(PathBuf::from("/from/cli")),
            ..Cli::default()
        };
        let cfg = load_with(&cli, env).unwrap();
        assert_eq!(cfg.install_dir, Some(PathBuf::from("/from/cli")));
    }

    #[test]
    fn test_defaults() {
        let cli = Cli {
            install_dir: Some(PathBuf::from("/usr/local/pgsql")),
            ..Cli::default()
        };
        let cfg = load_with(&cli, no_env).unwrap();
        assert_eq!(cfg.smoke_extension(), DEFAULT_EXTENSION);
        assert_eq!(cfg.smoke_function(), DEFAULT_FUNCTION);
        assert_eq!(cfg.smoke_result_bytes(), 16);
        assert_eq!(cfg.call_policy(), CallPolicy::Log);
        assert!(!cfg.load_options().skip_missing_symbols);
    }

    #[test]
    fn test_strict_flag() {
        let cli = Cli {
            install_dir: Some(PathBuf::from("/usr/local/pgsql")),
            strict: true,
            ..Cli::default()
        };
        let cfg = load_with(&cli, no_env).unwrap();
        assert_eq!(cfg.call_policy(), CallPolicy::Fail);
    }

    #[test]
    fn test_explicit_dirs_override_root() {
        let cfg = Config {
            install_dir: Some(PathBuf::from("/root")),
            lib_dir: Some(PathBuf::from("/elsewhere/lib")),
            ..Config::default()
        };
        let layout = cfg.install_layout().unwrap();
        assert_eq!(layout.share_extension_dir, PathBuf::from("/root/share/extension"));
        assert_eq!(layout.lib_dir, PathBuf::from("/elsewhere/lib"));
    }

    #[test]
    fn test_validation_failures() {
        let missing = Cli {
            config: Some(PathBuf::from("/no/such/pgext.yaml")),
            ..Cli::default()
        };
        assert!(matches!(load_with(&missing, no_env), Err(ConfigError::Validation(_))));

        let bad_level = Cli {
            install_dir: Some(PathBuf::from("/x")),
            log_level: Some("loud".into()),
            ..Cli::default()
        };
        assert!(matches!(load_with(&bad_level, no_env), Err(ConfigError::Validation(_))));

        let zero_bytes = Cli {
            install_dir: Some(PathBuf::from("/x")),
            result_bytes: Some(0),
            ..Cli::default()
        };
        assert!(matches!(load_with(&zero_bytes, no_env), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_bad_yaml() {
        let file = yaml_file("install_dir: [unterminated\n");
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Cli::default()
        };
        assert!(matches!(load_with(&cli, no_env), Err(ConfigError::Yaml(_))));
    }
}
