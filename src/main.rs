/*
 *  main.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  pgext - list installed extensions, or load one and call a function
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

use anyhow::{Context, Result, anyhow};
use env_logger::Env;
use log::{info, warn};
use uuid::Uuid;

use pgext::config::{self, Config};
use pgext::fmgr::datum::datum_bytes;
use pgext::fmgr::DatumLedger;
use pgext::{CallAdapter, ExtensionFiles, PgMagic, TaggedDatum, load_extensions, set_runtime_config};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

fn main() -> Result<()> {
    let (config, cli) = config::load().context("loading configuration")?;

    env_logger::Builder::from_env(Env::default().default_filter_or(config.log_level()))
        .format_timestamp_secs()
        .init();

    info!("{} v.{} built {} for {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE, BUILD_TARGET);

    let layout = config
        .install_layout()
        .ok_or_else(|| anyhow!("no install layout configured"))?;
    let extensions = load_extensions(&layout)
        .with_context(|| format!("scanning {}", layout.share_extension_dir.display()))?;

    if cli.list {
        for extension in extensions.values() {
            print_extension(extension);
        }
        return Ok(());
    }

    set_runtime_config(config.runtime_config());
    smoke(&config, &extensions)
}

fn print_extension(extension: &ExtensionFiles) {
    println!("{}", extension.name);
    match extension.library_file_name.as_deref() {
        Some(library) => println!("  library: {}", library),
        None => println!("  library: -"),
    }
    for script in &extension.sql_file_names {
        println!("  script:  {}", script);
    }
}

fn print_magic(magic: Option<&PgMagic>) {
    match magic {
        Some(m) => println!(
            "Pg_magic: len={} version={} funcMaxArgs={} indexMaxKeys={} nameDataLen={} float8ByVal={} abi=\"{}\"",
            m.len, m.version, m.func_max_args, m.index_max_keys, m.name_data_len, m.float8_by_val, m.abi_extra
        ),
        None => println!("Pg_magic: not exported"),
    }
}

fn format_result(bytes: &[u8]) -> String {
    match Uuid::from_slice(bytes) {
        Ok(uuid) if bytes.len() == 16 => uuid.hyphenated().to_string(),
        _ => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}

/// Loads the configured extension, calls its function with no arguments and
/// prints the leading bytes of the result
fn smoke(config: &Config, extensions: &std::collections::BTreeMap<String, ExtensionFiles>) -> Result<()> {
    let name = config.smoke_extension();
    let extension = extensions
        .get(name)
        .ok_or_else(|| anyhow!("extension `{}` is not installed", name))?;

    let library = extension
        .load_library(&config.load_options())
        .with_context(|| format!("loading extension `{}`", name))?;
    print_magic(library.magic());

    let function_name = config.smoke_function();
    let function = library
        .function(function_name)
        .ok_or_else(|| anyhow!("`{}` does not declare C function `{}`", name, function_name))?;

    let adapter = CallAdapter::new(config.call_policy());
    // SAFETY: the library stays open until after the result is released, and
    // the smoke function is documented as taking no arguments
    let result = unsafe { adapter.invoke0(function) }
        .with_context(|| format!("calling {}", function_name))?;

    if !result.is_not_null {
        println!("{}() = null", function_name);
    } else {
        let len = config.smoke_result_bytes();
        // SAFETY: the function returns a by-reference value of at least `len` bytes
        match unsafe { datum_bytes(result.datum, len) } {
            Some(bytes) => println!("{}() = {}", function_name, format_result(&bytes)),
            None => println!("{}() = <null pointer>", function_name),
        }

        let mut ledger = DatumLedger::new();
        ledger.record(TaggedDatum::OwnedRef(result.datum));
        ledger.release(result.datum);
    }

    if let Err(e) = library.close() {
        warn!("{}", e);
    }
    Ok(())
}
