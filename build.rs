// build.rs

use chrono::Utc;
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("build_info.rs");

    let build_date = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    // Extensions must be built for the same triple as the host that loads them
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());

    fs::write(
        &dest_path,
        format!(
            "pub const BUILD_DATE: &str = \"{}\";\npub const BUILD_TARGET: &str = \"{}\";\n",
            build_date, target
        ),
    ).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}
