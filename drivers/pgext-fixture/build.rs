// build.rs

use std::env;

fn main() {
    // Server symbols stay undefined until the host preloads the runtime.
    // ELF shared objects allow that by default; Mach-O needs to be told.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        println!("cargo:rustc-cdylib-link-arg=-undefined");
        println!("cargo:rustc-cdylib-link-arg=dynamic_lookup");
    }

    println!("cargo:rerun-if-changed=build.rs");
}
