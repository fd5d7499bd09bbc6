//! Embeds a prebuilt shim library into the crate.
//!
//! Set `FMBRIDGE_EMBED_SHIM` to the path of a compiled `libFMShim` to bundle
//! it. Without it an empty blob is embedded and the locator only searches the
//! filesystem.

use std::{env, fs, path::Path};

fn main() {
    println!("cargo:rerun-if-env-changed=FMBRIDGE_EMBED_SHIM");

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("embedded_shim.bin");

    let bytes = match env::var("FMBRIDGE_EMBED_SHIM") {
        Ok(source) if !source.is_empty() => {
            println!("cargo:rerun-if-changed={source}");
            fs::read(&source).expect("failed to read FMBRIDGE_EMBED_SHIM library")
        }
        _ => Vec::new(),
    };

    fs::write(&dest_path, bytes).expect("failed to write embedded_shim.bin");
}
