//! Build script for svb-sys.
//!
//! The SVBONY SDK ships a single shared library and no pkg-config file, so the
//! declarations in `src/lib.rs` are written by hand and this script only emits
//! link directives when the `svb-sdk` feature is enabled.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=SVB_SDK_DIR");
    println!("cargo:rerun-if-env-changed=SVB_LIB_DIR");

    if env::var_os("CARGO_FEATURE_SVB_SDK").is_none() {
        return;
    }

    let lib_dir = env::var("SVB_LIB_DIR")
        .map(PathBuf::from)
        .ok()
        .or_else(|| env::var("SVB_SDK_DIR").ok().map(|d| PathBuf::from(d).join("lib")));

    if let Some(dir) = lib_dir {
        if !dir.exists() {
            println!(
                "cargo:warning=SVBONY SDK lib path does not exist: {}",
                dir.display()
            );
        }
        println!("cargo:rustc-link-search=native={}", dir.display());
    } else {
        // Fall back to the usual install locations of the vendor .deb/.tar packages
        for path in ["/usr/local/lib", "/usr/lib", "/usr/lib/x86_64-linux-gnu"] {
            if std::path::Path::new(path)
                .join("libSVBCameraSDK.so")
                .exists()
            {
                println!("cargo:rustc-link-search=native={}", path);
                break;
            }
        }
    }

    println!("cargo:rustc-link-lib=SVBCameraSDK");
}
