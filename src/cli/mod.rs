pub mod bundle;
pub mod generate;
pub mod inspect;
pub mod run;

use std::path::{Path, PathBuf};
use std::process;

use kernel_bridge::{Bundle, KernelContext};

/// Read a file to a string, exiting on error.
pub fn read_file(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Load a kernel context from JSON, exiting on error.
pub fn load_context(path: &Path) -> KernelContext {
    match serde_json::from_str(&read_file(path)) {
        Ok(context) => context,
        Err(e) => {
            eprintln!("error: {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Load a precompiled bundle, exiting on error.
pub fn load_bundle(path: &Path) -> Bundle {
    match Bundle::from_json(&read_file(path)) {
        Ok(bundle) => bundle,
        Err(e) => {
            eprintln!("error: {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Write `text` to `output`, or to stdout when no path is given.
pub fn write_output(output: Option<&PathBuf>, text: &str) {
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{}", text),
    }
}
