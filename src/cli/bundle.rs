use std::path::PathBuf;
use std::process;

use clap::Args;
use kernel_bridge::Bundle;

use super::{load_context, read_file, write_output};

#[derive(Args)]
pub struct BundleArgs {
    /// Kernel context JSON file
    pub context: PathBuf,
    /// `main` body for the native target
    #[arg(long, value_name = "PATH")]
    pub native_main: PathBuf,
    /// `main` body for the emulated target
    #[arg(long, value_name = "PATH")]
    pub emulated_main: PathBuf,
    /// Output bundle file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn cmd_bundle(args: BundleArgs) {
    let context = load_context(&args.context);
    let native_main = read_file(&args.native_main);
    let emulated_main = read_file(&args.emulated_main);

    let json = Bundle::compile(&context, &native_main, &emulated_main).and_then(|b| b.to_json());
    match json {
        Ok(json) => write_output(args.output.as_ref(), &json),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
