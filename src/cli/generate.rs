use std::path::PathBuf;
use std::process;

use clap::Args;
use kernel_bridge::{RuntimeConfig, Target};

use super::{load_context, read_file, write_output};

#[derive(Args)]
pub struct GenerateArgs {
    /// Kernel context JSON file
    pub context: PathBuf,
    /// File holding the kernel's `main` body for this target
    #[arg(long, value_name = "PATH")]
    pub main: PathBuf,
    /// Target: native or emulated (default: from config)
    #[arg(long)]
    pub target: Option<String>,
    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn cmd_generate(args: GenerateArgs, config: &RuntimeConfig) {
    let target = match args.target.as_deref() {
        Some(name) => parse_target(name),
        None => config.target,
    };
    let context = load_context(&args.context);
    let main = read_file(&args.main);

    match kernel_bridge::generate(target, &context, &main) {
        Ok(source) => write_output(args.output.as_ref(), &source),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

pub fn parse_target(name: &str) -> Target {
    match Target::from_name(name) {
        Some(target) => target,
        None => {
            eprintln!("error: unknown target '{}' (expected native or emulated)", name);
            process::exit(1);
        }
    }
}
