use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod cli;

use cli::bundle::BundleArgs;
use cli::generate::GenerateArgs;
use cli::inspect::InspectArgs;
use cli::run::RunArgs;

#[derive(Parser)]
#[command(
    name = "kernel-bridge",
    version,
    about = "One compute kernel, native GPU compute or fragment-shader emulation"
)]
struct Cli {
    /// Runtime config file (default: ./kernel-bridge.toml if present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate shader source for one target
    Generate(GenerateArgs),
    /// Precompile a kernel for both targets into a bundle
    Bundle(BundleArgs),
    /// Summarize a bundle and print its digest
    Inspect(InspectArgs),
    /// Execute a bundle on the GPU and print the output array
    Run(RunArgs),
}

fn main() {
    let cli = Cli::parse();

    let config = match kernel_bridge::RuntimeConfig::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    kernel_bridge::logging::init(&config.log_filter);

    match cli.command {
        Command::Generate(args) => cli::generate::cmd_generate(args, &config),
        Command::Bundle(args) => cli::bundle::cmd_bundle(args),
        Command::Inspect(args) => cli::inspect::cmd_inspect(args),
        Command::Run(args) => cli::run::cmd_run(args, &config),
    }
}
