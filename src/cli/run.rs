use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Args;
use kernel_bridge::runtime::Device;
use kernel_bridge::{ComputePipeline, RuntimeConfig, Target};

use super::generate::parse_target;
use super::load_bundle;

#[derive(Args)]
pub struct RunArgs {
    /// Bundle JSON file
    pub bundle: PathBuf,
    /// Bind data: NAME=v1,v2,... (repeatable)
    #[arg(long = "bind", value_name = "NAME=VALUES")]
    pub bindings: Vec<String>,
    /// Set a runtime define: NAME=value (repeatable)
    #[arg(long = "define", value_name = "NAME=VALUE")]
    pub defines: Vec<String>,
    /// Target (default: from config)
    #[arg(long)]
    pub target: Option<String>,
}

pub fn cmd_run(args: RunArgs, config: &RuntimeConfig) {
    let target = match args.target.as_deref() {
        Some(name) => parse_target(name),
        None => config.target,
    };
    if target != Target::Native {
        eprintln!("error: only the native target runs from the command line");
        process::exit(1);
    }
    let bundle = load_bundle(&args.bundle);

    let device: Arc<dyn Device> = match kernel_bridge::gpu::try_create_device(config) {
        Some(device) => Arc::new(device),
        None => {
            eprintln!("error: no GPU adapter available");
            process::exit(1);
        }
    };

    let mut pipeline = ComputePipeline::from_bundle(device, target, &bundle)
        .map(|p| p.with_max_texture_width(config.max_texture_width))
        .unwrap_or_else(|e| fail(e));

    for assignment in &args.bindings {
        let (name, values) = split_assignment(assignment);
        let data = parse_values(name, values);
        pipeline.bind(name, &data).unwrap_or_else(|e| fail(e));
    }
    for assignment in &args.defines {
        let (name, value) = split_assignment(assignment);
        let value = parse_values(name, value);
        if value.len() != 1 {
            fail(format!("define '{}' takes exactly one value", name));
        }
        pipeline.set_define(name, value[0]).unwrap_or_else(|e| fail(e));
    }

    let output = pipeline.dispatch().wait().unwrap_or_else(|e| fail(e));
    match serde_json::to_string(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("error: {}", e);
    process::exit(1);
}

fn split_assignment(assignment: &str) -> (&str, &str) {
    match assignment.split_once('=') {
        Some((name, values)) => (name.trim(), values),
        None => fail(format!("expected NAME=VALUES, got '{}'", assignment)),
    }
}

fn parse_values(name: &str, values: &str) -> Vec<f32> {
    values
        .split(',')
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .unwrap_or_else(|_| fail(format!("'{}': '{}' is not a number", name, v.trim())))
        })
        .collect()
}
