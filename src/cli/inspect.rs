use std::path::PathBuf;
use std::process;

use clap::Args;

use super::load_bundle;

#[derive(Args)]
pub struct InspectArgs {
    /// Bundle JSON file
    pub bundle: PathBuf,
}

pub fn cmd_inspect(args: InspectArgs) {
    let bundle = load_bundle(&args.bundle);
    let context = &bundle.context;

    let digest = match bundle.digest() {
        Ok(digest) => digest,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    println!("Kernel:      {}", context.name);
    println!("Digest:      {}", digest);
    println!(
        "Dispatch:    {:?} x {:?} = {} invocations",
        context.dispatch,
        context.thread_group_size,
        context.total_invocations()
    );
    println!(
        "Output:      {} ({} texels, {} per texel)",
        context.output.name, context.output.length, context.output.output_elements_per_texel
    );
    if context.max_iteration > 1 {
        println!("Iterations:  {}", context.max_iteration);
    }
    println!("Bindings:");
    for binding in &context.uniforms {
        let access = if binding.readonly {
            " readonly"
        } else if binding.writeonly {
            " writeonly"
        } else {
            ""
        };
        let ty = String::from(binding.ty.clone());
        println!("  {:<16} {:<10} {}{}", binding.name, ty, binding.format, access);
    }
    if !context.defines.is_empty() {
        println!("Defines:");
        for define in &context.defines {
            let kind = if define.runtime { "runtime" } else { "constant" };
            println!("  {:<16} {} ({})", define.name, define.literal(), kind);
        }
    }
    println!("Targets:");
    for target in bundle.targets() {
        let bytes = bundle.shader(target).map_or(0, str::len);
        println!("  {:<16} {} bytes", target, bytes);
    }
}
