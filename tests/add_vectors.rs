use std::sync::Arc;

use kernel_bridge::runtime::Device;
use kernel_bridge::{
    Bundle, ComputePipeline, KernelContext, PipelineError, PipelineState, ReferenceDevice, Target,
    UsageError,
};

const CONTEXT: &str = r#"{
    "name": "Add2Vectors",
    "dispatch": [1, 1, 1],
    "threadGroupSize": [8, 1, 1],
    "maxIteration": 1,
    "defines": [],
    "uniforms": [
        {"name": "vectorA", "type": "sampler2D", "format": "float[]", "readonly": false, "writeonly": false, "size": [1, 1]},
        {"name": "vectorB", "type": "sampler2D", "format": "float[]", "readonly": true, "writeonly": false, "size": [1, 1]}
    ],
    "globalDeclarations": ["float sum(float a, float b) { return a + b; }"],
    "output": {"name": "vectorA", "size": [1, 1], "length": 8, "outputElementsPerTexel": 1}
}"#;

const NATIVE_MAIN: &str = "void main() {
float a = vectorA[globalInvocationID.x];
float b = vectorB[globalInvocationID.x];
vectorA[globalInvocationID.x] = float(sum(a,b));}";

const EMULATED_MAIN: &str = "void main() {
float a = getDatavectorA(globalInvocationID.x);
float b = getDatavectorB(globalInvocationID.x);
gl_FragColor = vec4(sum(a,b));}";

fn device() -> Arc<dyn Device> {
    let device = ReferenceDevice::new();
    device.register("Add2Vectors", |inv, mem| {
        let i = inv.global_id(0);
        let a = mem.load_scalar("vectorA", i)?;
        let b = mem.load_scalar("vectorB", i)?;
        mem.store_scalar("vectorA", i, a + b)
    });
    Arc::new(device)
}

fn data() -> Vec<f32> {
    (1..=8).map(|v| v as f32).collect()
}

#[test]
fn bundle_file_runs_on_both_targets() {
    let context: KernelContext = serde_json::from_str(CONTEXT).unwrap();
    let bundle = Bundle::compile(&context, NATIVE_MAIN, EMULATED_MAIN).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("add.bundle.json");
    std::fs::write(&path, bundle.to_json().unwrap()).unwrap();
    let loaded = Bundle::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded.digest().unwrap(), bundle.digest().unwrap());

    let device = device();
    for target in Target::ALL {
        let mut pipeline = ComputePipeline::from_bundle(device.clone(), target, &loaded).unwrap();
        pipeline.bind("vectorA", &data()).unwrap();
        pipeline.bind("vectorB", &data()).unwrap();
        let result = pipeline.dispatch().wait().unwrap();
        assert_eq!(
            result,
            vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0],
            "target {}",
            target
        );
        pipeline.destroy();
        pipeline.destroy();
        assert_eq!(pipeline.state(), PipelineState::Destroyed);
        assert!(matches!(
            pipeline.bind("vectorA", &data()),
            Err(PipelineError::Usage(UsageError::Destroyed { .. }))
        ));
    }
}

#[test]
fn generation_is_repeatable() {
    let context: KernelContext = serde_json::from_str(CONTEXT).unwrap();
    for target in Target::ALL {
        let main = match target {
            Target::Native => NATIVE_MAIN,
            Target::Emulated => EMULATED_MAIN,
        };
        let first = kernel_bridge::generate(target, &context, main).unwrap();
        let second = kernel_bridge::generate(target, &context, main).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("sum(float a, float b)"));
    }
}

#[test]
fn generators_are_found_by_name() {
    assert_eq!(
        kernel_bridge::create_generator("WebGL").map(|g| g.target()),
        Some(Target::Emulated)
    );
    assert_eq!(
        kernel_bridge::create_generator("native").map(|g| g.target()),
        Some(Target::Native)
    );
    assert!(kernel_bridge::create_generator("metal").is_none());
}
