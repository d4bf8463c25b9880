use std::sync::Arc;

use parking_lot::Mutex;

use super::*;
use crate::codegen::Target;
use crate::context::{Binding, ElementFormat, KernelContext};
use crate::error::{DeviceError, PipelineError, UsageError};
use crate::fixtures::{add_vectors, scaled_vectors, ADD_EMULATED_MAIN, ADD_NATIVE_MAIN};

const ONE_TO_EIGHT: [f32; 8] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
const DOUBLED: [f32; 8] = [2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0];

fn main_for(target: Target) -> &'static str {
    match target {
        Target::Native => ADD_NATIVE_MAIN,
        Target::Emulated => ADD_EMULATED_MAIN,
    }
}

/// Reference device knowing the host body of `Add2Vectors`.
fn add_device() -> Arc<ReferenceDevice> {
    let device = ReferenceDevice::new();
    device.register("Add2Vectors", |inv, mem| {
        let i = inv.global_id(0);
        let a = mem.load_scalar("vectorA", i)?;
        let b = mem.load_scalar("vectorB", i)?;
        mem.store_scalar("vectorA", i, a + b)
    });
    Arc::new(device)
}

fn add_pipeline(device: &Arc<ReferenceDevice>, target: Target) -> ComputePipeline {
    let device: Arc<dyn Device> = device.clone();
    ComputePipeline::new(device, target, Arc::new(add_vectors()), main_for(target)).unwrap()
}

#[test]
fn test_add_vectors_on_both_targets() {
    let device = add_device();
    for target in Target::ALL {
        let mut pipeline = add_pipeline(&device, target);
        assert_eq!(pipeline.state(), PipelineState::Created);
        pipeline.bind("vectorA", &ONE_TO_EIGHT).unwrap();
        pipeline.bind("vectorB", &ONE_TO_EIGHT).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Bound);

        let result = pipeline.dispatch().wait().unwrap();
        assert_eq!(result, DOUBLED.to_vec(), "target {}", target);
        assert_eq!(pipeline.state(), PipelineState::Completed);
    }
}

#[test]
fn test_precompiled_bundle_runs() {
    let device = add_device();
    let bundle = Bundle::compile(&add_vectors(), ADD_NATIVE_MAIN, ADD_EMULATED_MAIN).unwrap();
    let bundle = Bundle::from_json(&bundle.to_json().unwrap()).unwrap();
    for target in Target::ALL {
        let dyn_device: Arc<dyn Device> = device.clone();
        let mut pipeline = ComputePipeline::from_bundle(dyn_device, target, &bundle).unwrap();
        assert_eq!(pipeline.source(), bundle.shader(target).unwrap());
        pipeline.bind("vectorA", &ONE_TO_EIGHT).unwrap();
        pipeline.bind("vectorB", &ONE_TO_EIGHT).unwrap();
        assert_eq!(pipeline.dispatch().wait().unwrap(), DOUBLED.to_vec());
    }
}

#[test]
fn test_bundle_without_target_source() {
    let device = add_device();
    let mut bundle = Bundle::compile(&add_vectors(), ADD_NATIVE_MAIN, ADD_EMULATED_MAIN).unwrap();
    bundle.shaders.remove(&Target::Emulated);
    let dyn_device: Arc<dyn Device> = device.clone();
    assert!(matches!(
        ComputePipeline::from_bundle(dyn_device, Target::Emulated, &bundle),
        Err(PipelineError::MissingShader {
            target: Target::Emulated,
            ..
        })
    ));
}

#[test]
fn test_destroy_releases_everything_once() {
    let device = add_device();
    let mut pipeline = add_pipeline(&device, Target::Native);
    pipeline.bind("vectorA", &ONE_TO_EIGHT).unwrap();
    pipeline.bind("vectorB", &ONE_TO_EIGHT).unwrap();
    assert_eq!(device.live_resources(), 2);

    pipeline.destroy();
    pipeline.destroy();
    assert_eq!(pipeline.state(), PipelineState::Destroyed);
    drop(pipeline);

    assert_eq!(device.released(), (2, 1));
    assert_eq!(device.live_resources(), 0);
    assert_eq!(device.live_programs(), 0);
}

#[test]
fn test_drop_destroys() {
    let device = add_device();
    {
        let mut pipeline = add_pipeline(&device, Target::Emulated);
        pipeline.bind("vectorA", &ONE_TO_EIGHT).unwrap();
    }
    assert_eq!(device.released(), (1, 1));
}

#[test]
fn test_usage_after_destroy() {
    let device = add_device();
    let mut pipeline = add_pipeline(&device, Target::Native);
    pipeline.destroy();
    assert!(matches!(
        pipeline.bind("vectorA", &ONE_TO_EIGHT),
        Err(PipelineError::Usage(UsageError::Destroyed { .. }))
    ));
    assert!(matches!(
        pipeline.dispatch().wait(),
        Err(PipelineError::Usage(UsageError::Destroyed { .. }))
    ));
}

#[test]
fn test_second_dispatch_while_outstanding() {
    let device = add_device();
    let mut pipeline = add_pipeline(&device, Target::Native);
    pipeline.bind("vectorA", &ONE_TO_EIGHT).unwrap();
    pipeline.bind("vectorB", &ONE_TO_EIGHT).unwrap();

    let first = pipeline.dispatch();
    assert_eq!(pipeline.state(), PipelineState::Dispatched);
    let second = pipeline.dispatch();
    assert!(matches!(
        second.wait(),
        Err(PipelineError::Usage(UsageError::DispatchInFlight { .. }))
    ));
    assert!(matches!(
        pipeline.bind("vectorB", &ONE_TO_EIGHT),
        Err(PipelineError::Usage(UsageError::DispatchInFlight { .. }))
    ));

    assert_eq!(first.wait().unwrap(), DOUBLED.to_vec());
    // Once resolved the pipeline accepts work again.
    assert_eq!(pipeline.dispatch().wait().unwrap()[0], 3.0);
}

#[test]
fn test_abandoned_completion_keeps_pipeline_dispatched() {
    let device = add_device();
    let mut pipeline = add_pipeline(&device, Target::Native);
    pipeline.bind("vectorA", &ONE_TO_EIGHT).unwrap();
    pipeline.bind("vectorB", &ONE_TO_EIGHT).unwrap();
    drop(pipeline.dispatch());
    assert_eq!(pipeline.state(), PipelineState::Dispatched);
    pipeline.destroy();
    assert_eq!(device.live_resources(), 0);
}

#[test]
fn test_unknown_binding() {
    let device = add_device();
    let mut pipeline = add_pipeline(&device, Target::Emulated);
    assert_eq!(
        pipeline.bind("vectorC", &[1.0]),
        Err(PipelineError::UnknownBinding {
            kernel: "Add2Vectors".to_string(),
            name: "vectorC".to_string(),
            target: Target::Emulated,
        })
    );
}

#[test]
fn test_output_size_mismatch() {
    let device = add_device();
    let mut pipeline = add_pipeline(&device, Target::Native);
    assert_eq!(
        pipeline.bind("vectorA", &[1.0, 2.0, 3.0]),
        Err(PipelineError::SizeMismatch {
            kernel: "Add2Vectors".to_string(),
            name: "vectorA".to_string(),
            expected: 8,
            actual: 3,
        })
    );
}

#[test]
fn test_vector_binding_needs_whole_elements() {
    let device = Arc::new(ReferenceDevice::new());
    device.register("Scaled", |_, _| Ok(()));
    let dyn_device: Arc<dyn Device> = device.clone();
    let mut pipeline = ComputePipeline::new(
        dyn_device,
        Target::Native,
        Arc::new(scaled_vectors()),
        "void main() {}",
    )
    .unwrap();
    assert!(matches!(
        pipeline.bind("points", &[1.0, 2.0, 3.0, 4.0]),
        Err(PipelineError::SizeMismatch {
            expected: 6,
            actual: 4,
            ..
        })
    ));
    assert!(matches!(
        pipeline.bind("u_Offset", &[1.0, 2.0]),
        Err(PipelineError::SizeMismatch { expected: 1, .. })
    ));
}

#[test]
fn test_declared_size_is_enforced() {
    let ctx = add_vectors()
        .with_binding(Binding::texture("lut", ElementFormat::FLOAT_ARRAY).readonly().with_size([2, 2]));
    let device = add_device();
    let dyn_device: Arc<dyn Device> = device.clone();
    let mut pipeline =
        ComputePipeline::new(dyn_device, Target::Native, Arc::new(ctx), ADD_NATIVE_MAIN).unwrap();
    assert!(pipeline.bind("lut", &[0.0; 4]).is_ok());
    assert!(matches!(
        pipeline.bind("lut", &[0.0; 5]),
        Err(PipelineError::SizeMismatch { expected: 4, .. })
    ));
}

#[test]
fn test_dispatch_requires_every_memory_binding() {
    let device = add_device();
    let mut pipeline = add_pipeline(&device, Target::Emulated);
    pipeline.bind("vectorA", &ONE_TO_EIGHT).unwrap();
    assert_eq!(
        pipeline.dispatch().wait(),
        Err(PipelineError::Usage(UsageError::Unbound {
            kernel: "Add2Vectors".to_string(),
            name: "vectorB".to_string(),
        }))
    );
    assert_eq!(pipeline.state(), PipelineState::Bound);
}

#[test]
fn test_rebind_reuses_same_shape() {
    let device = add_device();
    let mut pipeline = add_pipeline(&device, Target::Emulated);
    pipeline.bind("vectorB", &ONE_TO_EIGHT).unwrap();
    pipeline.bind("vectorB", &[0.0; 8]).unwrap();
    assert_eq!(device.live_resources(), 1);
    assert_eq!(device.released(), (0, 0));

    pipeline.bind("vectorB", &[0.0; 100]).unwrap();
    assert_eq!(device.live_resources(), 1);
    assert_eq!(device.released(), (1, 0));
}

#[test]
fn test_unsupported_target_rejected() {
    let device = ReferenceDevice::with_targets(&[Target::Native]);
    device.register("Add2Vectors", |_, _| Ok(()));
    let device: Arc<dyn Device> = Arc::new(device);
    assert!(matches!(
        ComputePipeline::new(device, Target::Emulated, Arc::new(add_vectors()), ADD_EMULATED_MAIN),
        Err(PipelineError::Device(DeviceError::UnsupportedTarget { .. }))
    ));
}

#[test]
fn test_generation_errors_surface() {
    let device = add_device();
    let dyn_device: Arc<dyn Device> = device.clone();
    let mut ctx = add_vectors();
    ctx.output.length = 3;
    assert!(matches!(
        ComputePipeline::new(dyn_device, Target::Native, Arc::new(ctx), ADD_NATIVE_MAIN),
        Err(PipelineError::Generate(_))
    ));
}

#[test]
fn test_kernel_failure_marks_pipeline_failed() {
    let device = Arc::new(ReferenceDevice::new());
    device.register("Add2Vectors", |inv, _| {
        if inv.global_id(0) == 5 {
            return Err(DeviceError::Kernel {
                invocation: 5,
                reason: "boom".to_string(),
            });
        }
        Ok(())
    });
    let mut pipeline = add_pipeline(&device, Target::Native);
    pipeline.bind("vectorA", &ONE_TO_EIGHT).unwrap();
    pipeline.bind("vectorB", &ONE_TO_EIGHT).unwrap();
    let err = pipeline.dispatch().wait().unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert_eq!(pipeline.state(), PipelineState::Failed);

    // Failed pipelines can be dispatched again.
    assert!(pipeline.dispatch().wait().is_err());
}

#[test]
fn test_iterations_feed_output_back() {
    let ctx = KernelContext::new("Accumulate", "acc")
        .with_thread_group_size([4, 1, 1])
        .with_max_iteration(3)
        .with_binding(Binding::texture("acc", ElementFormat::FLOAT_ARRAY))
        .with_binding(Binding::texture("step", ElementFormat::FLOAT_ARRAY).readonly());
    let device = Arc::new(ReferenceDevice::new());
    device.register("Accumulate", |inv, mem| {
        let i = inv.global_id(0);
        let acc = mem.load_scalar("acc", i)?;
        let step = mem.load_scalar("step", i)?;
        mem.store_scalar("acc", i, acc + step)
    });
    let ctx = Arc::new(ctx);
    for target in Target::ALL {
        let dyn_device: Arc<dyn Device> = device.clone();
        let mut pipeline =
            ComputePipeline::new(dyn_device, target, Arc::clone(&ctx), "void main() {}").unwrap();
        pipeline.bind("acc", &[0.0, 10.0, 20.0, 30.0]).unwrap();
        pipeline.bind("step", &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(
            pipeline.dispatch().wait().unwrap(),
            vec![3.0, 16.0, 29.0, 42.0],
            "target {}",
            target
        );
    }
}

#[test]
fn test_multiple_elements_per_texel() {
    let ctx = KernelContext::new("Doubler", "out")
        .with_thread_group_size([8, 1, 1])
        .with_elements_per_texel(2)
        .with_binding(Binding::texture("out", ElementFormat::FLOAT_ARRAY))
        .with_binding(Binding::texture("x", ElementFormat::FLOAT_ARRAY).readonly());
    assert_eq!(ctx.output.length, 4);

    let device = Arc::new(ReferenceDevice::new());
    device.register("Doubler", |inv, mem| {
        let indices = match inv.target {
            Target::Native => vec![inv.global_id(0)],
            // One fragment fills both elements of its texel.
            Target::Emulated => {
                let texel = inv.builtins.global_invocation_index as usize;
                vec![texel * 2, texel * 2 + 1]
            }
        };
        for i in indices {
            let v = mem.load_scalar("x", i)?;
            mem.store_scalar("out", i, v * 2.0)?;
        }
        Ok(())
    });

    let ctx = Arc::new(ctx);
    for target in Target::ALL {
        let dyn_device: Arc<dyn Device> = device.clone();
        let mut pipeline =
            ComputePipeline::new(dyn_device, target, Arc::clone(&ctx), "void main() {}").unwrap();
        pipeline.bind("out", &[0.0; 8]).unwrap();
        pipeline.bind("x", &ONE_TO_EIGHT).unwrap();
        assert_eq!(pipeline.dispatch().wait().unwrap(), DOUBLED.to_vec(), "target {}", target);
    }
}

#[test]
fn test_runtime_defines_and_uniforms() {
    let device = Arc::new(ReferenceDevice::new());
    device.register("Scaled", |inv, mem| {
        let i = inv.global_id(0);
        let point = mem.load("points", i)?;
        let scale = inv.define("SCALE").unwrap_or(0.0);
        let offset = inv.uniform("u_Offset").map_or(0.0, |v| v[0]);
        let size = inv.define("SIZE").unwrap_or(0.0);
        mem.store_scalar("result", i, point.x() * scale + offset + size)
    });
    let ctx = Arc::new(scaled_vectors());
    let points: Vec<f32> = (0..8).flat_map(|i| [i as f32, 0.0, 0.0]).collect();

    for target in Target::ALL {
        let dyn_device: Arc<dyn Device> = device.clone();
        let mut pipeline =
            ComputePipeline::new(dyn_device, target, Arc::clone(&ctx), "void main() {}").unwrap();
        pipeline.bind("result", &[0.0; 8]).unwrap();
        pipeline.bind("points", &points).unwrap();
        pipeline.bind("u_Offset", &[1.0]).unwrap();

        let first = pipeline.dispatch().wait().unwrap();
        assert_eq!(first[2], 2.0 * 2.5 + 1.0 + 8.0, "target {}", target);

        pipeline.set_define("SCALE", 10.0).unwrap();
        let second = pipeline.dispatch().wait().unwrap();
        assert_eq!(second[2], 2.0 * 10.0 + 1.0 + 8.0, "target {}", target);

        assert_eq!(
            pipeline.set_define("SIZE", 1.0),
            Err(PipelineError::Usage(UsageError::NotRuntimeDefine {
                kernel: "Scaled".to_string(),
                name: "SIZE".to_string(),
            }))
        );
    }
}

#[tokio::test]
async fn test_completion_is_awaitable() {
    let device = add_device();
    let mut pipeline = add_pipeline(&device, Target::Emulated);
    pipeline.bind("vectorA", &ONE_TO_EIGHT).unwrap();
    pipeline.bind("vectorB", &ONE_TO_EIGHT).unwrap();
    assert_eq!(pipeline.dispatch().await.unwrap(), DOUBLED.to_vec());
}

#[tokio::test]
async fn test_scheduler_drives_compute_system() {
    let device = add_device();
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);

    let mut system = ComputeSystem::new(add_pipeline(&device, Target::Native))
        .on_completed(move |result, _| sink.lock().push(result));
    system.set_binding("vectorA", &ONE_TO_EIGHT);
    system.set_binding("vectorB", &ONE_TO_EIGHT);

    let mut scheduler = Scheduler::new();
    scheduler.add(system);
    scheduler.initialize_all();

    scheduler.tick().await.unwrap();
    // Nothing queued: the second tick does not dispatch.
    scheduler.tick().await.unwrap();
    {
        let results = results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0], Ok(DOUBLED.to_vec()));
    }

    scheduler.shutdown();
    assert!(scheduler.is_empty());
    assert_eq!(device.released(), (2, 1));
}

#[tokio::test]
async fn test_callback_may_destroy_its_pipeline() {
    let device = add_device();
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);

    let mut system = ComputeSystem::new(add_pipeline(&device, Target::Emulated)).on_completed(
        move |result, pipeline| {
            sink.lock().push(result);
            pipeline.destroy();
        },
    );
    system.set_binding("vectorA", &ONE_TO_EIGHT);
    system.set_binding("vectorB", &ONE_TO_EIGHT);

    system.execute().await.unwrap();
    assert!(system.pipeline().is_none());
    assert_eq!(device.released(), (2, 1));
    assert_eq!(results.lock().as_slice(), &[Ok(DOUBLED.to_vec())]);

    // Retired: queued work is ignored and teardown releases nothing more.
    system.set_binding("vectorA", &ONE_TO_EIGHT);
    system.request_dispatch();
    system.execute().await.unwrap();
    system.tear_down();
    assert_eq!(device.released(), (2, 1));
    assert_eq!(device.live_resources(), 0);
    assert_eq!(results.lock().len(), 1);
}

#[tokio::test]
async fn test_compute_system_without_callback_reports_errors() {
    let device = add_device();
    let mut system = ComputeSystem::new(add_pipeline(&device, Target::Native));
    system.set_binding("vectorA", &ONE_TO_EIGHT);
    let mut scheduler = Scheduler::new();
    scheduler.add(system);
    assert!(matches!(
        scheduler.tick().await,
        Err(PipelineError::Usage(UsageError::Unbound { .. }))
    ));
}
