//! Host scheduler: systems driven once per frame.
//!
//! A [`System`] is initialized once, executed every tick, cleaned up at
//! the end of each tick and torn down on shutdown. [`ComputeSystem`]
//! adapts a [`ComputePipeline`] to that lifecycle.

use std::future::Future;
use std::pin::Pin;

use super::pipeline::{ComputePipeline, PipelineState};
use crate::error::PipelineError;

/// Future returned by [`System::execute`].
pub type TickFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'a>>;

/// Receives the result of every dispatch a [`ComputeSystem`] awaits,
/// together with the pipeline. Destroying the pipeline here retires the
/// system: later ticks do nothing and `tear_down` releases nothing twice.
pub type CompletedCallback =
    Box<dyn FnMut(Result<Vec<f32>, PipelineError>, &mut ComputePipeline) + Send>;

pub trait System: Send {
    /// Runs once before the first tick.
    fn initialize(&mut self) {}

    /// Runs once per tick.
    fn execute(&mut self) -> TickFuture<'_>;

    /// Runs at the end of every tick, after all systems executed.
    fn cleanup(&mut self) {}

    /// Runs once on shutdown.
    fn tear_down(&mut self) {}
}

/// Runs a compute pipeline from the scheduler.
///
/// Bindings and define values queued with [`set_binding`](Self::set_binding)
/// and [`set_define`](Self::set_define) are applied at the start of the
/// next tick. A tick dispatches only when something was queued or a
/// dispatch was requested, awaits it, and hands the result to the
/// completion callback.
pub struct ComputeSystem {
    pipeline: Option<ComputePipeline>,
    bindings: Vec<(String, Vec<f32>)>,
    defines: Vec<(String, f32)>,
    requested: bool,
    on_completed: Option<CompletedCallback>,
}

impl ComputeSystem {
    pub fn new(pipeline: ComputePipeline) -> Self {
        Self {
            pipeline: Some(pipeline),
            bindings: Vec::new(),
            defines: Vec::new(),
            requested: false,
            on_completed: None,
        }
    }

    pub fn on_completed<F>(mut self, callback: F) -> Self
    where
        F: FnMut(Result<Vec<f32>, PipelineError>, &mut ComputePipeline) + Send + 'static,
    {
        self.on_completed = Some(Box::new(callback));
        self
    }

    pub fn set_binding(&mut self, name: &str, data: &[f32]) {
        self.bindings.push((name.to_string(), data.to_vec()));
    }

    pub fn set_define(&mut self, name: &str, value: f32) {
        self.defines.push((name.to_string(), value));
    }

    /// Dispatch on the next tick even if nothing was rebound.
    pub fn request_dispatch(&mut self) {
        self.requested = true;
    }

    /// The pipeline, until the system is torn down.
    pub fn pipeline(&self) -> Option<&ComputePipeline> {
        self.pipeline.as_ref()
    }

    fn has_work(&self) -> bool {
        self.requested || !self.bindings.is_empty() || !self.defines.is_empty()
    }

    async fn run(&mut self) -> Result<(), PipelineError> {
        if !self.has_work() {
            return Ok(());
        }
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Ok(());
        };
        self.requested = false;
        for (name, data) in self.bindings.drain(..) {
            pipeline.bind(&name, &data)?;
        }
        for (name, value) in self.defines.drain(..) {
            pipeline.set_define(&name, value)?;
        }

        let result = pipeline.dispatch().await;
        let outcome = match self.on_completed.as_mut() {
            Some(callback) => {
                callback(result, pipeline);
                Ok(())
            }
            None => result.map(|_| ()),
        };
        if pipeline.state() == PipelineState::Destroyed {
            tracing::debug!(kernel = %pipeline.context().name, "pipeline destroyed by its callback");
            self.pipeline = None;
        }
        outcome
    }
}

impl System for ComputeSystem {
    fn execute(&mut self) -> TickFuture<'_> {
        Box::pin(self.run())
    }

    fn tear_down(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.destroy();
        }
    }
}

/// Owns the systems of a world and drives their lifecycle.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<Box<dyn System>>,
    initialized: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<S: System + 'static>(&mut self, system: S) -> &mut Self {
        self.systems.push(Box::new(system));
        self
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Initialize every system. Later calls do nothing.
    pub fn initialize_all(&mut self) {
        if self.initialized {
            return;
        }
        for system in &mut self.systems {
            system.initialize();
        }
        self.initialized = true;
    }

    /// Execute every system in order, then clean every system up.
    /// The first error is returned after cleanup has run.
    pub async fn tick(&mut self) -> Result<(), PipelineError> {
        self.initialize_all();
        let mut first_error = None;
        for system in &mut self.systems {
            if let Err(e) = system.execute().await {
                tracing::warn!(error = %e, "system failed during tick");
                first_error.get_or_insert(e);
            }
        }
        for system in &mut self.systems {
            system.cleanup();
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Tear every system down and drop it.
    pub fn shutdown(&mut self) {
        for system in &mut self.systems {
            system.tear_down();
        }
        self.systems.clear();
        self.initialized = false;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
