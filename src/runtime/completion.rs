//! The handle a dispatch returns: a future resolving to the output array.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use super::device::{CompletionSignal, Device, ReadRegion, ResourceId};
use super::pipeline::{DispatchStatus, PipelineState};
use crate::addressing::{unpack_buffer, unpack_texels, TextureLayout};
use crate::context::ElementFormat;
use crate::error::{DeviceError, PipelineError, UsageError};

/// How the output binding is laid out in device memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputLayout {
    Buffer {
        format: ElementFormat,
        elements: usize,
    },
    Texture(TextureLayout),
}

impl OutputLayout {
    /// Floats the device holds for the output.
    fn raw_len(&self) -> usize {
        match self {
            OutputLayout::Buffer { format, elements } => elements * format.std430_stride(),
            OutputLayout::Texture(layout) => {
                layout.size.texel_count() * crate::addressing::TEXEL_CHANNELS
            }
        }
    }

    fn unpack(&self, raw: &[f32]) -> Vec<f32> {
        match self {
            OutputLayout::Buffer { format, elements } => unpack_buffer(raw, *format, *elements),
            OutputLayout::Texture(layout) => unpack_texels(raw, layout),
        }
    }
}

/// Everything needed to turn a finished submission into a result.
pub(crate) struct Readback {
    pub(crate) kernel: String,
    pub(crate) device: Arc<dyn Device>,
    pub(crate) output: ResourceId,
    pub(crate) layout: OutputLayout,
    pub(crate) status: Arc<Mutex<DispatchStatus>>,
}

impl Readback {
    fn finish(
        self,
        outcome: Result<Result<(), DeviceError>, tokio::sync::oneshot::error::RecvError>,
    ) -> Result<Vec<f32>, PipelineError> {
        let mut status = self.status.lock();
        if status.state == PipelineState::Destroyed {
            return Err(UsageError::Destroyed {
                kernel: self.kernel,
            }
            .into());
        }

        let result = match outcome {
            Ok(Ok(())) => self
                .device
                .read_back(self.output, ReadRegion::whole(self.layout.raw_len()))
                .map(|raw| self.layout.unpack(&raw))
                .map_err(PipelineError::from),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(DeviceError::Lost.into()),
        };

        status.state = match &result {
            Ok(_) => PipelineState::Completed,
            Err(_) => PipelineState::Failed,
        };
        match &result {
            Ok(values) => tracing::info!(kernel = %self.kernel, values = values.len(), "dispatch completed"),
            Err(e) => tracing::warn!(kernel = %self.kernel, error = %e, "dispatch failed"),
        }
        result
    }
}

enum Inner {
    Ready(Result<Vec<f32>, PipelineError>),
    Pending {
        signal: CompletionSignal,
        readback: Readback,
    },
    Done,
}

/// Resolves once the dispatch finished, with the unpacked output array
/// (`output elements × components` floats) or the error that stopped it.
///
/// Dropping an unresolved `Completion` does not cancel the work; the
/// pipeline stays dispatched until it is destroyed.
#[must_use = "a dispatch only reports its result through the Completion"]
pub struct Completion {
    inner: Inner,
}

impl Completion {
    pub(crate) fn pending(signal: CompletionSignal, readback: Readback) -> Self {
        Self {
            inner: Inner::Pending { signal, readback },
        }
    }

    pub(crate) fn failed(error: impl Into<PipelineError>) -> Self {
        Self {
            inner: Inner::Ready(Err(error.into())),
        }
    }

    /// Block the current thread until the dispatch resolves.
    pub fn wait(self) -> Result<Vec<f32>, PipelineError> {
        pollster::block_on(self)
    }
}

impl Future for Completion {
    type Output = Result<Vec<f32>, PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match std::mem::replace(&mut self.inner, Inner::Done) {
            Inner::Ready(result) => Poll::Ready(result),
            Inner::Pending {
                mut signal,
                readback,
            } => match Pin::new(&mut signal).poll(cx) {
                Poll::Ready(outcome) => Poll::Ready(readback.finish(outcome)),
                Poll::Pending => {
                    self.inner = Inner::Pending { signal, readback };
                    Poll::Pending
                }
            },
            Inner::Done => panic!("`Completion` polled after it resolved"),
        }
    }
}
