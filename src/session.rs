use std::path::Path;

use ort::{ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
}

pub(crate) const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

fn dispatch(provider: ExecutionProvider) -> Option<ExecutionProviderDispatch> {
    match provider {
        ExecutionProvider::Default => None,
        #[cfg(feature = "coreml")]
        ExecutionProvider::CoreML => Some(ort::CoreMLExecutionProvider::default().build()),
        #[cfg(feature = "cuda")]
        ExecutionProvider::Cuda => Some(ort::CUDAExecutionProvider::default().build()),
    }
}

/// Loads an ONNX model. Providers are tried in order; ort falls back to the CPU.
#[instrument(level = "debug", skip(providers))]
pub(crate) fn load(
    path: &Path,
    threads: usize,
    providers: &[ExecutionProvider],
) -> ort::Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_parallel_execution(true)?
        .with_inter_threads(threads)?
        .with_intra_threads(threads)?
        .with_execution_providers(providers.iter().copied().filter_map(dispatch))?
        .commit_from_file(path)?;

    log::debug!("{} inputs: {:?}", path.display(), session.inputs);
    log::debug!("{} outputs: {:?}", path.display(), session.outputs);

    Ok(session)
}
