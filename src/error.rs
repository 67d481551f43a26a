//! Crate-wide error type.
use ash::vk;

/// Whether a presentation call returned early in a degraded state that still succeeded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PresentStatus {
    /// The image was presented normally.
    Optimal,
    /// The image was presented, but the swapchain no longer matches the surface exactly
    /// (e.g. after a resize) and should be recreated before the next frame.
    Suboptimal,
}

/// Errors produced by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A device memory allocation failed.
    #[error("allocation failed: {0:?}")]
    Allocate(vk::Result),

    /// The render graph passed to the compiler is invalid (dangling reference, type mismatch,
    /// use of a destroyed node, cycle through a `converge`, etc.).
    #[error("invalid render graph: {0}")]
    RenderGraph(String),

    /// A Vulkan API call returned an error result.
    #[error("vulkan error: {0:?}")]
    Vulkan(vk::Result),

    /// A present operation failed outright (as opposed to returning a [`PresentStatus::Suboptimal`]).
    #[error("present failed: {0:?}")]
    Present(vk::Result),
}

impl From<vk::Result> for Error {
    fn from(r: vk::Result) -> Self {
        Error::Vulkan(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_result_converts_to_the_vulkan_variant() {
        let err: Error = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, Error::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
    }

    #[test]
    fn render_graph_errors_carry_their_message() {
        let err = Error::RenderGraph("dangling reference".to_string());
        assert_eq!(err.to_string(), "invalid render graph: dangling reference");
    }
}
