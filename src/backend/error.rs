// Renderer error kinds
//
// Fatal errors only. Out-of-date / suboptimal surfaces are not errors here:
// the frame loop turns them into a rebuild (see frame::FrameOutcome).

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    /// No physical device has graphics + present queues, the swapchain
    /// extension and at least one surface format and present mode
    #[error("No suitable GPU found (need graphics + present queues, VK_KHR_swapchain, surface formats and present modes)")]
    NoSuitableDevice,

    #[error("Failed to load shader {path:?}: {reason}")]
    ShaderLoad { path: PathBuf, reason: String },

    #[error("Validation layer {0} requested, but not available")]
    ValidationLayerUnavailable(String),

    #[error("Failed to acquire swapchain image: {0:?}")]
    AcquireFailed(vk::Result),

    #[error("Failed to submit draw command buffer: {0:?}")]
    SubmitFailed(vk::Result),

    #[error("Failed to present swapchain image: {0:?}")]
    PresentFailed(vk::Result),

    /// Any other Vulkan call that failed
    #[error("{context}: {result:?}")]
    Vulkan {
        context: &'static str,
        result: vk::Result,
    },

    #[error("Window error: {0}")]
    Window(String),
}

pub type RendererResult<T> = Result<T, RendererError>;

/// Attach a short description to a raw `vk::Result` error.
pub trait VkResultExt<T> {
    fn vk_context(self, context: &'static str) -> RendererResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk_context(self, context: &'static str) -> RendererResult<T> {
        self.map_err(|result| RendererError::Vulkan { context, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_context_wraps_result() {
        let failed: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = failed.vk_context("Failed to wait for fence").unwrap_err();
        assert!(matches!(
            err,
            RendererError::Vulkan {
                result: vk::Result::ERROR_DEVICE_LOST,
                ..
            }
        ));
        assert!(err.to_string().starts_with("Failed to wait for fence"));
    }

    #[test]
    fn test_frame_errors_carry_result_code() {
        let err = RendererError::PresentFailed(vk::Result::ERROR_SURFACE_LOST_KHR);
        assert!(err.to_string().contains("ERROR_SURFACE_LOST_KHR"));
    }
}
