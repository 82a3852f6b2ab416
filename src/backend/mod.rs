pub mod capability;
pub mod commands;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod presenter;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use error::RendererError;
pub use frame::{FrameLoop, FrameOutcome, SurfaceEvent};
pub use presenter::Presenter;
pub use swapchain::Swapchain;

use std::path::PathBuf;

/// Renderer settings, resolved from the user config once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub validation_enabled: bool,
    /// Keep presentation vsync-bound (FIFO/MAILBOX only)
    pub frame_cap_enabled: bool,
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}
