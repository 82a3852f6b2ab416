// Synchronization primitives
//
// One set per frame slot: the semaphores order acquire -> submit -> present
// on the GPU, the fence lets the CPU know a slot can be reused.

use ash::vk;
use std::sync::Arc;

use super::error::{RendererResult, VkResultExt};
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    /// Signaled by acquire, waited on by submit
    pub image_available: vk::Semaphore,
    /// Signaled by submit, waited on by present
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> RendererResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        unsafe {
            let image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .vk_context("Failed to create semaphores")?;
            let render_finished = match device.device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(result) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(result).vk_context("Failed to create semaphores");
                }
            };
            let in_flight_fence = match device.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(result) => {
                    device.device.destroy_semaphore(render_finished, None);
                    device.device.destroy_semaphore(image_available, None);
                    return Err(result).vk_context("Failed to create fence");
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// All frame slots. Created once, survives swapchain rebuilds.
pub struct FrameSyncSet {
    pub slots: Vec<FrameSync>,
    device: Arc<VulkanDevice>,
}

impl FrameSyncSet {
    /// At least one slot is always created
    pub fn new(device: Arc<VulkanDevice>, frames_in_flight: usize) -> RendererResult<Self> {
        let frames_in_flight = frames_in_flight.max(1);
        let mut set = Self {
            slots: Vec::with_capacity(frames_in_flight),
            device,
        };
        for _ in 0..frames_in_flight {
            let sync = FrameSync::new(&set.device)?;
            set.slots.push(sync);
        }

        log::debug!("Created {} frame sync slots", frames_in_flight);
        Ok(set)
    }

    pub fn wait(&self, slot: usize) -> RendererResult<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.slots[slot].in_flight_fence], true, u64::MAX)
        }
        .vk_context("Failed to wait for in-flight fence")
    }

    pub fn reset(&self, slot: usize) -> RendererResult<()> {
        unsafe { self.device.device.reset_fences(&[self.slots[slot].in_flight_fence]) }
            .vk_context("Failed to reset in-flight fence")
    }
}

impl Drop for FrameSyncSet {
    fn drop(&mut self) {
        for sync in &self.slots {
            sync.destroy(&self.device.device);
        }
    }
}
