// Framebuffers and pre-recorded command buffers
//
// One framebuffer and one command buffer per swapchain image. The content is
// static, so every buffer is recorded once per swapchain and replayed each
// frame.

use ash::vk;
use std::sync::Arc;

use super::error::{RendererResult, VkResultExt};
use super::pipeline::TrianglePipeline;
use super::VulkanDevice;

/// Create framebuffers for each swapchain image view
pub fn create_framebuffers(
    device: &VulkanDevice,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> RendererResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = &[image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(result) => {
                destroy_framebuffers(device, &framebuffers);
                return Err(result).vk_context("Failed to create framebuffer");
            }
        }
    }

    Ok(framebuffers)
}

pub fn destroy_framebuffers(device: &VulkanDevice, framebuffers: &[vk::Framebuffer]) {
    unsafe {
        for &framebuffer in framebuffers {
            device.device.destroy_framebuffer(framebuffer, None);
        }
    }
}

/// Command pool on the graphics family; hands out per-swapchain buffer sets
pub struct CommandRecorder {
    pool: vk::CommandPool,
    clear_color: [f32; 4],
    device: Arc<VulkanDevice>,
}

impl CommandRecorder {
    pub fn new(device: Arc<VulkanDevice>, clear_color: [f32; 4]) -> RendererResult<Self> {
        let pool_info =
            vk::CommandPoolCreateInfo::builder().queue_family_index(device.queue_families.graphics);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .vk_context("Failed to create command pool")?;

        Ok(Self {
            pool,
            clear_color,
            device,
        })
    }

    /// Allocate and record one command buffer per framebuffer
    pub fn record(
        &self,
        pipeline: &TrianglePipeline,
        framebuffers: &[vk::Framebuffer],
        extent: vk::Extent2D,
    ) -> RendererResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.len() as u32);

        let command_buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .vk_context("Failed to allocate command buffers")?;

        for (&cmd, &framebuffer) in command_buffers.iter().zip(framebuffers) {
            if let Err(e) = self.record_one(cmd, pipeline, framebuffer, extent) {
                self.free(&command_buffers);
                return Err(e);
            }
        }

        log::debug!("Recorded {} command buffers", command_buffers.len());
        Ok(command_buffers)
    }

    fn record_one(
        &self,
        cmd: vk::CommandBuffer,
        pipeline: &TrianglePipeline,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) -> RendererResult<()> {
        let device = &self.device.device;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(pipeline.render_pass)
            .framebuffer(framebuffer)
            .render_area(scissor)
            .clear_values(&clear_values);

        // A buffer may be resubmitted while a previous submission is pending
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .vk_context("Failed to begin recording command buffer")?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .vk_context("Failed to record command buffer")?;
        }

        Ok(())
    }

    pub fn free(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.device.device.free_command_buffers(self.pool, command_buffers);
        }
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        // Also frees any buffers still allocated from the pool
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
