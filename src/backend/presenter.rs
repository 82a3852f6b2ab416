// Presenter - the Vulkan side of the frame loop
//
// Owns everything that draws into the window:
// - Device-lifetime: pipeline, command pool, frame sync slots
// - Swapchain-lifetime: swapchain + image views, framebuffers, command buffers
//
// The swapchain-lifetime group is created and destroyed as one unit
// (`SwapchainBundle`), always in the same order.

use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::capability::{SurfaceQuery, SwapchainPlan, VulkanSurfaceQuery};
use super::commands::{create_framebuffers, destroy_framebuffers, CommandRecorder};
use super::error::{RendererResult, VkResultExt};
use super::frame::FrameBackend;
use super::pipeline::TrianglePipeline;
use super::shader::ShaderBlob;
use super::sync::FrameSyncSet;
use super::{RendererConfig, Swapchain, VulkanDevice};

/// Resources that only live as long as one swapchain
struct SwapchainBundle {
    swapchain: Swapchain,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl SwapchainBundle {
    fn build(
        device: &Arc<VulkanDevice>,
        plan: &SwapchainPlan,
        pipeline: &TrianglePipeline,
        recorder: &CommandRecorder,
    ) -> RendererResult<Self> {
        let swapchain = Swapchain::new(device.clone(), plan)?;

        let framebuffers = create_framebuffers(
            device,
            &swapchain.image_views,
            pipeline.render_pass,
            swapchain.extent,
        )?;

        let command_buffers = match recorder.record(pipeline, &framebuffers, swapchain.extent) {
            Ok(buffers) => buffers,
            Err(e) => {
                destroy_framebuffers(device, &framebuffers);
                return Err(e);
            }
        };

        let bundle = Self {
            swapchain,
            framebuffers,
            command_buffers,
        };
        debug_assert!(bundle.is_consistent());
        Ok(bundle)
    }

    /// One framebuffer and one command buffer per image
    fn is_consistent(&self) -> bool {
        let images = self.swapchain.image_count();
        self.framebuffers.len() == images && self.command_buffers.len() == images
    }

    /// Framebuffers, then command buffers, then the swapchain (views first)
    fn destroy(self, device: &VulkanDevice, recorder: &CommandRecorder) {
        destroy_framebuffers(device, &self.framebuffers);
        recorder.free(&self.command_buffers);
        drop(self.swapchain);
    }
}

pub struct Presenter {
    bundle: Option<SwapchainBundle>,
    pipeline: TrianglePipeline,
    recorder: CommandRecorder,
    sync: FrameSyncSet,
    vertex: ShaderBlob,
    fragment: ShaderBlob,
    frame_cap_enabled: bool,
    device: Arc<VulkanDevice>,
}

impl Presenter {
    /// Load shaders and build the whole presentation chain for `window_size`
    pub fn new(
        device: Arc<VulkanDevice>,
        config: &RendererConfig,
        window_size: vk::Extent2D,
    ) -> RendererResult<Self> {
        let vertex = ShaderBlob::load(&config.vertex_shader)?;
        let fragment = ShaderBlob::load(&config.fragment_shader)?;

        let plan = plan_swapchain(&device, window_size, config.frame_cap_enabled)?;

        let pipeline = TrianglePipeline::new(
            device.clone(),
            plan.surface_format.format,
            &vertex,
            &fragment,
        )?;
        let recorder = CommandRecorder::new(device.clone(), config.clear_color)?;
        let sync = FrameSyncSet::new(device.clone(), config.frames_in_flight)?;
        let bundle = SwapchainBundle::build(&device, &plan, &pipeline, &recorder)?;

        Ok(Self {
            bundle: Some(bundle),
            pipeline,
            recorder,
            sync,
            vertex,
            fragment,
            frame_cap_enabled: config.frame_cap_enabled,
            device,
        })
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.bundle.as_ref().map(|b| b.swapchain.extent)
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.bundle.as_ref().map(|b| b.swapchain.present_mode)
    }
}

fn plan_swapchain(
    device: &VulkanDevice,
    window_size: vk::Extent2D,
    frame_cap_enabled: bool,
) -> RendererResult<SwapchainPlan> {
    let query = VulkanSurfaceQuery {
        instance: &device.instance,
        surface_loader: &device.surface_loader,
        surface: device.surface,
    };
    let support = query.swapchain_support(device.physical_device)?;
    Ok(support.plan(window_size, frame_cap_enabled, device.queue_families))
}

impl FrameBackend for Presenter {
    fn image_count(&self) -> usize {
        self.bundle
            .as_ref()
            .map_or(0, |b| b.swapchain.image_count())
    }

    fn frames_in_flight(&self) -> usize {
        self.sync.slots.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.sync.wait(slot)
    }

    fn reset_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.sync.reset(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> VkResult<(u32, bool)> {
        // No swapchain (a previous rebuild was cut short): ask for another one
        let Some(bundle) = &self.bundle else {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        };
        bundle
            .swapchain
            .acquire_next_image(u64::MAX, self.sync.slots[slot].image_available)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> VkResult<()> {
        let bundle = self
            .bundle
            .as_ref()
            .ok_or(vk::Result::ERROR_OUT_OF_DATE_KHR)?;
        let sync = &self.sync.slots[slot];

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [bundle.command_buffers[image_index as usize]];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VkResult<bool> {
        let bundle = self
            .bundle
            .as_ref()
            .ok_or(vk::Result::ERROR_OUT_OF_DATE_KHR)?;

        bundle.swapchain.present(
            self.device.present_queue,
            image_index,
            &[self.sync.slots[slot].render_finished],
        )
    }

    fn wait_present_idle(&mut self) -> RendererResult<()> {
        unsafe { self.device.device.queue_wait_idle(self.device.present_queue) }
            .vk_context("Failed to wait for present queue")
    }

    fn wait_device_idle(&mut self) -> RendererResult<()> {
        self.device.wait_idle()
    }

    fn rebuild(&mut self, window_size: vk::Extent2D) -> RendererResult<()> {
        self.device.wait_idle()?;

        if let Some(bundle) = self.bundle.take() {
            bundle.destroy(&self.device, &self.recorder);
        }

        let plan = plan_swapchain(&self.device, window_size, self.frame_cap_enabled)?;

        if plan.invalidates_pipeline(self.pipeline.format) {
            log::info!(
                "Surface format changed {:?} -> {:?}, rebuilding pipeline",
                self.pipeline.format,
                plan.surface_format.format
            );
            self.pipeline = TrianglePipeline::new(
                self.device.clone(),
                plan.surface_format.format,
                &self.vertex,
                &self.fragment,
            )?;
        }

        self.bundle = Some(SwapchainBundle::build(
            &self.device,
            &plan,
            &self.pipeline,
            &self.recorder,
        )?);

        Ok(())
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("{}", e);
        }
        if let Some(bundle) = self.bundle.take() {
            bundle.destroy(&self.device, &self.recorder);
        }
        // Remaining fields drop in declaration order: pipeline, pool, sync
    }
}
