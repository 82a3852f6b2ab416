// Capability layer - device and swapchain selection policy
//
// Everything here is a pure function of query results. The queries themselves
// go through `SurfaceQuery`, so selection can run against a real surface or a
// headless stub.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use std::ffi::CStr;

use super::error::{RendererResult, VkResultExt};
use super::RendererError;

/// Surface format we ask for when the driver lets us choose
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Device extensions every candidate GPU must expose
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [SwapchainLoader::name()]
}

/// Read-only capability queries against one presentation surface.
pub trait SurfaceQuery {
    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> RendererResult<bool>;
    fn device_extensions(&self, device: vk::PhysicalDevice) -> RendererResult<Vec<String>>;
    fn swapchain_support(&self, device: vk::PhysicalDevice) -> RendererResult<SwapchainSupport>;
}

/// `SurfaceQuery` backed by a live instance and surface
pub struct VulkanSurfaceQuery<'a> {
    pub instance: &'a ash::Instance,
    pub surface_loader: &'a Surface,
    pub surface: vk::SurfaceKHR,
}

impl SurfaceQuery for VulkanSurfaceQuery<'_> {
    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe { self.instance.get_physical_device_queue_family_properties(device) }
    }

    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> RendererResult<bool> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(device, family, self.surface)
        }
        .vk_context("Failed to query surface support")
    }

    fn device_extensions(&self, device: vk::PhysicalDevice) -> RendererResult<Vec<String>> {
        let properties = unsafe { self.instance.enumerate_device_extension_properties(device) }
            .vk_context("Failed to enumerate device extensions")?;

        Ok(properties
            .iter()
            .map(|p| {
                unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect())
    }

    fn swapchain_support(&self, device: vk::PhysicalDevice) -> RendererResult<SwapchainSupport> {
        unsafe {
            Ok(SwapchainSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(device, self.surface)
                    .vk_context("Failed to query surface capabilities")?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(device, self.surface)
                    .vk_context("Failed to query surface formats")?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(device, self.surface)
                    .vk_context("Failed to query present modes")?,
            })
        }
    }
}

// =============================================================================
// QUEUE FAMILIES
// =============================================================================

/// Partially resolved queue family roles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Fully resolved queue family roles. `graphics` and `present` may alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Scan queue families once; the first family matching each role wins.
pub fn find_queue_families(
    device: vk::PhysicalDevice,
    query: &impl SurfaceQuery,
) -> RendererResult<QueueFamilyIndices> {
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in query.queue_families(device).iter().enumerate() {
        let index = index as u32;

        if family.queue_count > 0 {
            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }
            if indices.present.is_none() && query.supports_present(device, index)? {
                indices.present = Some(index);
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

// =============================================================================
// PHYSICAL DEVICE
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PhysicalDeviceSelection {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
}

/// First device in enumeration order that passes every filter. No scoring.
pub fn select_physical_device(
    devices: &[vk::PhysicalDevice],
    query: &impl SurfaceQuery,
) -> RendererResult<PhysicalDeviceSelection> {
    for &device in devices {
        if let Some(queue_families) = check_device(device, query)? {
            return Ok(PhysicalDeviceSelection {
                physical_device: device,
                queue_families,
            });
        }
    }

    Err(RendererError::NoSuitableDevice)
}

fn check_device(
    device: vk::PhysicalDevice,
    query: &impl SurfaceQuery,
) -> RendererResult<Option<QueueFamilies>> {
    let Some(queue_families) = find_queue_families(device, query)?.resolve() else {
        log::debug!("Device {:?} rejected: missing graphics or present queue", device);
        return Ok(None);
    };

    let available = query.device_extensions(device)?;
    let missing = required_device_extensions()
        .into_iter()
        .map(|name| name.to_string_lossy())
        .find(|name| !available.iter().any(|a| a == name));
    if let Some(name) = missing {
        log::debug!("Device {:?} rejected: missing extension {}", device, name);
        return Ok(None);
    }

    let support = query.swapchain_support(device)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        log::debug!("Device {:?} rejected: no surface formats or present modes", device);
        return Ok(None);
    }

    Ok(Some(queue_families))
}

// =============================================================================
// SWAPCHAIN POLICY
// =============================================================================

/// Surface query results for one device
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// How swapchain images are shared between the graphics and present families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSharing {
    Exclusive,
    Concurrent([u32; 2]),
}

impl ImageSharing {
    pub fn mode(&self) -> vk::SharingMode {
        match self {
            ImageSharing::Exclusive => vk::SharingMode::EXCLUSIVE,
            ImageSharing::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn family_indices(&self) -> &[u32] {
        match self {
            ImageSharing::Exclusive => &[],
            ImageSharing::Concurrent(indices) => indices,
        }
    }
}

/// Everything needed to create a swapchain, decided up front
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub sharing: ImageSharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainSupport {
    pub fn plan(
        &self,
        window_size: vk::Extent2D,
        frame_cap_enabled: bool,
        queue_families: QueueFamilies,
    ) -> SwapchainPlan {
        SwapchainPlan {
            image_count: choose_image_count(&self.capabilities),
            surface_format: choose_surface_format(&self.formats),
            present_mode: choose_present_mode(&self.present_modes, frame_cap_enabled),
            extent: choose_extent(&self.capabilities, window_size),
            sharing: choose_sharing(queue_families),
            pre_transform: self.capabilities.current_transform,
        }
    }
}

impl SwapchainPlan {
    /// The render pass is tied to the attachment format; extent and image
    /// count changes never invalidate it.
    pub fn invalidates_pipeline(&self, pipeline_format: vk::Format) -> bool {
        self.surface_format.format != pipeline_format
    }
}

/// Exact preferred pair wins; a lone UNDEFINED entry means "anything goes";
/// otherwise take what the driver listed first.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            return PREFERRED_SURFACE_FORMAT;
        }
    }

    available
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| available.first().copied())
        .unwrap_or(PREFERRED_SURFACE_FORMAT)
}

/// FIFO by default, MAILBOX when available. With the frame cap disabled a
/// non-MAILBOX choice is replaced by IMMEDIATE (if the surface offers it).
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    frame_cap_enabled: bool,
) -> vk::PresentModeKHR {
    let chosen = if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    };

    if !frame_cap_enabled && chosen != vk::PresentModeKHR::MAILBOX {
        if available.contains(&vk::PresentModeKHR::IMMEDIATE) {
            return vk::PresentModeKHR::IMMEDIATE;
        }
        log::warn!("Frame cap disabled but IMMEDIATE is not supported, staying on {:?}", chosen);
    }

    chosen
}

/// `current_extent.width == u32::MAX` means the swapchain decides: clamp the
/// window size into the allowed range. Otherwise the surface dictates.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: window_size.width.max(min.width).min(max.width),
        height: window_size.height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, capped by the maximum (0 = unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        wanted.min(capabilities.max_image_count)
    } else {
        wanted
    }
}

pub fn choose_sharing(queue_families: QueueFamilies) -> ImageSharing {
    if queue_families.graphics != queue_families.present {
        ImageSharing::Concurrent([queue_families.graphics, queue_families.present])
    } else {
        ImageSharing::Exclusive
    }
}
