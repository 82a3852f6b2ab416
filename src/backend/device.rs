// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layer + debug messenger
// - Presentation surface for the window
// - Physical device selection (first suitable, see capability.rs)
// - Logical device + graphics/present queue retrieval

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr::Surface};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::capability::{self, QueueFamilies, VulkanSurfaceQuery};
use super::error::{RendererError, RendererResult, VkResultExt};
use super::RendererConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles (may alias)
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    // Presentation surface
    pub surface: vk::SurfaceKHR,
    pub surface_loader: Surface,

    // Debug utils (if validation enabled)
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanDevice {
    /// Create instance, surface and device for `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `window` - Window the surface is created for; must outlive the device
    /// * `config` - Validation on/off
    pub fn new<W>(app_name: &str, window: &W, config: &RendererConfig) -> Result<Arc<Self>>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance = Self::create_instance(
            &entry,
            app_name,
            window.raw_display_handle(),
            config.validation_enabled,
        )?;

        // Until the device is assembled, a failed step tears down what exists.
        // Guards drop in reverse order: surface, messenger, instance.
        let instance_guard = TeardownGuard::new({
            let instance = instance.clone();
            move || unsafe { instance.destroy_instance(None) }
        });

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if config.validation_enabled {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };
        let messenger_guard = debug_utils.clone().map(|(debug_utils, messenger)| {
            TeardownGuard::new(move || unsafe {
                debug_utils.destroy_debug_utils_messenger(messenger, None)
            })
        });

        // Step 4: Create surface
        let surface_loader = Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;
        let surface_guard = TeardownGuard::new({
            let surface_loader = surface_loader.clone();
            move || unsafe { surface_loader.destroy_surface(surface, None) }
        });

        // Step 5: Pick physical device (GPU)
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;
        if devices.is_empty() {
            anyhow::bail!("Failed to find GPU(s) with Vulkan support");
        }

        let query = VulkanSurfaceQuery {
            instance: &instance,
            surface_loader: &surface_loader,
            surface,
        };
        let selection = capability::select_physical_device(&devices, &query)?;
        let physical_device = selection.physical_device;
        let queue_families = selection.queue_families;

        // Step 6: Create logical device
        let device = Self::create_logical_device(
            &instance,
            physical_device,
            queue_families,
            config.validation_enabled,
        )?;
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        // Ownership passes to the device from here on
        surface_guard.disarm();
        if let Some(guard) = messenger_guard {
            guard.disarm();
        }
        instance_guard.disarm();

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={}, present={}",
            queue_families.graphics,
            queue_families.present
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            queue_families,
            surface,
            surface_loader,
            debug_utils,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        if enable_validation {
            Self::check_validation_layer_support(entry)?;
        }

        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("No Engine")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Required extensions: whatever the window system needs, plus debug utils
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query required surface extensions")?
            .to_vec();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn check_validation_layer_support(entry: &Entry) -> RendererResult<()> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .vk_context("Failed to enumerate instance layers")?;

        let found = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        if found {
            Ok(())
        } else {
            Err(RendererError::ValidationLayerUnavailable(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            ))
        }
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to set up the debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
        enable_validation: bool,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = capability::required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        // Device layers are deprecated but older loaders still read them
        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RendererResult<()> {
        unsafe { self.device.device_wait_idle() }.vk_context("Failed to wait for device idle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.wait_idle() {
            log::error!("{}", e);
        }

        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Runs a cleanup closure on drop unless disarmed
struct TeardownGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> TeardownGuard<F> {
    fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for TeardownGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("Validation layer: {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("Validation layer: {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("Validation layer: {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
