use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::{Accelerator, RenderDevice};
use crate::renderer::core::error::{HarnessError, HarnessResult};
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::swapchain::{self, Swapchain, SwapchainDesc};
use crate::renderer::platform::PlatformWindow;

/// Vulkan surface of a platform window
pub struct RenderSurface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
}

impl RenderSurface {
    pub fn new(
        instance: &RenderInstance,
        window: &dyn PlatformWindow,
    ) -> Result<Self> {
        let handle = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let loader = ash::khr::surface::Instance::new(&instance.entry, &instance.instance);
        Ok(Self {
            handle,
            loader,
        })
    }

    /// Family that can both render and present to this surface.
    pub fn present_queue_family(&self, accelerator: &Accelerator) -> Result<u32> {
        let supports_present = (0..accelerator.queue_families.len() as u32)
            .map(|index| unsafe {
                self.loader.get_physical_device_surface_support(
                    accelerator.handle,
                    index,
                    self.handle,
                )
            })
            .collect::<VkResult<Vec<bool>>>()?;

        Ok(select_present_family(&accelerator.queue_families, &supports_present)?)
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader.get_physical_device_surface_capabilities(physical_device, self.handle)
        }
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader.get_physical_device_surface_formats(physical_device, self.handle)
        }
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader.get_physical_device_surface_present_modes(physical_device, self.handle)
        }
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

/// Prefers a family that does graphics and present. A device that can only
/// present from a non-graphics family is rejected.
pub fn select_present_family(
    families: &[vk::QueueFamilyProperties],
    supports_present: &[bool],
) -> HarnessResult<u32> {
    let is_graphics = |index: usize| {
        families[index].queue_flags.contains(vk::QueueFlags::GRAPHICS)
    };
    let presents = |index: usize| supports_present.get(index).copied().unwrap_or(false);

    if let Some(index) = (0..families.len()).find(|&i| is_graphics(i) && presents(i)) {
        return Ok(index as u32);
    }

    if !(0..families.len()).any(is_graphics) {
        return Err(HarnessError::NoQueueFamily(vk::QueueFlags::GRAPHICS));
    }
    if (0..families.len()).any(presents) {
        return Err(HarnessError::SeparatePresentQueue);
    }
    Err(HarnessError::NoPresentQueue)
}

/// Presentation target of the renderer, encapsulating the surface and swapchain
pub struct RenderTarget {
    pub swapchain: Swapchain,
    pub surface: RenderSurface,
    pub surface_format: vk::SurfaceFormatKHR,
    pub vsync: bool,
    pub fullscreen: bool,

    format_features: vk::FormatFeatureFlags,
    swapchain_loader: ash::khr::swapchain::Device,
}

impl RenderTarget {
    pub fn new(
        instance: &RenderInstance,
        surface: RenderSurface,
        device: &RenderDevice,
        config: &RenderConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let physical_device = device.accelerator.handle;
        let surface_format = swapchain::choose_surface_format(
            &surface.formats(physical_device)?,
            &swapchain::PREFERRED_FORMATS,
        ).ok_or(HarnessError::NoSurfaceFormat)?;
        let format_features = unsafe {
            instance.instance
                .get_physical_device_format_properties(physical_device, surface_format.format)
                .optimal_tiling_features
        };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance.instance, &device.logical);

        let desc = SwapchainDesc {
            width,
            height,
            vsync: config.vsync,
            fullscreen: config.fullscreen,
            surface_format,
            format_features,
        };
        let swapchain = Swapchain::new(&surface, &swapchain_loader, device, &desc, None)?;

        log::info!(
            "Surface format {:?} / {:?}, present mode {:?}",
            surface_format.format,
            surface_format.color_space,
            swapchain.present_mode,
        );

        Ok(Self {
            swapchain,
            surface,
            surface_format,
            vsync: config.vsync,
            fullscreen: config.fullscreen,
            format_features,
            swapchain_loader,
        })
    }

    /// Builds a replacement chain from the current one. The current chain
    /// stays alive until the caller swaps the result in.
    pub fn create_replacement(
        &self,
        device: &RenderDevice,
        width: u32,
        height: u32,
    ) -> Result<Swapchain> {
        let desc = SwapchainDesc {
            width,
            height,
            vsync: self.vsync,
            fullscreen: self.fullscreen,
            surface_format: self.surface_format,
            format_features: self.format_features,
        };
        Swapchain::new(
            &self.surface,
            &self.swapchain_loader,
            device,
            &desc,
            Some(&self.swapchain),
        )
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn picks_family_with_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(select_present_family(&families, &[true, false, true]).unwrap(), 2);
    }

    #[test]
    fn separate_present_family_is_rejected() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::COMPUTE)];
        assert!(matches!(
            select_present_family(&families, &[false, true]),
            Err(HarnessError::SeparatePresentQueue)
        ));
    }

    #[test]
    fn missing_present_support_is_fatal() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(matches!(
            select_present_family(&families, &[false]),
            Err(HarnessError::NoPresentQueue)
        ));

        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert!(matches!(
            select_present_family(&compute_only, &[true]),
            Err(HarnessError::NoQueueFamily(_))
        ));
    }
}
