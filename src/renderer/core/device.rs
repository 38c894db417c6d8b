use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::command::CommandPool;
use crate::renderer::core::error::{HarnessError, HarnessResult};
use crate::renderer::core::memory;
use crate::renderer::core::queue::{negotiate_queue_families, Queue, QueueFamilyIndices};
use crate::renderer::payload::RenderPayload;

/// Snapshot of a physical device, queried once at startup
#[derive(Clone)]
pub struct Accelerator {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub supported_extensions: Vec<CString>,
}

impl Accelerator {
    pub fn query(
        instance: &ash::Instance,
        handle: vk::PhysicalDevice,
    ) -> Result<Self> {
        let (
            properties,
            features,
            memory_properties,
            queue_families,
            extension_properties,
        ) = unsafe {
            (
                instance.get_physical_device_properties(handle),
                instance.get_physical_device_features(handle),
                instance.get_physical_device_memory_properties(handle),
                instance.get_physical_device_queue_family_properties(handle),
                instance.enumerate_device_extension_properties(handle)?,
            )
        };

        let supported_extensions = extension_properties
            .iter()
            .map(|ext| ext.extension_name_as_c_str().map(CStr::to_owned))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            handle,
            properties,
            features,
            memory_properties,
            queue_families,
            supported_extensions,
        })
    }

    pub fn name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("<unnamed>"))
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::OTHER => "Other",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Unknown",
        }
    }

    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.supported_extensions.iter().any(|ext| ext.as_c_str() == name)
    }

    pub fn find_memory_type_index(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        memory::find_memory_type_index(&self.memory_properties, type_bits, properties)
    }
}

pub fn enumerate_accelerators(instance: &ash::Instance) -> Result<Vec<Accelerator>> {
    let handles = unsafe {
        instance.enumerate_physical_devices()?
    };
    handles
        .into_iter()
        .map(|handle| Accelerator::query(instance, handle))
        .collect()
}

/// Takes the preferred device, falling back to the first one when the index is out of range.
pub fn select_accelerator<T>(
    mut accelerators: Vec<T>,
    preferred: Option<usize>,
) -> HarnessResult<T> {
    if accelerators.is_empty() {
        return Err(HarnessError::NoDevice);
    }

    let index = match preferred {
        Some(index) if index < accelerators.len() => index,
        Some(index) => {
            log::warn!(
                "Selected device index {} is out of range, reverting to device 0 (use --listgpus to show available devices)",
                index
            );
            0
        }
        None => 0,
    };

    Ok(accelerators.swap_remove(index))
}

/// One human readable block per device, used by `--listgpus`
pub fn describe_accelerators(accelerators: &[Accelerator]) -> Vec<String> {
    accelerators
        .iter()
        .enumerate()
        .map(|(index, accelerator)| {
            let (major, minor, patch) = accelerator.api_version();
            format!(
                "Device [{}] : {}\n Type: {}\n API: {}.{}.{}",
                index,
                accelerator.name(),
                accelerator.device_type_name(),
                major,
                minor,
                patch,
            )
        })
        .collect()
}

/// Only major and minor count, any patch level of the requested version will do.
fn check_api_version(supported: (u32, u32, u32), requested: u32) -> HarnessResult<()> {
    let required = (vk::api_version_major(requested), vk::api_version_minor(requested));
    if (supported.0, supported.1) < required {
        return Err(HarnessError::UnsupportedApiVersion {
            major: required.0,
            minor: required.1,
        });
    }
    Ok(())
}

/// What the logical device has to provide
pub struct DeviceRequest {
    pub api_version: u32,
    pub queues: vk::QueueFlags,
    pub features: vk::PhysicalDeviceFeatures,
    pub extensions: Vec<&'static CStr>,
    /// Family that presents to the surface. Enables the swapchain extension.
    pub present_family: Option<u32>,
    pub requires_stencil: bool,
}

/// Logical device with its queues and the default command pool
pub struct RenderDevice {
    pub command_pool: CommandPool,
    pub graphics_queue: Queue,
    pub depth_format: vk::Format,
    pub accelerator: Accelerator,
    pub logical: Arc<ash::Device>,
}

impl RenderDevice {
    pub fn new(
        instance: &ash::Instance,
        accelerator: Accelerator,
        request: &DeviceRequest,
        payload: &mut dyn RenderPayload,
    ) -> Result<Self> {
        check_api_version(accelerator.api_version(), request.api_version)?;

        let queue_families = Self::negotiate_queues(&accelerator, request)?;
        let enabled_extensions = Self::resolve_extensions(&accelerator, request)?;

        let depth_format = memory::supported_depth_format(request.requires_stencil, |format| {
            let props = unsafe {
                instance.get_physical_device_format_properties(accelerator.handle, format)
            };
            props.optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        }).ok_or(HarnessError::NoDepthFormat)?;

        let queue_priorities = [1.0];
        let queue_create_infos = queue_families
            .unique()
            .iter()
            .map(|&index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(index)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let enabled_extension_names = enabled_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let logical = {
            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&enabled_extension_names)
                .enabled_features(&request.features);
            let device_create_info = payload.extend_device_info(device_create_info);

            let created = unsafe {
                instance.create_device(accelerator.handle, &device_create_info, None)
            };
            created.map_err(HarnessError::DeviceCreation)?
        };
        let logical = Arc::new(logical);

        let graphics_queue = unsafe {
            Queue::new(queue_families.graphics, logical.get_device_queue(queue_families.graphics, 0))
        };

        let command_pool = match CommandPool::new(&logical, graphics_queue.family_index, true) {
            Ok(pool) => pool,
            Err(err) => {
                unsafe {
                    logical.destroy_device(None);
                }
                return Err(err.into());
            }
        };

        log::info!(
            "Using {} ({}), queue families {:?}, depth format {:?}",
            accelerator.name(),
            accelerator.device_type_name(),
            queue_families,
            depth_format,
        );
        log::debug!("Enabled device extensions: {:?}", enabled_extensions);

        Ok(Self {
            command_pool,
            graphics_queue,
            depth_format,
            accelerator,
            logical,
        })
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    pub fn find_memory_type_index(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> HarnessResult<u32> {
        self.accelerator
            .find_memory_type_index(type_bits, properties)
            .ok_or(HarnessError::NoMemoryType { type_bits, properties })
    }

    /// The presenting family replaces the graphics family, so everything that
    /// aliased graphics keeps aliasing it.
    fn negotiate_queues(
        accelerator: &Accelerator,
        request: &DeviceRequest,
    ) -> HarnessResult<QueueFamilyIndices> {
        let mut families = negotiate_queue_families(&accelerator.queue_families, request.queues)?;
        if let Some(present_family) = request.present_family {
            let graphics = families.graphics;
            for index in [&mut families.graphics, &mut families.compute, &mut families.transfer] {
                if *index == graphics {
                    *index = present_family;
                }
            }
        }
        Ok(families)
    }

    fn resolve_extensions(
        accelerator: &Accelerator,
        request: &DeviceRequest,
    ) -> HarnessResult<Vec<CString>> {
        let mut extensions = Vec::new();

        if request.present_family.is_some() {
            if !accelerator.supports_extension(ash::khr::swapchain::NAME) {
                return Err(HarnessError::MissingDeviceExtension(
                    ash::khr::swapchain::NAME.to_string_lossy().into_owned(),
                ));
            }
            extensions.push(ash::khr::swapchain::NAME.to_owned());
        }

        #[cfg(target_os = "macos")]
        if accelerator.supports_extension(ash::khr::portability_subset::NAME) {
            extensions.push(ash::khr::portability_subset::NAME.to_owned());
        }

        for ext in &request.extensions {
            if !accelerator.supports_extension(ext) {
                log::warn!("Enabled device extension {:?} is not present at device level", ext);
                continue;
            }
            if !extensions.iter().any(|enabled| enabled.as_c_str() == *ext) {
                extensions.push((*ext).to_owned());
            }
        }

        Ok(extensions)
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        self.command_pool.destroy();
        unsafe {
            self.logical.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accelerator(name: &str, device_type: vk::PhysicalDeviceType) -> Accelerator {
        let mut properties = vk::PhysicalDeviceProperties {
            device_type,
            api_version: vk::make_api_version(0, 1, 3, 250),
            ..Default::default()
        };
        for (dst, src) in properties.device_name.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }

        Accelerator {
            handle: vk::PhysicalDevice::null(),
            properties,
            features: Default::default(),
            memory_properties: Default::default(),
            queue_families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 1,
                ..Default::default()
            }],
            supported_extensions: vec![ash::khr::swapchain::NAME.to_owned()],
        }
    }

    fn request(present_family: Option<u32>, extensions: Vec<&'static CStr>) -> DeviceRequest {
        DeviceRequest {
            api_version: vk::API_VERSION_1_0,
            queues: vk::QueueFlags::GRAPHICS,
            features: Default::default(),
            extensions,
            present_family,
            requires_stencil: false,
        }
    }

    #[test]
    fn empty_device_list_is_fatal() {
        let err = select_accelerator(Vec::<u32>::new(), None).unwrap_err();
        assert!(err.to_string().contains("No device"));
    }

    #[test]
    fn api_version_needs_major_and_minor() {
        assert!(check_api_version((1, 3, 0), vk::API_VERSION_1_3).is_ok());
        assert!(check_api_version((1, 4, 309), vk::API_VERSION_1_3).is_ok());
        assert!(check_api_version((1, 0, 0), vk::API_VERSION_1_0).is_ok());

        let err = check_api_version((1, 2, 250), vk::API_VERSION_1_3).unwrap_err();
        assert!(matches!(err, HarnessError::UnsupportedApiVersion { major: 1, minor: 3 }));
    }

    #[test]
    fn selects_preferred_or_first() {
        assert_eq!(select_accelerator(vec![10, 11, 12], None).unwrap(), 10);
        assert_eq!(select_accelerator(vec![10, 11, 12], Some(2)).unwrap(), 12);
        assert_eq!(select_accelerator(vec![10, 11, 12], Some(7)).unwrap(), 10);
    }

    #[test]
    fn describes_devices() {
        let list = describe_accelerators(&[
            accelerator("Fake GPU", vk::PhysicalDeviceType::DISCRETE_GPU),
            accelerator("Soft", vk::PhysicalDeviceType::CPU),
        ]);

        assert_eq!(list.len(), 2);
        assert_eq!(list[0], "Device [0] : Fake GPU\n Type: Discrete GPU\n API: 1.3.250");
        assert!(list[1].starts_with("Device [1] : Soft\n Type: CPU"));
    }

    #[test]
    fn unsupported_extensions_are_dropped() {
        let gpu = accelerator("Fake GPU", vk::PhysicalDeviceType::DISCRETE_GPU);
        let extensions = RenderDevice::resolve_extensions(
            &gpu,
            &request(Some(0), vec![ash::khr::swapchain::NAME, ash::ext::mesh_shader::NAME]),
        ).unwrap();

        assert_eq!(extensions, vec![ash::khr::swapchain::NAME.to_owned()]);
    }

    #[test]
    fn swapchain_only_enabled_for_presentation() {
        let gpu = accelerator("Fake GPU", vk::PhysicalDeviceType::DISCRETE_GPU);
        let extensions = RenderDevice::resolve_extensions(&gpu, &request(None, Vec::new())).unwrap();
        assert!(extensions.is_empty());

        let mut headless = gpu.clone();
        headless.supported_extensions.clear();
        assert!(matches!(
            RenderDevice::resolve_extensions(&headless, &request(Some(0), Vec::new())),
            Err(HarnessError::MissingDeviceExtension(_))
        ));
    }

    #[test]
    fn present_family_replaces_graphics_aliases() {
        let mut gpu = accelerator("Fake GPU", vk::PhysicalDeviceType::DISCRETE_GPU);
        gpu.queue_families.push(gpu.queue_families[0]);

        let families = RenderDevice::negotiate_queues(&gpu, &request(Some(1), Vec::new())).unwrap();

        assert_eq!(families, QueueFamilyIndices { graphics: 1, compute: 1, transfer: 1 });
    }
}
