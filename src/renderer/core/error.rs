use ash::vk;
use thiserror::Error;
use crate::renderer::core::frame::SlotState;

/// Fatal failures of device bring-up and the frame loop.
///
/// Transient presentation states (out of date, suboptimal) are not errors,
/// see [`SurfaceState`](crate::renderer::core::swapchain::SurfaceState).
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("No device with Vulkan support found")]
    NoDevice,

    #[error("No queue family supports {0:?}")]
    NoQueueFamily(vk::QueueFlags),

    #[error("Could not find a presenting queue")]
    NoPresentQueue,

    #[error("Separate graphics and presenting queues are not supported yet")]
    SeparatePresentQueue,

    #[error("Selected GPU does not support Vulkan {major}.{minor}")]
    UnsupportedApiVersion { major: u32, minor: u32 },

    #[error("Required device extension {0} is not supported")]
    MissingDeviceExtension(String),

    #[error("No supported depth format found")]
    NoDepthFormat,

    #[error("Surface reports no supported formats")]
    NoSurfaceFormat,

    #[error("No memory type matches type bits {type_bits:#b} with {properties:?}")]
    NoMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("Shader {name} is not valid SPIR-V: {reason}")]
    InvalidShader { name: &'static str, reason: String },

    #[error("Could not create graphics pipeline: {0}")]
    PipelineCreation(vk::Result),

    #[error("Writing {len} bytes at offset {offset} overflows a {size} byte buffer")]
    BufferOverflow { size: u64, offset: u64, len: u64 },

    #[error("Could not create Vulkan instance: {0}")]
    InstanceCreation(vk::Result),

    #[error("Could not create Vulkan device: {0}")]
    DeviceCreation(vk::Result),

    #[error("Could not acquire the next swapchain image: {0}")]
    Acquire(vk::Result),

    #[error("Could not present the image to the swapchain: {0}")]
    Present(vk::Result),

    #[error("Timed out waiting for the GPU")]
    Timeout,

    #[error("Frame slot {slot} is {actual:?}, expected {expected:?}")]
    SlotTransition {
        slot: usize,
        actual: SlotState,
        expected: SlotState,
    },

    #[error(transparent)]
    Vulkan(#[from] vk::Result),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_device_message_mentions_device() {
        assert!(HarnessError::NoDevice.to_string().contains("No device"));
    }

    #[test]
    fn vulkan_results_convert_with_question_mark() {
        fn fails() -> HarnessResult<()> {
            Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)?;
            Ok(())
        }

        assert!(matches!(
            fails(),
            Err(HarnessError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn converts_into_eyre_report() {
        let report: color_eyre::Report = HarnessError::SeparatePresentQueue.into();
        assert!(report.downcast_ref::<HarnessError>().is_some());
    }
}
