use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use crate::renderer::config::Timeout;
use crate::renderer::core::error::{HarnessError, HarnessResult};

pub struct Semaphore {
    pub handle: vk::Semaphore,
    device: Arc<ash::Device>,
}

impl Semaphore {
    pub fn new(device: &Arc<ash::Device>) -> VkResult<Self> {
        let handle = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        Ok(Self {
            handle,
            device: device.clone(),
        })
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.handle, None);
        }
    }
}

pub struct Fence {
    pub handle: vk::Fence,
    device: Arc<ash::Device>,
}

impl Fence {
    pub fn new(device: &Arc<ash::Device>, signaled: bool) -> VkResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let handle = unsafe {
            device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        };
        Ok(Self {
            handle,
            device: device.clone(),
        })
    }

    pub fn wait(&self, timeout: Timeout) -> HarnessResult<()> {
        let result = unsafe {
            self.device.wait_for_fences(&[self.handle], true, timeout.as_nanos())
        };
        map_wait_result(result)
    }

    pub fn reset(&self) -> VkResult<()> {
        unsafe {
            self.device.reset_fences(&[self.handle])
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.handle, None);
        }
    }
}

/// Maps a blocking wait to the typed timeout error.
pub fn map_wait_result(result: VkResult<()>) -> HarnessResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(HarnessError::Timeout),
        Err(err) => Err(err.into()),
    }
}
