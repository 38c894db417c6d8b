use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::config::Timeout;
use crate::renderer::core::sync::Fence;

pub struct CommandPool {
    pub handle: vk::CommandPool,
    pub queue_family_index: u32,
    device: Arc<ash::Device>,
}

impl CommandPool {
    pub fn new(
        device: &Arc<ash::Device>,
        queue_family_index: u32,
        resettable: bool,
    ) -> VkResult<Self> {
        let flags = if resettable {
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
        } else {
            vk::CommandPoolCreateFlags::empty()
        };
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);
        let handle = unsafe {
            device.create_command_pool(&pool_info, None)?
        };

        Ok(Self {
            handle,
            queue_family_index,
            device: device.clone(),
        })
    }

    pub fn allocate(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe {
            self.device.allocate_command_buffers(&alloc_info)
        }
    }

    pub fn free(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() || self.handle == vk::CommandPool::null() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.handle, command_buffers);
        }
    }

    /// Records a one-off command buffer, submits it to `queue` and blocks
    /// until it finished. Used for uploads outside the frame loop.
    pub fn immediate_submit<F>(&self, queue: vk::Queue, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let command_buffers = self.allocate(1)?;
        let submitted = self.submit_and_wait(queue, command_buffers[0], record);
        self.free(&command_buffers);
        submitted
    }

    fn submit_and_wait<F>(&self, queue: vk::Queue, cmd: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let mut encoder = CommandEncoder::new(cmd, self.device.clone());
        encoder.begin_recording()?;
        let recorded = record(cmd, &self.device);
        encoder.end_recording()?;
        recorded?;

        let fence = Fence::new(&self.device, false)?;
        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers);
        unsafe {
            self.device.queue_submit(queue, &[submit_info], fence.handle)?;
        }
        fence.wait(Timeout::Unbounded)?;

        Ok(())
    }

    /// Destroys the pool now. Dropping afterwards is a no-op.
    pub(crate) fn destroy(&mut self) {
        if self.handle != vk::CommandPool::null() {
            unsafe {
                self.device.destroy_command_pool(self.handle, None);
            }
            self.handle = vk::CommandPool::null();
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Command buffer with a guard against unbalanced begin/end calls.
pub struct CommandEncoder {
    pub command_buffer: vk::CommandBuffer,

    is_recording: bool,

    device: Arc<ash::Device>,
}

impl CommandEncoder {
    pub fn new(
        command_buffer: vk::CommandBuffer,
        device: Arc<ash::Device>,
    ) -> Self {
        Self {
            command_buffer,
            device,
            is_recording: false,
        }
    }

    /// Requires a pool created with `resettable`.
    pub fn reset(&mut self) -> VkResult<()> {
        debug_assert!(!self.is_recording, "reset while recording");
        unsafe {
            self.device.reset_command_buffer(
                self.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )
        }
    }

    pub fn begin_recording(&mut self) -> Result<()> {
        if self.is_recording {
            return Err(eyre!("Command buffer is already recording"));
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(self.command_buffer, &begin_info)?;
        }

        self.is_recording = true;

        Ok(())
    }

    pub fn end_recording(&mut self) -> Result<()> {
        if !self.is_recording {
            return Err(eyre!("Command buffer is not recording"));
        }

        unsafe {
            self.device.end_command_buffer(self.command_buffer)?
        }

        self.is_recording = false;

        Ok(())
    }
}

impl Drop for CommandEncoder {
    fn drop(&mut self) {
        if self.is_recording {
            log::warn!("Dropping CommandEncoder while still recording");
        }
    }
}
