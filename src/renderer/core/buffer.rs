use std::ptr::NonNull;
use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::core::device::Accelerator;
use crate::renderer::core::error::{HarnessError, HarnessResult};

/// Buffer backed by its own allocation. Host visible buffers stay mapped
/// until they are dropped.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
    mapped: Option<NonNull<u8>>,

    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new(
        device: &Arc<ash::Device>,
        accelerator: &Accelerator,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let mut buffer = Self {
            handle: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size,
            mapped: None,
            device: device.clone(),
        };

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        buffer.handle = unsafe {
            device.create_buffer(&buffer_info, None)?
        };

        let requirements = unsafe {
            device.get_buffer_memory_requirements(buffer.handle)
        };
        let memory_type_index = accelerator
            .find_memory_type_index(requirements.memory_type_bits, memory_flags)
            .ok_or(HarnessError::NoMemoryType {
                type_bits: requirements.memory_type_bits,
                properties: memory_flags,
            })?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        buffer.memory = unsafe {
            device.allocate_memory(&alloc_info, None)?
        };
        unsafe {
            device.bind_buffer_memory(buffer.handle, buffer.memory, 0)?;
        }

        if memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let ptr = unsafe {
                device.map_memory(buffer.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
            };
            buffer.mapped = NonNull::new(ptr.cast::<u8>());
        }

        Ok(buffer)
    }

    /// Copies `data` into the mapping at `offset` bytes. The memory has to be
    /// host coherent for the GPU to see the write without a flush.
    pub fn write<T: Pod>(&mut self, data: &[T], offset: u64) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        check_write_range(self.size, offset, bytes.len() as u64)?;
        let mapped = self.mapped.ok_or_eyre("Cannot write to buffer that is not mapped")?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                mapped.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }

        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            if self.handle != vk::Buffer::null() {
                self.device.destroy_buffer(self.handle, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

pub fn check_write_range(size: u64, offset: u64, len: u64) -> HarnessResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(HarnessError::BufferOverflow { size, offset, len }),
    }
}
