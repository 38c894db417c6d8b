use std::sync::Arc;
use ash::vk;
use color_eyre::Result;

#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(descriptor_count)
            .stage_flags(stages);

        self.bindings.push(binding);
        self
    }

    /// Descriptors per type needed for `sets` sets of this layout.
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            let count = binding.descriptor_count * sets;
            match sizes.iter_mut().find(|size| size.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: count,
                }),
            }
        }
        sizes
    }

    pub fn build(&self, device: &Arc<ash::Device>) -> Result<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings);
        let handle = unsafe {
            device.create_descriptor_set_layout(&layout_info, None)?
        };
        Ok(DescriptorSetLayout {
            handle,
            device: device.clone(),
        })
    }
}

pub struct DescriptorSetLayout {
    pub handle: vk::DescriptorSetLayout,
    device: Arc<ash::Device>,
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.handle, None);
        }
    }
}

/// Pool the sets are allocated from. Sets are freed with the pool.
pub struct DescriptorPool {
    pub handle: vk::DescriptorPool,
    device: Arc<ash::Device>,
}

impl DescriptorPool {
    pub fn new(
        device: &Arc<ash::Device>,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<Self> {
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(pool_sizes)
            .max_sets(max_sets);
        let handle = unsafe {
            device.create_descriptor_pool(&pool_info, None)?
        };
        Ok(Self {
            handle,
            device: device.clone(),
        })
    }

    pub fn allocate(
        &self,
        layout: &DescriptorSetLayout,
        count: usize,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle; count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle)
            .set_layouts(&layouts);
        Ok(unsafe {
            self.device.allocate_descriptor_sets(&alloc_info)?
        })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.handle, None);
        }
    }
}
