use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::error::{HarnessError, HarnessResult};
use crate::renderer::core::shader::GraphicsShader;

/// Fixed function state of a graphics pipeline drawn inside the default render
/// pass. Viewport and scissor are always dynamic.
pub struct GraphicsPipelineDesc<'a> {
    pub render_pass: vk::RenderPass,
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub depth_test: bool,
}

pub struct GraphicsPipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<ash::Device>,
}

impl GraphicsPipeline {
    pub fn new(
        device: &Arc<ash::Device>,
        shader: &GraphicsShader,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Self> {
        let layout = {
            let layout_info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(desc.set_layouts);
            unsafe {
                device.create_pipeline_layout(&layout_info, None)?
            }
        };

        let stages = shader.stages();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_test)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .stencil_test_enable(false);
        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&color_blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(desc.render_pass)
            .subpass(0);

        let created = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let handle = match first_pipeline(created) {
            Ok(handle) => handle,
            Err(err) => {
                unsafe {
                    device.destroy_pipeline_layout(layout, None);
                }
                return Err(err.into());
            }
        };

        Ok(Self {
            handle,
            layout,
            device: device.clone(),
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Result of creating a single pipeline. Failed creations hand back null handles.
fn first_pipeline(
    created: Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>,
) -> HarnessResult<vk::Pipeline> {
    match created {
        Ok(pipelines) => pipelines
            .first()
            .copied()
            .filter(|pipeline| *pipeline != vk::Pipeline::null())
            .ok_or(HarnessError::PipelineCreation(vk::Result::ERROR_UNKNOWN)),
        Err((_, result)) => Err(HarnessError::PipelineCreation(result)),
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use super::*;

    #[test]
    fn created_pipeline_is_returned() {
        let pipeline = vk::Pipeline::from_raw(0x42);
        assert_eq!(first_pipeline(Ok(vec![pipeline])).unwrap(), pipeline);
    }

    #[test]
    fn creation_failure_keeps_the_vulkan_result() {
        let failed = first_pipeline(Err((
            vec![vk::Pipeline::null()],
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        )));
        assert!(matches!(
            failed,
            Err(HarnessError::PipelineCreation(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
    }

    #[test]
    fn missing_or_null_pipeline_is_an_error() {
        assert!(first_pipeline(Ok(Vec::new())).is_err());
        assert!(first_pipeline(Ok(vec![vk::Pipeline::null()])).is_err());
    }
}
