use std::ffi::CStr;
use std::io::Cursor;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::error::{HarnessError, HarnessResult};

const ENTRY_POINT: &CStr = c"main";

/// Turns embedded SPIR-V bytes into words. `include_bytes!` gives no alignment
/// guarantee, so the bytes are copied instead of cast.
pub fn decode_spirv(name: &'static str, bytes: &[u8]) -> HarnessResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|err| HarnessError::InvalidShader {
        name,
        reason: err.to_string(),
    })
}

pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    device: Arc<ash::Device>,
}

impl ShaderModule {
    pub fn new(
        device: &Arc<ash::Device>,
        name: &'static str,
        stage: vk::ShaderStageFlags,
        spirv: &[u8],
    ) -> Result<Self> {
        let code = decode_spirv(name, spirv)?;
        let shader_module_info = vk::ShaderModuleCreateInfo::default()
            .code(&code);
        let handle = unsafe {
            device.create_shader_module(&shader_module_info, None)?
        };
        log::debug!("Created {:?} shader module {}", stage, name);

        Ok(Self {
            handle,
            stage,
            device: device.clone(),
        })
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.handle)
            .name(ENTRY_POINT)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.handle, None);
        }
    }
}

/// Vertex and fragment stage of one graphics pipeline. Only needed until the
/// pipeline exists.
pub struct GraphicsShader {
    pub vert_mod: ShaderModule,
    pub frag_mod: ShaderModule,
}

impl GraphicsShader {
    pub fn new(
        device: &Arc<ash::Device>,
        name: &'static str,
        vert_spirv: &[u8],
        frag_spirv: &[u8],
    ) -> Result<Self> {
        let vert_mod = ShaderModule::new(device, name, vk::ShaderStageFlags::VERTEX, vert_spirv)?;
        let frag_mod = ShaderModule::new(device, name, vk::ShaderStageFlags::FRAGMENT, frag_spirv)?;
        Ok(Self { vert_mod, frag_mod })
    }

    pub fn stages(&self) -> [vk::PipelineShaderStageCreateInfo<'static>; 2] {
        [self.vert_mod.stage_info(), self.frag_mod.stage_info()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x0723_0203;

    #[test]
    fn decodes_words_in_either_byte_order() {
        let mut little = Vec::new();
        for word in [MAGIC, 0x0001_0000, 7] {
            little.extend_from_slice(&word.to_le_bytes());
        }
        assert_eq!(decode_spirv("test", &little).unwrap(), vec![MAGIC, 0x0001_0000, 7]);

        let big = [MAGIC, 7].iter().flat_map(|word| word.to_be_bytes()).collect::<Vec<u8>>();
        assert_eq!(decode_spirv("test", &big).unwrap(), vec![MAGIC, 7]);
    }

    #[test]
    fn rejects_truncated_or_foreign_bytes() {
        let truncated = &MAGIC.to_le_bytes()[..3];
        assert!(matches!(
            decode_spirv("truncated", truncated),
            Err(HarnessError::InvalidShader { name: "truncated", .. })
        ));

        assert!(decode_spirv("empty", &[]).is_err());
        assert!(decode_spirv("text", b"void main() {}  ").is_err());
    }
}
