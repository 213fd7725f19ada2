// SPIR-V shader module wrapping
//
// Shader compilation happens outside the renderer; this only wraps
// precompiled bytecode into module handles.

use std::io::Cursor;

use ash::{util::read_spv, vk};

use super::error::RendererError;

/// Wrap precompiled SPIR-V bytes into a shader module.
pub fn create_shader_module(
    device: &ash::Device,
    code: &[u8],
) -> Result<vk::ShaderModule, RendererError> {
    // read_spv validates length/magic and realigns to u32 words.
    let words = read_spv(&mut Cursor::new(code)).map_err(RendererError::InvalidShaderBytecode)?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

    unsafe { device.create_shader_module(&create_info, None) }
        .map_err(RendererError::creation("shader module"))
}
