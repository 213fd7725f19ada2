// Error taxonomy for the bootstrap
//
// Capability errors abort device selection, creation errors name the
// failing step, support errors fire before any device-level object exists.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    /// The instance enumerated zero physical devices.
    #[error("no Vulkan-capable device found")]
    NoDeviceFound,

    /// Devices exist but none satisfies the suitability predicate
    /// (queue families, extensions, surface formats, present modes).
    #[error("no physical device satisfies the renderer's requirements")]
    NoSuitableDevice,

    /// Validation was requested but the layer is not installed.
    #[error("validation layer {0:?} requested but not available")]
    MissingValidationLayer(&'static str),

    /// No memory type matches both the allowed-type mask and the
    /// required property flags.
    #[error("no suitable memory type (allowed mask {allowed_types:#x}, required {required:?})")]
    NoSuitableMemoryType {
        allowed_types: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// Shader bytes were not valid SPIR-V (wrong length or magic).
    #[error("shader bytecode is not valid SPIR-V: {0}")]
    InvalidShaderBytecode(std::io::Error),

    /// An underlying object-creation call failed.
    #[error("failed to create {stage}: {source}")]
    Creation {
        stage: &'static str,
        #[source]
        source: vk::Result,
    },
}

impl RendererError {
    /// Tags a `vk::Result` with the name of the failing bootstrap step.
    pub fn creation(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| Self::Creation { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_error_names_the_failing_step() {
        let err = RendererError::creation("swapchain")(vk::Result::ERROR_DEVICE_LOST);
        assert!(err.to_string().contains("swapchain"));
    }

    #[test]
    fn memory_type_error_reports_the_mask() {
        let err = RendererError::NoSuitableMemoryType {
            allowed_types: 0b101,
            required: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        assert!(err.to_string().contains("0x5"));
    }
}
