// Backend module - Vulkan bootstrap layer
//
// Thin wrappers around ash; creation order and teardown order are the
// correctness model here.

pub mod buffer;
pub mod device;
pub mod error;
pub mod instance;
pub mod mesh;
pub mod pipeline;
pub mod shader;
pub mod swapchain;

pub use error::RendererError;
pub use mesh::{Mesh, MeshModel};
pub use swapchain::Swapchain;
