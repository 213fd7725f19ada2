// Renderer lifecycle manager
//
// Runs the strict init chain (instance -> surface -> device selection ->
// logical device -> swapchain -> render pass -> pipeline -> command pool)
// and tears everything down in reverse-creation order. `cleanup` consumes
// the renderer, so teardown happens exactly once by construction.
//
// A failure mid-bootstrap propagates straight to the caller; there is no
// partial-success state and the process is expected to terminate, so the
// unwinding path does not chase individual handles.

use std::ffi::CString;

use ash::{ext, khr, vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::device::{self, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};
use crate::backend::{instance, pipeline, MeshModel, RendererError, Swapchain};
use crate::scene::SceneNode;

/// Precompiled SPIR-V blobs for the two baseline shader stages.
pub struct ShaderBlobs {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

pub struct RendererOptions {
    pub app_name: String,
    pub enable_validation: bool,
}

pub struct Renderer {
    // Creation order, top to bottom. Teardown walks it bottom to top.
    _entry: Entry,
    instance: ash::Instance,
    debug: Option<(ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: khr::surface::Instance,
    surface: vk::SurfaceKHR,
    queue_indices: QueueFamilyIndices,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    graphics_queue: vk::Queue,
    #[allow(dead_code)]
    presentation_queue: vk::Queue,
    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    command_pool: vk::CommandPool,
    models: Vec<MeshModel>,
}

impl Renderer {
    /// Run the whole bootstrap.
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        framebuffer_size: (u32, u32),
        shaders: &ShaderBlobs,
        options: &RendererOptions,
    ) -> Result<Self, RendererError> {
        log::info!(
            "Initializing renderer (validation: {})",
            options.enable_validation
        );

        let entry = unsafe { Entry::load() }.map_err(|_| RendererError::Creation {
            stage: "Vulkan loader",
            source: vk::Result::ERROR_INITIALIZATION_FAILED,
        })?;

        let app_name = CString::new(options.app_name.as_str())
            .unwrap_or_else(|_| CString::from(c"prism-renderer"));
        let instance = instance::create_instance(
            &entry,
            &app_name,
            display_handle,
            options.enable_validation,
        )?;

        let debug = if options.enable_validation {
            Some(instance::create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = khr::surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(RendererError::creation("surface"))?;

        let selected = device::select_physical_device(
            &instance,
            &surface_loader,
            surface,
            REQUIRED_DEVICE_EXTENSIONS,
        )?;

        let (device, graphics_queue, presentation_queue) = device::create_logical_device(
            &instance,
            selected.physical_device,
            selected.queue_indices,
            REQUIRED_DEVICE_EXTENSIONS,
        )?;

        let swapchain = Swapchain::new(
            &instance,
            &device,
            surface,
            &selected.capabilities,
            selected.queue_indices,
            framebuffer_size,
        )?;

        let render_pass = pipeline::create_render_pass(&device, swapchain.format)?;

        let (graphics_pipeline, pipeline_layout) = pipeline::create_graphics_pipeline(
            &device,
            render_pass,
            swapchain.extent,
            &shaders.vertex,
            &shaders.fragment,
        )?;

        // Graphics queues implicitly support transfer; the pool doubles as
        // the transfer pool for one-shot uploads.
        let (graphics_family, _) = selected.queue_indices.require_complete()?;
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(RendererError::creation("command pool"))?;

        log::info!("Renderer initialized");

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            queue_indices: selected.queue_indices,
            memory_properties: selected.memory_properties,
            device,
            graphics_queue,
            presentation_queue,
            swapchain,
            render_pass,
            pipeline_layout,
            pipeline: graphics_pipeline,
            command_pool,
            models: Vec::new(),
        })
    }

    /// Upload a scene graph and take ownership of the resulting model.
    /// Returns the model's index.
    pub fn load_model(&mut self, root: &SceneNode) -> Result<usize, RendererError> {
        let model = MeshModel::from_scene(
            &self.device,
            &self.memory_properties,
            self.graphics_queue,
            self.command_pool,
            root,
        )?;

        log::info!("Loaded model with {} meshes", model.mesh_count());
        self.models.push(model);
        Ok(self.models.len() - 1)
    }

    pub fn model(&self, index: usize) -> Option<&MeshModel> {
        self.models.get(index)
    }

    pub fn model_mut(&mut self, index: usize) -> Option<&mut MeshModel> {
        self.models.get_mut(index)
    }

    pub fn queue_indices(&self) -> QueueFamilyIndices {
        self.queue_indices
    }

    /// Destroy every created handle in strict reverse-creation order.
    /// Consuming `self` makes a second teardown unrepresentable.
    pub fn cleanup(self) {
        log::info!("Cleaning up renderer");

        unsafe {
            let _ = self.device.device_wait_idle();

            for model in &self.models {
                model.destroy(&self.device);
            }
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_render_pass(self.render_pass, None);
            self.swapchain.destroy(&self.device);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = &self.debug {
                loader.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }

        log::info!("Cleanup complete");
    }
}
