// Vulkan instance bootstrap
//
// Instance creation with optional validation layers, plus the debug
// messenger that forwards validation output into `log`.

use std::ffi::{c_char, CStr};

use ash::{ext, vk, Entry};
use raw_window_handle::RawDisplayHandle;

use super::error::RendererError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Create the instance with the windowing system's required extensions.
///
/// When `enable_validation` is set the Khronos validation layer is attached
/// along with `VK_EXT_debug_utils`; the layer must be installed or this
/// fails with `MissingValidationLayer` before any object is created.
pub fn create_instance(
    entry: &Entry,
    app_name: &CStr,
    display_handle: RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance, RendererError> {
    if enable_validation && !validation_layer_supported(entry)? {
        return Err(RendererError::MissingValidationLayer(
            "VK_LAYER_KHRONOS_validation",
        ));
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"No Engine")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    let mut extensions: Vec<*const c_char> =
        ash_window::enumerate_required_extensions(display_handle)
            .map_err(RendererError::creation("instance"))?
            .to_vec();

    let layers: Vec<*const c_char> = if enable_validation {
        extensions.push(ext::debug_utils::NAME.as_ptr());
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let mut debug_info = debug_messenger_create_info();
    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);
    if enable_validation {
        // Covers instance creation/destruction, which the messenger proper
        // cannot observe.
        create_info = create_info.push_next(&mut debug_info);
    }

    unsafe { entry.create_instance(&create_info, None) }
        .map_err(RendererError::creation("instance"))
}

fn validation_layer_supported(entry: &Entry) -> Result<bool, RendererError> {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(RendererError::creation("instance"))?;

    Ok(layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER
    }))
}

/// Attach the debug messenger. Only called when validation is enabled.
pub fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT), RendererError> {
    let loader = ext::debug_utils::Instance::new(entry, instance);
    let create_info = debug_messenger_create_info();

    let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
        .map_err(RendererError::creation("debug messenger"))?;

    Ok((loader, messenger))
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
