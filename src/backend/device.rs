// Physical device selection and logical device creation
//
// Probing is read-only: a capability snapshot is taken per candidate and
// evaluated against the suitability predicate. The first suitable device
// in enumeration order wins.

use std::collections::{BTreeSet, HashSet};
use std::ffi::CStr;

use ash::{khr, vk};

use super::error::RendererError;

/// Device extensions the renderer cannot run without.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[khr::swapchain::NAME];

/// Immutable snapshot of everything the selector needs to know about a
/// candidate device. Recomputed per candidate, never persisted.
pub struct DeviceCapabilities {
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: HashSet<String>,
    pub surface_capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl DeviceCapabilities {
    pub fn supports_extensions(&self, required: &[&CStr]) -> bool {
        required
            .iter()
            .all(|ext| self.extensions.contains(ext.to_string_lossy().as_ref()))
    }
}

/// Queue family indices for the two roles the renderer needs. The same
/// family may fill both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub presentation: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.presentation.is_some()
    }

    /// Both role indices, or the selection failure that incomplete indices
    /// really are.
    pub fn require_complete(&self) -> Result<(u32, u32), RendererError> {
        match (self.graphics, self.presentation) {
            (Some(graphics), Some(presentation)) => Ok((graphics, presentation)),
            _ => Err(RendererError::NoSuitableDevice),
        }
    }

    /// Resolve queue family indices from a family list.
    ///
    /// Each role takes the first family that supports it, searched
    /// independently; the scan stops as soon as both are found. This can
    /// pick two distinct families even when a later combined one exists,
    /// and the swapchain sharing-mode decision depends on exactly that
    /// outcome, so the policy must not be "improved" to prefer a single
    /// combined family.
    pub fn resolve<E, F>(
        families: &[vk::QueueFamilyProperties],
        mut supports_presentation: F,
    ) -> Result<Self, E>
    where
        F: FnMut(u32) -> Result<bool, E>,
    {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }

            if indices.graphics.is_none()
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics = Some(index);
            }

            if indices.presentation.is_none() && supports_presentation(index)? {
                indices.presentation = Some(index);
            }

            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }
}

/// Take a read-only capability snapshot of one candidate device.
///
/// Zero extensions, formats, or present modes yield empty collections, not
/// errors; the selector reads emptiness as unsuitability.
pub fn probe(
    instance: &ash::Instance,
    surface_loader: &khr::surface::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<DeviceCapabilities, vk::Result> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(device) };

    let extensions = unsafe { instance.enumerate_device_extension_properties(device) }?
        .iter()
        .map(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name.to_string_lossy().into_owned()
        })
        .collect();

    let surface_capabilities = unsafe {
        surface_loader.get_physical_device_surface_capabilities(device, surface)
    }?;
    let formats =
        unsafe { surface_loader.get_physical_device_surface_formats(device, surface) }?;
    let present_modes = unsafe {
        surface_loader.get_physical_device_surface_present_modes(device, surface)
    }?;

    Ok(DeviceCapabilities {
        queue_families,
        extensions,
        surface_capabilities,
        formats,
        present_modes,
    })
}

/// The suitability predicate: complete queue family indices, all required
/// extensions present, and at least one surface format and present mode.
pub fn is_suitable(
    capabilities: &DeviceCapabilities,
    indices: &QueueFamilyIndices,
    required_extensions: &[&CStr],
) -> bool {
    indices.is_complete()
        && capabilities.supports_extensions(required_extensions)
        && !capabilities.formats.is_empty()
        && !capabilities.present_modes.is_empty()
}

/// First suitable candidate in enumeration order, or `None`.
pub(crate) fn first_suitable_index(
    candidates: &[(DeviceCapabilities, QueueFamilyIndices)],
    required_extensions: &[&CStr],
) -> Option<usize> {
    candidates
        .iter()
        .position(|(caps, indices)| is_suitable(caps, indices, required_extensions))
}

/// Everything device selection produces, reused by every later phase.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_indices: QueueFamilyIndices,
    pub capabilities: DeviceCapabilities,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// Enumerate physical devices and pick the first suitable one.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &khr::surface::Instance,
    surface: vk::SurfaceKHR,
    required_extensions: &[&CStr],
) -> Result<SelectedDevice, RendererError> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(RendererError::creation("physical device enumeration"))?;

    if devices.is_empty() {
        return Err(RendererError::NoDeviceFound);
    }

    let mut probed = Vec::with_capacity(devices.len());
    for &device in &devices {
        let capabilities = probe(instance, surface_loader, device, surface)
            .map_err(RendererError::creation("device capability query"))?;
        let indices = QueueFamilyIndices::resolve(&capabilities.queue_families, |index| {
            unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)
            }
        })
        .map_err(RendererError::creation("surface support query"))?;
        probed.push((capabilities, indices));
    }

    let chosen = first_suitable_index(&probed, required_extensions)
        .ok_or(RendererError::NoSuitableDevice)?;
    let (capabilities, queue_indices) = probed.swap_remove(chosen);
    let physical_device = devices[chosen];

    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
    log::info!("Selected GPU: {}", name.to_string_lossy());

    let memory_properties =
        unsafe { instance.get_physical_device_memory_properties(physical_device) };

    Ok(SelectedDevice {
        physical_device,
        queue_indices,
        capabilities,
        memory_properties,
    })
}

/// Create the logical device and fetch one queue handle per role.
///
/// One queue-creation request per unique family index (graphics and
/// presentation may share a family), a single priority-1.0 queue each.
/// Queue retrieval cannot fail once device creation succeeded.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    indices: QueueFamilyIndices,
    required_extensions: &[&CStr],
) -> Result<(ash::Device, vk::Queue, vk::Queue), RendererError> {
    let (graphics_family, presentation_family) = indices.require_complete()?;

    let unique_families: BTreeSet<u32> =
        [graphics_family, presentation_family].into_iter().collect();

    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect();

    let extension_ptrs: Vec<*const std::ffi::c_char> =
        required_extensions.iter().map(|ext| ext.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_ptrs)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .map_err(RendererError::creation("logical device"))?;

    let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
    let presentation_queue = unsafe { device.get_device_queue(presentation_family, 0) };

    Ok((device, graphics_queue, presentation_queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn resolve(
        families: &[vk::QueueFamilyProperties],
        present: &[bool],
    ) -> QueueFamilyIndices {
        QueueFamilyIndices::resolve(families, |i| Ok::<_, vk::Result>(present[i as usize]))
            .unwrap()
    }

    fn caps_with(
        formats: usize,
        present_modes: usize,
        extensions: &[&str],
    ) -> DeviceCapabilities {
        DeviceCapabilities {
            queue_families: Vec::new(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            surface_capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default(); formats],
            present_modes: vec![vk::PresentModeKHR::FIFO; present_modes],
        }
    }

    fn complete_indices() -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics: Some(0),
            presentation: Some(0),
        }
    }

    #[test]
    fn resolve_takes_first_family_per_role() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];
        // Only the second family can present; graphics must still land on
        // the first even though the second could serve both roles.
        let indices = resolve(&families, &[false, true]);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.presentation, Some(1));
    }

    #[test]
    fn resolve_allows_one_family_for_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let indices = resolve(&families, &[true]);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.presentation, Some(0));
        assert!(indices.is_complete());
    }

    #[test]
    fn resolve_skips_empty_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let indices = resolve(&families, &[false, true]);
        assert_eq!(indices.graphics, Some(1));
    }

    #[test]
    fn resolve_early_exits_once_both_found() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let mut queried = Vec::new();
        let indices = QueueFamilyIndices::resolve(&families, |i| {
            queried.push(i);
            Ok::<_, vk::Result>(true)
        })
        .unwrap();
        assert!(indices.is_complete());
        // Both roles resolved at index 0, so the second family is never
        // asked about presentation.
        assert_eq!(queried, vec![0]);
    }

    #[test]
    fn resolve_is_idempotent() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let first = resolve(&families, &[true, false]);
        let second = resolve(&families, &[true, false]);
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_incomplete_without_presentation() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let indices = resolve(&families, &[false]);
        assert!(!indices.is_complete());
    }

    #[test]
    fn incomplete_indices_are_a_selection_failure() {
        let incomplete = QueueFamilyIndices {
            graphics: Some(0),
            presentation: None,
        };
        assert!(matches!(
            incomplete.require_complete(),
            Err(RendererError::NoSuitableDevice)
        ));
        assert_eq!(complete_indices().require_complete().unwrap(), (0, 0));
    }

    #[test]
    fn suitability_requires_all_four_conditions() {
        let required = REQUIRED_DEVICE_EXTENSIONS;
        let swapchain = "VK_KHR_swapchain";

        let good = caps_with(1, 1, &[swapchain]);
        assert!(is_suitable(&good, &complete_indices(), required));

        let no_formats = caps_with(0, 1, &[swapchain]);
        assert!(!is_suitable(&no_formats, &complete_indices(), required));

        let no_modes = caps_with(1, 0, &[swapchain]);
        assert!(!is_suitable(&no_modes, &complete_indices(), required));

        let no_ext = caps_with(1, 1, &[]);
        assert!(!is_suitable(&no_ext, &complete_indices(), required));

        let incomplete = QueueFamilyIndices::default();
        assert!(!is_suitable(&good, &incomplete, required));
    }

    #[test]
    fn selection_is_first_match_in_enumeration_order() {
        let swapchain = "VK_KHR_swapchain";
        let candidates = vec![
            (caps_with(0, 0, &[]), QueueFamilyIndices::default()),
            (caps_with(1, 1, &[swapchain]), complete_indices()),
            (caps_with(2, 2, &[swapchain]), complete_indices()),
        ];
        assert_eq!(
            first_suitable_index(&candidates, REQUIRED_DEVICE_EXTENSIONS),
            Some(1)
        );
    }

    #[test]
    fn selection_fails_when_nothing_is_suitable() {
        let candidates = vec![(caps_with(1, 1, &[]), complete_indices())];
        assert_eq!(
            first_suitable_index(&candidates, REQUIRED_DEVICE_EXTENSIONS),
            None
        );
    }
}
