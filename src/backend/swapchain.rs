// Presentation chain negotiation
//
// Format, present mode, extent, and image count are negotiated from the
// probed surface capabilities; one 2D colour view is built per image.

use ash::{khr, vk};

use super::device::{DeviceCapabilities, QueueFamilyIndices};
use super::error::RendererError;

/// One presentable image and the view the render pass will target.
/// View lifetime is tied to the owning chain.
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

pub struct Swapchain {
    pub loader: khr::swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<SwapchainImage>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Negotiate and create the presentation chain.
    ///
    /// `framebuffer_size` is the window's current framebuffer size in
    /// pixels; it is only consulted when the surface leaves the extent to
    /// the application.
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        surface: vk::SurfaceKHR,
        capabilities: &DeviceCapabilities,
        queue_indices: QueueFamilyIndices,
        framebuffer_size: (u32, u32),
    ) -> Result<Self, RendererError> {
        let surface_format = choose_surface_format(&capabilities.formats);
        let present_mode = choose_present_mode(&capabilities.present_modes);
        let extent = choose_extent(&capabilities.surface_capabilities, framebuffer_size);
        let image_count = choose_image_count(&capabilities.surface_capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        let surface_caps = &capabilities.surface_capabilities;
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // Exclusive access by two different families is undefined behaviour
        // on many drivers, so distinct graphics/presentation families force
        // concurrent sharing.
        let family_indices;
        match (queue_indices.graphics, queue_indices.presentation) {
            (Some(graphics), Some(presentation)) if graphics != presentation => {
                family_indices = [graphics, presentation];
                create_info = create_info
                    .image_sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(&family_indices);
            }
            _ => {
                create_info = create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
            }
        }

        let loader = khr::swapchain::Device::new(instance, device);
        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(RendererError::creation("swapchain"))?;

        let raw_images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(RendererError::creation("swapchain")(e));
            }
        };

        // One view per image; a failure part-way through must not leave a
        // half-built chain behind.
        let mut images = Vec::with_capacity(raw_images.len());
        for image in raw_images {
            match create_image_view(device, image, surface_format.format) {
                Ok(view) => images.push(SwapchainImage { image, view }),
                Err(e) => {
                    for built in &images {
                        unsafe { device.destroy_image_view(built.view, None) };
                    }
                    unsafe { loader.destroy_swapchain(handle, None) };
                    return Err(e);
                }
            }
        }

        Ok(Self {
            loader,
            handle,
            images,
            format: surface_format.format,
            extent,
        })
    }

    /// Destroy views first, then the chain that owns their images.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            for image in &self.images {
                device.destroy_image_view(image.view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, RendererError> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }
        .map_err(RendererError::creation("image view"))
}

/// Preferred format: R8G8B8A8_UNORM (B8G8R8A8_UNORM as backup) with an
/// sRGB nonlinear colour space.
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    // A single UNDEFINED entry means every format is accepted.
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return preferred;
    }

    formats
        .iter()
        .copied()
        .find(|f| {
            (f.format == vk::Format::R8G8B8A8_UNORM || f.format == vk::Format::B8G8R8A8_UNORM)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        // If nothing matches, take the first listed format and hope. The
        // selector guarantees a non-empty list, but an empty one still gets
        // the preferred default rather than a panic.
        .or_else(|| formats.first().copied())
        .unwrap_or(preferred)
}

/// Mailbox when available (low-latency triple buffering), otherwise FIFO,
/// which the Vulkan specification guarantees.
pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's current extent unless it reports the all-bits-set
/// sentinel, in which case the window decides, clamped per dimension to
/// the surface's min/max.
pub(crate) fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One above the minimum for triple buffering, clamped down to the
/// maximum when one is declared (0 means unbounded).
pub(crate) fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        count = capabilities.max_image_count;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn undefined_sentinel_means_any_format() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn preferred_format_found_in_restricted_list() {
        let formats = [
            format(vk::Format::R5G6B5_UNORM_PACK16, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn candidate_format_with_wrong_colour_space_is_rejected() {
        // BGRA with a non-sRGB colour space must not match; the fallback is
        // the first listed format.
        let formats = [
            format(vk::Format::R5G6B5_UNORM_PACK16, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(
                vk::Format::B8G8R8A8_UNORM,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R5G6B5_UNORM_PACK16
        );
    }

    #[test]
    fn unmatched_list_falls_back_to_first_entry() {
        let formats = [
            format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, formats[0].format);
        assert_eq!(chosen.color_space, formats[0].color_space);
    }

    #[test]
    fn empty_format_list_falls_back_to_the_default() {
        let chosen = choose_surface_format(&[]);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn mailbox_preferred_regardless_of_position() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_fallback_without_mailbox() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_clamps_window_size_into_surface_bounds() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = choose_extent(&caps, (1920, 1080));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn fixed_current_extent_is_used_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            ..Default::default()
        };
        let extent = choose_extent(&caps, (1920, 1080));
        assert_eq!((extent.width, extent.height), (640, 480));
    }

    #[test]
    fn image_count_is_min_plus_one_clamped_to_max() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);

        let tight = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&tight), 2);
    }

    #[test]
    fn zero_max_image_count_means_unbounded() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 4,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 5);
    }
}
