// Swapchain - Window presentation
//
// Owns the presentable images, their views and framebuffers, the shared
// render pass, the depth attachment, and the per-slot synchronization
// objects. Replaced wholesale when the surface geometry changes.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::DepthImage;
use super::sync::{FrameSync, ImageInFlightTable};
use super::VulkanDevice;

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Result of an image acquisition attempt.
pub enum FrameAcquire {
    /// An image is ready; `suboptimal` means the surface still works but
    /// no longer matches the window exactly.
    Ready { image_index: u32, suboptimal: bool },
    /// The surface geometry changed; the caller must recreate and skip
    /// this frame.
    OutOfDate,
}

/// Presentation engine report after submit + present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Success,
    Suboptimal,
    OutOfDate,
}

pub struct Swapchain {
    device: Arc<VulkanDevice>,
    swapchain_loader: ash::extensions::khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    depth: DepthImage,
    render_pass: vk::RenderPass,
    format: vk::Format,
    extent: vk::Extent2D,
    frame_sync: Vec<FrameSync>,
    images_in_flight: ImageInFlightTable,
    current_slot: usize,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        Self::create(
            device,
            surface,
            window_extent,
            preferred_present_mode,
            vk::SwapchainKHR::null(),
        )
    }

    /// Rebuild at a new extent while `previous` is still alive, handing its
    /// swapchain handle to the presentation engine for resource carry-over.
    /// The previous object stays fully owned by the caller until this
    /// returns, then gets dropped.
    pub fn from_previous(
        device: Arc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
        previous: &Swapchain,
    ) -> Result<Self> {
        Self::create(
            device,
            surface,
            window_extent,
            preferred_present_mode,
            previous.swapchain,
        )
    }

    fn create(
        device: Arc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        anyhow::ensure!(
            window_extent.width > 0 && window_extent.height > 0,
            "Cannot create a swapchain with a zero-area extent"
        );

        let surface_loader = device.surface_loader();

        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, surface)
        }?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }?;
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, surface)
        }?;

        anyhow::ensure!(
            !formats.is_empty() && !present_modes.is_empty(),
            "Surface reports no formats or present modes"
        );

        let surface_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        let extent = choose_extent(&capabilities, window_extent);
        let image_count = choose_image_count(&capabilities)?;

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, requesting {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        let depth = DepthImage::new(device.clone(), extent)?;

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // Partially constructed from here on; Drop unwinds whatever exists
        // if a later step fails.
        let mut sc = Self {
            device,
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            depth,
            render_pass: vk::RenderPass::null(),
            format: surface_format.format,
            extent,
            frame_sync: Vec::new(),
            images_in_flight: ImageInFlightTable::new(0),
            current_slot: 0,
        };

        sc.images = unsafe { sc.swapchain_loader.get_swapchain_images(sc.swapchain) }?;
        anyhow::ensure!(
            sc.images.len() >= 2,
            "Swapchain delivered {} images; presentation needs at least double buffering",
            sc.images.len()
        );
        log::info!("Swapchain created with {} images", sc.images.len());

        sc.create_image_views()?;
        sc.render_pass = create_render_pass(&sc.device, sc.format, sc.depth.format())?;
        sc.create_framebuffers()?;

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            sc.frame_sync.push(FrameSync::new(&sc.device)?);
        }
        sc.images_in_flight = ImageInFlightTable::new(sc.images.len());

        Ok(sc)
    }

    fn create_image_views(&mut self) -> Result<()> {
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
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

            let view = unsafe {
                self.device
                    .device
                    .create_image_view(&create_info, None)
                    .context("Failed to create image view")?
            };
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_framebuffers(&mut self) -> Result<()> {
        for &image_view in &self.image_views {
            let attachments = [image_view, self.depth.view()];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe {
                self.device
                    .device
                    .create_framebuffer(&framebuffer_info, None)
                    .context("Failed to create framebuffer")?
            };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Acquire the next presentable image.
    ///
    /// Blocks on the current slot's in-flight fence first: the slot's
    /// command buffer and uniform buffer must not be rewritten while the
    /// GPU still reads them. Signals the slot's image-available semaphore
    /// once the image is usable.
    pub fn acquire_next_image(&mut self) -> Result<FrameAcquire> {
        let sync = &self.frame_sync[self.current_slot];

        unsafe {
            self.device
                .device
                .wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)?;
        }

        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                sync.image_available,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(FrameAcquire::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(FrameAcquire::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Submit recorded commands for `image_index` and request presentation.
    ///
    /// If a different slot still has work in flight against this image,
    /// blocks on that slot's fence first. GPU-side, the submission waits on
    /// image-available and presentation waits on render-finished.
    pub fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> Result<PresentOutcome> {
        let slot = self.current_slot;

        if let Some(stale_slot) = self.images_in_flight.mark_in_use(image_index as usize, slot) {
            unsafe {
                self.device.device.wait_for_fences(
                    &[self.frame_sync[stale_slot].in_flight_fence],
                    true,
                    u64::MAX,
                )?;
            }
        }
        debug_assert_eq!(
            self.images_in_flight.last_user(image_index as usize),
            Some(slot)
        );

        let sync = &self.frame_sync[slot];

        unsafe {
            self.device.device.reset_fences(&[sync.in_flight_fence])?;
        }

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight_fence,
                )
                .context("Failed to submit draw commands")?;
        }

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.graphics_queue, &present_info)
        };

        self.current_slot = (self.current_slot + 1) % MAX_FRAMES_IN_FLIGHT;

        match result {
            Ok(false) => Ok(PresentOutcome::Success),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// A replacement surface must keep the same color and depth formats;
    /// pipelines and render passes are built against them.
    pub fn formats_match(&self, other: &Swapchain) -> bool {
        self.format == other.format && self.depth.format() == other.depth.format()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for sync in &self.frame_sync {
                sync.destroy(&self.device.device);
            }
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                self.device.device.destroy_render_pass(self.render_pass, None);
            }
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Render pass with one color attachment (presented) and one depth attachment.
fn create_render_pass(
    device: &VulkanDevice,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let depth_attachment = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref)
        .build();

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = &[color_attachment, depth_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe {
        device
            .device
            .create_render_pass(&render_pass_info, None)
            .context("Failed to create render pass")
    }
}

/// Prefer SRGB; fall back to whatever the surface offers first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

/// Use the configured mode when the surface supports it, then MAILBOX,
/// then FIFO (always available).
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        return preferred;
    }
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    vk::PresentModeKHR::FIFO
}

/// Use the surface's fixed extent when it has one, otherwise clamp the
/// window size to the supported range.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum so acquisition rarely blocks, never fewer
/// than two: a single image cannot be presented and rendered to at once.
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> Result<u32> {
    let mut count = (capabilities.min_image_count + 1).max(2);
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    anyhow::ensure!(
        count >= 2,
        "Surface only supports {} swapchain image(s); double buffering required",
        count
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn present_mode_honors_preference() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn present_mode_falls_back_to_mailbox_then_fifo() {
        let with_mailbox = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&with_mailbox, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::MAILBOX
        );

        let fifo_only = vec![vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&fifo_only, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_surface_fixed_size() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 800,
            },
        );
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn extent_clamps_window_size() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let clamped_up = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 50,
                height: 50,
            },
        );
        assert_eq!((clamped_up.width, clamped_up.height), (100, 100));

        let clamped_down = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 3000,
                height: 3000,
            },
        );
        assert_eq!((clamped_down.width, clamped_down.height), (2000, 2000));

        let in_range = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 800,
            },
        );
        assert_eq!((in_range.width, in_range.height), (800, 800));
    }

    #[test]
    fn image_count_is_at_least_double_buffered() {
        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&unbounded).unwrap(), 2);

        let typical = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&typical).unwrap(), 3);

        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capped).unwrap(), 2);
    }

    #[test]
    fn single_image_surface_is_rejected() {
        let single = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 1,
            ..Default::default()
        };
        assert!(choose_image_count(&single).is_err());
    }

    #[test]
    fn max_frames_in_flight_is_a_small_constant() {
        assert!(MAX_FRAMES_IN_FLIGHT >= 1 && MAX_FRAMES_IN_FLIGHT <= 4);
    }
}
