// Frame orchestrator
//
// Drives the begin/end-frame protocol, owns the replaceable swapchain
// handle, and decides when the surface must be rebuilt. The swapchain is
// only ever replaced between frames, from the Idle state.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use crate::backend::swapchain::{
    FrameAcquire, PresentOutcome, Swapchain, MAX_FRAMES_IN_FLIGHT,
};
use crate::backend::VulkanDevice;
use crate::frame::{should_recreate_after_present, FrameCounter, RenderState, ResizeSignal};

/// Window surface with scoped destruction; declared after the swapchain
/// in `Renderer` so it outlives every swapchain built against it.
struct SurfaceHandle {
    device: Arc<VulkanDevice>,
    surface: vk::SurfaceKHR,
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        unsafe {
            self.device
                .surface_loader()
                .destroy_surface(self.surface, None);
        }
    }
}

pub struct Renderer {
    swapchain: Swapchain,
    surface: SurfaceHandle,
    command_pool: vk::CommandPool,
    /// One command buffer per frame slot, re-recorded every use.
    command_buffers: Vec<vk::CommandBuffer>,
    state: RenderState,
    frames: FrameCounter,
    resize: ResizeSignal,
    minimized: bool,
    current_image_index: u32,
    clear_color: [f32; 4],
    preferred_present_mode: vk::PresentModeKHR,
    window: Arc<Window>,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(
        device: Arc<VulkanDevice>,
        window: Arc<Window>,
        preferred_present_mode: vk::PresentModeKHR,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let surface = SurfaceHandle {
            device: device.clone(),
            surface: device.create_surface(display_handle, window_handle)?,
        };

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            surface.surface,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            preferred_present_mode,
        )?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );
        let command_pool = unsafe {
            device
                .device
                .create_command_pool(&pool_info, None)
                .context("Failed to create command pool")?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);

        let command_buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) }
        {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(e).context("Failed to allocate command buffers");
            }
        };

        Ok(Self {
            swapchain,
            surface,
            command_pool,
            command_buffers,
            state: RenderState::Idle,
            frames: FrameCounter::new(),
            resize: ResizeSignal::new(),
            minimized: false,
            current_image_index: 0,
            clear_color,
            preferred_present_mode,
            window,
            device,
        })
    }

    /// Start recording a frame.
    ///
    /// Returns `None` when no frame can be produced this tick: the window
    /// is minimized, or the surface was out of date and has been rebuilt.
    /// In both cases the state stays `Idle` and the frame counter does not
    /// advance. Any other failure is fatal.
    pub fn begin_frame(&mut self) -> Result<Option<vk::CommandBuffer>> {
        assert!(
            !self.state.is_frame_in_progress(),
            "begin_frame called while a frame is already in progress"
        );

        if self.minimized {
            return Ok(None);
        }

        let image_index = match self.swapchain.acquire_next_image()? {
            FrameAcquire::OutOfDate => {
                log::debug!("Surface out of date on acquire, recreating");
                self.recreate_swapchain()?;
                return Ok(None);
            }
            FrameAcquire::Ready {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    // Still renderable this frame; fold into the resize signal
                    self.resize.raise();
                }
                image_index
            }
        };

        self.current_image_index = image_index;

        let command_buffer = self.command_buffers[self.frames.slot()];
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.device
                .device
                .begin_command_buffer(command_buffer, &begin_info)
                .context("Failed to begin command buffer")?;
        }

        self.state.begin();
        Ok(Some(command_buffer))
    }

    /// Finish the frame: submit, present, recreate if the surface went
    /// stale, advance the frame counter.
    pub fn end_frame(&mut self) -> Result<()> {
        self.state.end();

        let command_buffer = self.command_buffers[self.frames.slot()];
        unsafe {
            self.device
                .device
                .end_command_buffer(command_buffer)
                .context("Failed to end command buffer")?;
        }

        let outcome = self
            .swapchain
            .submit(command_buffer, self.current_image_index)?;

        let surface_stale = matches!(
            outcome,
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate
        );
        if should_recreate_after_present(surface_stale, self.resize.is_raised()) {
            // Both triggers collapse into one recreation pass
            self.resize.take();
            self.recreate_swapchain()?;
        }

        self.frames.advance();
        Ok(())
    }

    /// Begin the render pass on the current framebuffer and set the
    /// dynamic viewport/scissor to the surface extent.
    pub fn begin_render_pass(&self, command_buffer: vk::CommandBuffer) {
        assert!(
            self.state.is_frame_in_progress(),
            "begin_render_pass called outside an active frame"
        );
        assert_eq!(
            command_buffer,
            self.command_buffers[self.frames.slot()],
            "render pass must target the current frame's command buffer"
        );

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let extent = self.swapchain.extent();
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swapchain.render_pass())
            .framebuffer(self.swapchain.framebuffer(self.current_image_index))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            self.device.device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );
            self.device
                .device
                .cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.device
                .device
                .cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    pub fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        assert!(
            self.state.is_frame_in_progress(),
            "end_render_pass called outside an active frame"
        );
        unsafe {
            self.device.device.cmd_end_render_pass(command_buffer);
        }
    }

    /// Rebuild the swapchain at the window's current size.
    ///
    /// A zero-area window defers the rebuild: nothing is constructed and
    /// the next non-zero resize retries. The new swapchain is fully built
    /// while the old one is still owned, then the old one is released.
    fn recreate_swapchain(&mut self) -> Result<()> {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            log::debug!("Deferring swapchain recreation: zero-area surface");
            self.minimized = true;
            return Ok(());
        }
        self.minimized = false;

        self.device.wait_idle()?;

        let new_swapchain = Swapchain::from_previous(
            self.device.clone(),
            self.surface.surface,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            self.preferred_present_mode,
            &self.swapchain,
        )?;

        anyhow::ensure!(
            new_swapchain.formats_match(&self.swapchain),
            "Swapchain image format changed across recreation"
        );

        // Old swapchain stays alive until the replacement exists, then drops
        self.swapchain = new_swapchain;
        log::info!(
            "Swapchain recreated at {}x{} with {} images",
            size.width,
            size.height,
            self.swapchain.image_count()
        );
        Ok(())
    }

    /// Edge-triggered resize notification from the windowing side.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            self.minimized = true;
        } else {
            self.minimized = false;
            self.resize.raise();
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.aspect_ratio()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }

    /// Slot index of the frame currently being prepared.
    pub fn frame_slot(&self) -> usize {
        self.frames.slot()
    }

    pub fn completed_frames(&self) -> u64 {
        self.frames.completed()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        unsafe {
            // Frees the per-slot command buffers with it
            self.device
                .device
                .destroy_command_pool(self.command_pool, None);
        }
        // Fields drop in declaration order: swapchain first, then surface
    }
}
