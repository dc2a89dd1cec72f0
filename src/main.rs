// Ember - a small Vulkan forward renderer
//
// One control thread drives the loop: update camera, write the frame
// slot's uniform buffer, record and submit draw commands, present.
// Recoverable surface conditions (resize, minimize, stale swapchain) are
// absorbed by the renderer; everything else aborts the run with a
// descriptive error and a non-zero exit code.

mod backend;
mod camera;
mod config;
mod frame;
mod input;
mod model;
mod render_system;
mod renderer;
mod scene;

use anyhow::{Context, Result};
use raw_window_handle::HasDisplayHandle;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

use backend::buffer::Buffer;
use backend::descriptor::{DescriptorPool, DescriptorSetLayout};
use backend::swapchain::MAX_FRAMES_IN_FLIGHT;
use backend::VulkanDevice;
use camera::Camera;
use config::Config;
use input::{CameraController, InputState};
use model::Model;
use render_system::{FrameContext, SceneRenderSystem};
use renderer::Renderer;
use scene::{GlobalUbo, SceneObject, Transform};

fn main() -> Result<()> {
    let config = Config::load();

    init_logging();
    log::info!("Starting renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Fatal render errors surface here with a non-zero exit code
    if let Some(error) = app.fatal_error.take() {
        return Err(error);
    }
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

/// Per-slot uniform buffer and the descriptor set bound to it.
///
/// The set is written once at startup; only the buffer contents change.
struct FrameResources {
    uniform_buffer: Buffer,
    descriptor_set: ash::vk::DescriptorSet,
}

/// All GPU-bound state, created once the window exists.
///
/// Field order is destruction order; the Drop impl waits for the device
/// to go idle before any of it is torn down.
struct RenderContext {
    frame_resources: Vec<FrameResources>,
    descriptor_pool: DescriptorPool,
    global_set_layout: DescriptorSetLayout,
    render_system: SceneRenderSystem,
    objects: Vec<SceneObject>,
    renderer: Renderer,
    device: Arc<VulkanDevice>,
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        // No resource may die while the GPU still references it
        let _ = self.device.wait_idle();
    }
}

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    ctx: Option<RenderContext>,
    is_fullscreen: bool,

    camera: Camera,
    viewer: Transform,
    controller: CameraController,
    input: InputState,

    last_frame_time: Instant,
    frame_count: u32,
    last_fps_update: Instant,

    fatal_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            window: None,
            ctx: None,
            is_fullscreen,
            camera: Camera::new(),
            viewer: Transform::default(),
            controller: CameraController::new(),
            input: InputState::new(),
            last_frame_time: now,
            frame_count: 0,
            last_fps_update: now,
            fatal_error: None,
        }
    }

    fn init_render_context(&mut self, window: Arc<Window>) -> Result<RenderContext> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let device =
            VulkanDevice::new(&self.config.window.title, enable_validation, display_handle)?;

        let renderer = Renderer::new(
            device.clone(),
            window,
            self.config.preferred_present_mode(),
            self.config.graphics.clear_color,
        )?;

        let global_set_layout = DescriptorSetLayout::uniform_buffer(
            device.clone(),
            0,
            ash::vk::ShaderStageFlags::VERTEX,
        )?;
        let descriptor_pool =
            DescriptorPool::uniform_buffer_pool(device.clone(), MAX_FRAMES_IN_FLIGHT as u32)?;

        let mut frame_resources = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            let uniform_buffer = Buffer::uniform(
                device.clone(),
                GlobalUbo::SIZE as u64,
                &format!("global ubo slot {}", slot),
            )?;
            let descriptor_set = descriptor_pool.allocate(&global_set_layout)?;
            descriptor_pool.write_uniform_buffer(
                descriptor_set,
                0,
                uniform_buffer.descriptor_info(),
            );
            frame_resources.push(FrameResources {
                uniform_buffer,
                descriptor_set,
            });
        }

        let render_system = SceneRenderSystem::new(
            device.clone(),
            renderer.render_pass(),
            global_set_layout.handle(),
            Path::new(&self.config.shaders.vertex),
            Path::new(&self.config.shaders.fragment),
        )?;

        let cube = Arc::new(Model::new(device.clone(), &model::cube_vertices())?);
        let mut object = SceneObject::new(cube);
        object.transform.translation = glam::Vec3::new(0.0, 0.0, 2.5);
        object.transform.scale = glam::Vec3::splat(0.8);
        let objects = vec![object];

        log::info!("Vulkan initialized");

        Ok(RenderContext {
            frame_resources,
            descriptor_pool,
            global_set_layout,
            render_system,
            objects,
            renderer,
            device,
        })
    }

    fn draw_frame(&mut self) -> Result<()> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Ok(());
        };

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        self.controller
            .update(&self.input, frame_time, &mut self.viewer);
        self.camera
            .set_view_yxz(self.viewer.translation, self.viewer.rotation);
        self.camera.set_perspective_projection(
            50.0f32.to_radians(),
            ctx.renderer.aspect_ratio(),
            0.1,
            10.0,
        );

        if let Some(command_buffer) = ctx.renderer.begin_frame()? {
            let slot = ctx.renderer.frame_slot();

            let ubo = GlobalUbo {
                projection_view: self.camera.projection() * self.camera.view(),
                ..Default::default()
            };
            ctx.frame_resources[slot].uniform_buffer.write(&ubo)?;

            let frame = FrameContext {
                command_buffer,
                frame_slot: slot,
                frame_time,
                global_descriptor_set: ctx.frame_resources[slot].descriptor_set,
            };

            ctx.renderer.begin_render_pass(command_buffer);
            ctx.render_system.render(&frame, &ctx.objects);
            ctx.renderer.end_render_pass(command_buffer);
            ctx.renderer.end_frame()?;

            self.update_fps();
        }

        Ok(())
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        self.frame_count += 1;

        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    1000.0 / fps.max(1.0),
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn abort(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal error: {:?}", error);
        self.fatal_error = Some(error);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.abort(event_loop, anyhow::anyhow!("Failed to create window: {}", e));
                return;
            }
        };

        match self.init_render_context(window.clone()) {
            Ok(ctx) => self.ctx = Some(ctx),
            Err(e) => {
                self.abort(event_loop, e);
                return;
            }
        }

        self.window = Some(window);
        self.last_frame_time = Instant::now();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ctx) = &self.ctx {
                    log::info!("Rendered {} frames", ctx.renderer.completed_frames());
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.renderer.notify_resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.draw_frame() {
                    self.abort(event_loop, e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if let PhysicalKey::Code(key) = event.physical_key {
                    self.input.set_pressed(key, event.state.is_pressed());

                    if event.state.is_pressed() {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
