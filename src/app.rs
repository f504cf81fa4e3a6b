//! Application state holding the wgpu graphics context.
//!
//! Ties the pieces together: window surface, camera capture and upload,
//! the compositor's tick, the egui panels, and frame statistics. Real
//! pipeline work only happens on ticks admitted by the frame pacer;
//! rejected redraw callbacks return immediately and leave the screen as
//! it was.

use std::sync::Arc;
use std::time::Instant;

use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::CameraCapture;
use crate::composition::Composition;
use crate::config::AppConfig;
use crate::render::{Compositor, FramePacer};
use crate::ui::{self, UiState, UiStats};

/// Main application state.
pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,

    // Camera capture
    camera: Option<CameraCapture>,
    camera_texture: Option<wgpu::Texture>,
    camera_bind_group: Option<wgpu::BindGroup>,
    last_camera_frame: u64,
    camera_has_frames: bool,

    // Render pipeline
    composition: Composition,
    compositor: Compositor,
    pacer: FramePacer,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
    ui_state: UiState,

    // Frame timing
    fps: f64,
    last_fps_update: Instant,
    ticks_since_update: u64,

    torn_down: bool,
}

impl App {
    /// Create a new App instance with an initialized wgpu context.
    pub async fn new(window: Arc<Window>, settings: AppConfig) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("no suitable GPU adapter found"))?;

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("inkloop Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;
        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let composition = Composition::new(settings.recordable_layers);
        let compositor = Compositor::new(
            device.clone(),
            queue.clone(),
            surface_format,
            settings.initial_width,
            settings.initial_height,
            &composition,
            settings.max_frames_per_layer,
        );
        let pacer = FramePacer::new(settings.capture_hz);

        let available = CameraCapture::list_cameras();
        if available.is_empty() {
            log::warn!("No cameras detected");
        }
        for cam in &available {
            log::info!("Camera {}: {}", cam.index, cam.name);
        }

        let camera = match CameraCapture::new(settings.camera_index) {
            Ok(capture) => Some(capture),
            Err(e) => {
                log::error!("Failed to start camera capture: {}", e);
                None
            }
        };

        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            camera,
            camera_texture: None,
            camera_bind_group: None,
            last_camera_frame: 0,
            camera_has_frames: false,
            composition,
            compositor,
            pacer,
            egui_ctx,
            egui_state,
            egui_renderer,
            ui_state: UiState::default(),
            fps: 0.0,
            last_fps_update: Instant::now(),
            ticks_since_update: 0,
            torn_down: false,
        })
    }

    /// Handle a window event, returning true if egui consumed it.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn toggle_panels(&mut self) {
        self.ui_state.toggle();
    }

    /// Poll the capture thread and upload any new frame to the GPU. The
    /// frame buffer follows the camera resolution.
    fn update_camera(&mut self) {
        let Some(camera) = &self.camera else { return };
        let Some(frame) = camera.latest_frame() else {
            return;
        };

        if self.camera_has_frames && frame.frame_number <= self.last_camera_frame {
            return;
        }
        self.last_camera_frame = frame.frame_number;
        self.camera_has_frames = true;

        let needs_new_texture = match &self.camera_texture {
            None => true,
            Some(tex) => {
                let size = tex.size();
                size.width != frame.width || size.height != frame.height
            }
        };

        if needs_new_texture {
            log::info!(
                "Creating camera texture: {}x{} (aspect {:.3})",
                frame.width,
                frame.height,
                frame.aspect_ratio()
            );

            let camera_texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Camera Texture"),
                size: wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });

            let view = camera_texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.camera_bind_group = Some(self.compositor.create_source_bind_group(&view));

            if let Some(old) = self.camera_texture.replace(camera_texture) {
                old.destroy();
            }

            self.compositor.resize_frame_buffer(frame.width, frame.height);
        }

        if let Some(camera_texture) = &self.camera_texture {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: camera_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &frame.data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(frame.width * 4),
                    rows_per_image: Some(frame.height),
                },
                wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    /// One redraw callback. The pacer decides whether this performs a
    /// tick or returns with the screen untouched.
    pub fn redraw(&mut self) -> Result<(), wgpu::SurfaceError> {
        if self.torn_down || !self.pacer.should_tick(Instant::now()) {
            return Ok(());
        }

        self.update_camera();

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Tick Encoder"),
            });

        self.compositor.tick(
            &mut self.composition,
            self.camera_bind_group.as_ref(),
            &mut encoder,
            &view,
        );

        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.update_fps();

        Ok(())
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        let stats = UiStats {
            fps: self.fps,
            camera_connected: self.camera.is_some(),
            camera_failed: self
                .camera
                .as_ref()
                .map(|c| c.has_failed())
                .unwrap_or(true),
            camera_resolution: self
                .camera_texture
                .as_ref()
                .map(|t| (t.size().width, t.size().height)),
            captured_frames: self.compositor.captured_frame_count(),
        };

        let ui_state = &self.ui_state;
        let composition = &mut self.composition;
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            ui::draw(ctx, ui_state, composition, &stats);
        });

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            self.egui_renderer.render(
                &mut render_pass.forget_lifetime(),
                &paint_jobs,
                &screen_descriptor,
            );
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }

    fn update_fps(&mut self) {
        self.ticks_since_update += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.ticks_since_update as f64 / elapsed;
            self.ticks_since_update = 0;
            self.last_fps_update = now;
        }
    }

    /// Explicit shutdown: stop the capture thread and destroy every GPU
    /// resource the pipeline owns.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(mut camera) = self.camera.take() {
            camera.stop();
        }
        self.camera_bind_group = None;
        if let Some(texture) = self.camera_texture.take() {
            texture.destroy();
        }
        self.compositor.teardown(&mut self.composition);
        log::info!("Pipeline torn down");
    }
}
