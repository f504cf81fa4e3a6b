//! Compositor: the two-pass render loop.
//!
//! Once per admitted tick: (1) capture pass blits the camera image into
//! the offscreen frame buffer, (2) per-layer update consumes transport
//! state (retired-frame disposal, frame capture, uniform sync, playback
//! advance), (3) composite pass draws every layer quad to the surface in
//! fixed z-order. All captured frames live in an id-addressed arena and
//! are destroyed explicitly, never left to drop order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::composition::{Composition, FrameId, Layer, LayerKind, ReleaseFrames};

use super::{fullscreen_quad, KeyUniforms, MaterialKind, Vertex};

const FRAME_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// A captured frame image: an independent texture copied out of the
/// frame buffer, never aliasing it.
struct CapturedFrame {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Id-addressed store of captured frames with explicit destruction.
struct FrameArena {
    next_id: u64,
    frames: HashMap<FrameId, CapturedFrame>,
}

impl FrameArena {
    fn new() -> Self {
        Self {
            next_id: 0,
            frames: HashMap::new(),
        }
    }

    fn insert(&mut self, texture: wgpu::Texture, view: wgpu::TextureView) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        self.frames.insert(id, CapturedFrame { texture, view });
        id
    }

    fn view(&self, id: FrameId) -> Option<&wgpu::TextureView> {
        self.frames.get(&id).map(|f| &f.view)
    }

    fn contains(&self, id: FrameId) -> bool {
        self.frames.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn release_all(&mut self) {
        for (_, frame) in self.frames.drain() {
            frame.texture.destroy();
        }
    }
}

impl ReleaseFrames for FrameArena {
    fn release(&mut self, id: FrameId) {
        match self.frames.remove(&id) {
            Some(frame) => frame.texture.destroy(),
            None => log::warn!("release of unknown frame {:?}", id),
        }
    }
}

/// What a layer's quad currently samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerSource {
    /// Transparent blank texture ("no content yet").
    Blank,
    /// The frame buffer (thru / always-live).
    Live,
    /// A captured frame.
    Frame(FrameId),
}

/// GPU-side state for one layer's quad. The uniform buffer and its bind
/// group are created once at pipeline init and live for the session; the
/// texture bind group is rebuilt whenever the source changes.
struct LayerPlane {
    material: MaterialKind,
    uniforms: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    source: LayerSource,
    bind_group: Option<wgpu::BindGroup>,
    live_view_bound: bool,
}

pub struct Compositor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    /// Frame buffer dimensions (the live feed's resolution).
    width: u32,
    height: u32,
    max_frames_per_layer: usize,
    sampler: wgpu::Sampler,
    texture_layout: wgpu::BindGroupLayout,
    uniform_layout: wgpu::BindGroupLayout,
    blit_pipeline: wgpu::RenderPipeline,
    key_pipeline: wgpu::RenderPipeline,
    vertex_buffer: wgpu::Buffer,
    frame_buffer: wgpu::Texture,
    frame_buffer_view: wgpu::TextureView,
    blank_texture: wgpu::Texture,
    blank_view: wgpu::TextureView,
    capture_material: MaterialKind,
    planes: Vec<LayerPlane>,
    frames: FrameArena,
}

impl Compositor {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        composition: &Composition,
        max_frames_per_layer: usize,
    ) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Layer Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Layer Texture Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Key Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let blit_pipeline =
            Self::create_blit_pipeline(&device, &texture_layout, FRAME_BUFFER_FORMAT);
        let key_pipeline =
            Self::create_key_pipeline(&device, &texture_layout, &uniform_layout, surface_format);

        let vertices = fullscreen_quad();
        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Compositor Vertex Buffer"),
            size: (std::mem::size_of::<Vertex>() * vertices.len()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&vertex_buffer, 0, bytemuck::cast_slice(&vertices));

        let (frame_buffer, frame_buffer_view) = Self::create_frame_buffer(&device, width, height);
        let (blank_texture, blank_view) = Self::create_blank_texture(&device, &queue);

        let planes = composition
            .layers()
            .iter()
            .map(|layer| {
                let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Key Uniform Buffer"),
                    size: std::mem::size_of::<KeyUniforms>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                queue.write_buffer(&uniforms, 0, bytemuck::bytes_of(&KeyUniforms::default()));

                let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Key Uniform Bind Group"),
                    layout: &uniform_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_entire_binding(),
                    }],
                });

                let source = match layer.kind() {
                    LayerKind::AlwaysLive => LayerSource::Live,
                    LayerKind::Recordable => LayerSource::Blank,
                };

                LayerPlane {
                    material: MaterialKind::Keyed,
                    uniforms,
                    uniform_bind_group,
                    source,
                    bind_group: None,
                    live_view_bound: false,
                }
            })
            .collect();

        log::info!(
            "Compositor ready: {}x{} frame buffer, {} layers",
            width,
            height,
            composition.layer_count()
        );

        Self {
            device,
            queue,
            width,
            height,
            max_frames_per_layer,
            sampler,
            texture_layout,
            uniform_layout,
            blit_pipeline,
            key_pipeline,
            vertex_buffer,
            frame_buffer,
            frame_buffer_view,
            blank_texture,
            blank_view,
            capture_material: MaterialKind::Basic,
            planes,
            frames: FrameArena::new(),
        }
    }

    fn create_blit_pipeline(
        device: &wgpu::Device,
        texture_layout: &wgpu::BindGroupLayout,
        format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[texture_layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Blit Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[Vertex::LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    fn create_key_pipeline(
        device: &wgpu::Device,
        texture_layout: &wgpu::BindGroupLayout,
        uniform_layout: &wgpu::BindGroupLayout,
        format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Key Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/key.wgsl").into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Key Pipeline Layout"),
            bind_group_layouts: &[texture_layout, uniform_layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Key Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[Vertex::LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    // Premultiplied over, matching the shader output.
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                            operation: wgpu::BlendOperation::Add,
                        },
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    fn create_frame_buffer(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Frame Buffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_BUFFER_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_blank_texture(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Blank Texture"),
            size: wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_BUFFER_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        // Transparent black, so an empty layer draws nothing through the
        // keying shader.
        let pixels = vec![0u8; 4 * 4 * 4];
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * 4),
                rows_per_image: Some(4),
            },
            wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn pipeline_for(&self, kind: MaterialKind) -> &wgpu::RenderPipeline {
        match kind {
            MaterialKind::Basic => &self.blit_pipeline,
            MaterialKind::Keyed => &self.key_pipeline,
        }
    }

    /// Build a texture bind group for an external source (the camera
    /// texture). The app calls this whenever the camera texture is
    /// (re)created.
    pub fn create_source_bind_group(&self, view: &wgpu::TextureView) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    pub fn frame_buffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn captured_frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Recreate the frame buffer at the live feed's resolution. Planes
    /// sampling the frame buffer are rebound at the next tick.
    pub fn resize_frame_buffer(&mut self, width: u32, height: u32) {
        if (self.width, self.height) == (width, height) || width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;

        for plane in &mut self.planes {
            if plane.source == LayerSource::Live {
                plane.bind_group = None;
            }
        }

        self.frame_buffer.destroy();
        let (texture, view) = Self::create_frame_buffer(&self.device, width, height);
        self.frame_buffer = texture;
        self.frame_buffer_view = view;

        log::info!("Frame buffer resized to {}x{}", width, height);
    }

    /// One admitted tick. `camera` is the bind group for the live camera
    /// texture, or None while the source is unavailable; in that case the
    /// capture pass and frame capture are skipped and everything else
    /// carries on.
    pub fn tick(
        &mut self,
        composition: &mut Composition,
        camera: Option<&wgpu::BindGroup>,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
    ) {
        if let Some(camera) = camera {
            self.capture_pass(encoder, camera);
        }

        for (idx, layer) in composition.layers_mut().iter_mut().enumerate() {
            self.update_layer(idx, layer, encoder, camera.is_some());
        }

        self.ensure_bind_groups();
        self.composite_pass(encoder, target, composition);
    }

    /// Render the live camera image into the frame buffer.
    fn capture_pass(&self, encoder: &mut wgpu::CommandEncoder, camera: &wgpu::BindGroup) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Capture Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.frame_buffer_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(self.pipeline_for(self.capture_material));
        pass.set_bind_group(0, camera, &[]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.draw(0..6, 0..1);
    }

    /// Copy the frame buffer's current contents into a new frame texture.
    fn capture_frame(&mut self, encoder: &mut wgpu::CommandEncoder) -> FrameId {
        let extent = wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Captured Frame"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_BUFFER_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        encoder.copy_texture_to_texture(
            self.frame_buffer.as_image_copy(),
            texture.as_image_copy(),
            extent,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.frames.insert(texture, view)
    }

    /// Consume one layer's pending state: dispose retired frames, capture
    /// while recording, sync uniforms on dirty, advance playback.
    fn update_layer(
        &mut self,
        idx: usize,
        layer: &mut Layer,
        encoder: &mut wgpu::CommandEncoder,
        camera_ready: bool,
    ) {
        layer.dispose_retired(&mut self.frames);

        // A cleared take may leave the quad pointing at a destroyed
        // frame; fall back to blank before anything is drawn.
        {
            let plane = &mut self.planes[idx];
            if let LayerSource::Frame(id) = plane.source {
                if !self.frames.contains(id) {
                    plane.source = LayerSource::Blank;
                    plane.bind_group = None;
                }
            }
        }

        if layer.kind() == LayerKind::AlwaysLive {
            if layer.take_dirty() {
                self.queue.write_buffer(
                    &self.planes[idx].uniforms,
                    0,
                    bytemuck::bytes_of(&KeyUniforms::from_params(layer.params())),
                );
            }
            return;
        }

        // Frame capture depends on the capture pass; both are skipped
        // while the camera has produced nothing.
        if layer.is_recording() && camera_ready {
            if layer.frame_count() >= self.max_frames_per_layer {
                if layer.note_capacity_reached() {
                    log::warn!(
                        "{}: capture capacity reached ({} frames), dropping further frames",
                        layer.name(),
                        self.max_frames_per_layer
                    );
                }
            } else {
                let id = self.capture_frame(encoder);
                layer.push_frame(id);
            }
        }

        if layer.take_dirty() {
            self.queue.write_buffer(
                &self.planes[idx].uniforms,
                0,
                bytemuck::bytes_of(&KeyUniforms::from_params(layer.params())),
            );

            let plane = &mut self.planes[idx];
            if layer.live_view() && !plane.live_view_bound {
                layer.reset_for_live_view();
                plane.source = LayerSource::Live;
                plane.live_view_bound = true;
                plane.bind_group = None;
            } else if !layer.live_view() && plane.live_view_bound {
                plane.source = LayerSource::Blank;
                plane.live_view_bound = false;
                plane.bind_group = None;
            }
        }

        if let Some(frame) = layer.advance_playback() {
            let plane = &mut self.planes[idx];
            if plane.source != LayerSource::Frame(frame) {
                plane.source = LayerSource::Frame(frame);
                plane.bind_group = None;
            }
        }
    }

    /// Rebuild texture bind groups for planes whose source changed.
    fn ensure_bind_groups(&mut self) {
        for i in 0..self.planes.len() {
            if self.planes[i].bind_group.is_some() {
                continue;
            }

            let (view, resolved) = match self.planes[i].source {
                LayerSource::Blank => (&self.blank_view, LayerSource::Blank),
                LayerSource::Live => (&self.frame_buffer_view, LayerSource::Live),
                LayerSource::Frame(id) => match self.frames.view(id) {
                    Some(view) => (view, LayerSource::Frame(id)),
                    None => (&self.blank_view, LayerSource::Blank),
                },
            };

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Layer Source Bind Group"),
                layout: &self.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });

            let plane = &mut self.planes[i];
            plane.source = resolved;
            plane.bind_group = Some(bind_group);
        }
    }

    /// Draw every layer quad to the surface, bottom to top.
    fn composite_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        composition: &Composition,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Composite Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));

        for idx in composition.draw_order() {
            let plane = &self.planes[idx];
            let Some(bind_group) = &plane.bind_group else {
                continue;
            };

            pass.set_pipeline(self.pipeline_for(plane.material));
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_bind_group(1, &plane.uniform_bind_group, &[]);
            pass.draw(0..6, 0..1);
        }
    }

    /// Destroy every GPU resource the pipeline owns. Called once on
    /// shutdown; the compositor must not be used afterwards.
    pub fn teardown(&mut self, composition: &mut Composition) {
        for layer in composition.layers_mut() {
            layer.clear();
            layer.dispose_retired(&mut self.frames);
        }
        self.frames.release_all();

        for plane in &mut self.planes {
            plane.bind_group = None;
            plane.uniforms.destroy();
        }

        self.frame_buffer.destroy();
        self.blank_texture.destroy();

        log::info!("Compositor resources destroyed");
    }
}
