//! wgpu backend implementation
//!
//! Renders offscreen: the "canvas" is a color/depth texture pair owned by the
//! backend, and every render target is a texture with one view per layer (six
//! for cube targets). Projection matrices arrive in GL clip convention and are
//! remapped to wgpu's `[0, 1]` depth range on upload.

mod shaders;

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;

use crate::backend::traits::*;
use crate::error::{CompositorError, CompositorResult};
use crate::resources::{RenderTargetDescriptor, RenderTargetPool, RenderTargetState, TexelType};
use crate::scene::{Camera, Scene, Vertex};

pub use shaders::{COMPOSITE_SHADER, MESH_SHADER};

const CANVAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Maps GL clip-space z in `[-w, w]` to wgpu's `[0, w]`.
#[rustfmt::skip]
const OPENGL_TO_WGPU_MATRIX: Mat4 = Mat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
]);

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawUniforms {
    mvp: [[f32; 4]; 4],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CompositeUniforms {
    opacity: f32,
    _pad: [f32; 3],
}

/// GPU storage behind a render target or the canvas
struct GpuTarget {
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    _texture: wgpu::Texture,
    layer_views: Vec<wgpu::TextureView>,
    sample_view: wgpu::TextureView,
    _depth: wgpu::Texture,
    depth_views: Vec<wgpu::TextureView>,
}

impl GpuTarget {
    fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        layers: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let size = wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: layers,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let layer_view = |texture: &wgpu::Texture, layer: u32| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(label),
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_array_layer: layer,
                array_layer_count: Some(1),
                ..Default::default()
            })
        };

        let layer_views = (0..layers).map(|layer| layer_view(&texture, layer)).collect();
        let depth_views = (0..layers).map(|layer| layer_view(&depth, layer)).collect();
        let sample_view = layer_view(&texture, 0);

        Self {
            format,
            width: size.width,
            height: size.height,
            _texture: texture,
            layer_views,
            sample_view,
            _depth: depth,
            depth_views,
        }
    }

    fn layer(&self, face: u32) -> usize {
        (face as usize).min(self.layer_views.len().saturating_sub(1))
    }
}

/// Offscreen wgpu backend.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    capabilities: Capabilities,

    canvas: GpuTarget,
    targets: RenderTargetPool,
    gpu_targets: HashMap<u64, GpuTarget>,

    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    mesh_shader: wgpu::ShaderModule,
    composite_shader: wgpu::ShaderModule,
    mesh_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    composite_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    sampler: wgpu::Sampler,
    _white_texture: wgpu::Texture,
    white_view: wgpu::TextureView,

    current_target: Option<RenderTargetHandle>,
    viewport: Viewport,
    clear_color: wgpu::Color,
    canvas_opacity: f32,
}

impl WgpuBackend {
    /// Create a backend with an offscreen canvas of `width` x `height`.
    pub fn new_headless(width: u32, height: u32) -> CompositorResult<Self> {
        pollster::block_on(Self::new_async(width, height))
    }

    pub async fn new_async(width: u32, height: u32) -> CompositorResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| CompositorError::Backend("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Compositor Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| CompositorError::Backend(e.to_string()))?;

        let half_float_linear = adapter
            .get_texture_format_features(wgpu::TextureFormat::Rgba16Float)
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE);
        let capabilities = Capabilities {
            gpu_available: true,
            max_fragment_uniform_vectors: adapter.limits().max_uniform_buffer_binding_size / 16,
            half_float_linear,
            is_mobile: false,
            platform_pixel_ratio: 1.0,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compositor Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compositor Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let mesh_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mesh Shader"),
            source: wgpu::ShaderSource::Wgsl(MESH_SHADER.into()),
        });
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(COMPOSITE_SHADER.into()),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Compositor Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let white_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("White Texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &white_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255u8; 4],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let white_view = white_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let canvas = GpuTarget::new(&device, "Canvas", width, height, 1, CANVAS_FORMAT);

        let mut backend = Self {
            device,
            queue,
            adapter_name: adapter_info.name,
            capabilities,
            canvas,
            targets: RenderTargetPool::new(),
            gpu_targets: HashMap::new(),
            bind_group_layout,
            pipeline_layout,
            mesh_shader,
            composite_shader,
            mesh_pipelines: HashMap::new(),
            composite_pipelines: HashMap::new(),
            sampler,
            _white_texture: white_texture,
            white_view,
            current_target: None,
            viewport: Viewport::full(width, height),
            clear_color: wgpu::Color::TRANSPARENT,
            canvas_opacity: 1.0,
        };
        backend.clear_all_layers(None);
        Ok(backend)
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn texture_format(descriptor: &RenderTargetDescriptor) -> wgpu::TextureFormat {
        // RGB has no wgpu counterpart and 32-bit float is not filterable.
        match descriptor.texel {
            TexelType::U8 => wgpu::TextureFormat::Rgba8Unorm,
            TexelType::F16 | TexelType::F32 => wgpu::TextureFormat::Rgba16Float,
        }
    }

    fn gpu_target(&self, target: Option<RenderTargetHandle>) -> Option<&GpuTarget> {
        match target {
            None => Some(&self.canvas),
            Some(handle) => self.gpu_targets.get(&handle.0),
        }
    }

    fn active_face(&self, target: Option<RenderTargetHandle>) -> u32 {
        target
            .and_then(|handle| self.targets.get(handle))
            .map(|state| state.active_cube_face)
            .unwrap_or(0)
    }

    /// The stored viewport converted to top-left origin and clamped to the attachment.
    fn pixel_viewport(&self, viewport: Viewport, width: u32, height: u32) -> Option<[f32; 4]> {
        let (width, height) = (width as f32, height as f32);
        let x = viewport.x.clamp(0.0, width);
        let y = viewport.y.clamp(0.0, height);
        let w = viewport.width.min(width - x);
        let h = viewport.height.min(height - y);
        if w <= 0.0 || h <= 0.0 {
            return None;
        }
        Some([x, height - (y + h), w, h])
    }

    fn ensure_mesh_pipeline(&mut self, format: wgpu::TextureFormat) {
        if self.mesh_pipelines.contains_key(&format) {
            return;
        }
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Mesh Pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.mesh_shader,
                    entry_point: "vs_main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &VERTEX_ATTRIBUTES,
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.mesh_shader,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        self.mesh_pipelines.insert(format, pipeline);
    }

    fn ensure_composite_pipeline(&mut self, format: wgpu::TextureFormat) {
        if self.composite_pipelines.contains_key(&format) {
            return;
        }
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Composite Pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.composite_shader,
                    entry_point: "vs_main",
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.composite_shader,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        self.composite_pipelines.insert(format, pipeline);
    }

    /// Clear every layer of a freshly created target so depth tests start at 1.0.
    fn clear_all_layers(&mut self, target: Option<RenderTargetHandle>) {
        let Some(gpu) = self.gpu_target(target) else {
            return;
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Target Init Encoder"),
            });
        for (color, depth) in gpu.layer_views.iter().zip(&gpu.depth_views) {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Target Init"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn bump_version(&mut self, target: Option<RenderTargetHandle>) {
        if let Some(state) = target.and_then(|handle| self.targets.get_mut(handle)) {
            state.version += 1;
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.canvas = GpuTarget::new(&self.device, "Canvas", width, height, 1, CANVAS_FORMAT);
        self.viewport = Viewport::full(width, height);
        self.clear_all_layers(None);
        log::debug!("Canvas resized to {width}x{height}");
    }

    fn size(&self) -> (u32, u32) {
        (self.canvas.width, self.canvas.height)
    }

    fn create_render_target(
        &mut self,
        descriptor: &RenderTargetDescriptor,
    ) -> CompositorResult<RenderTargetHandle> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if descriptor.width == 0
            || descriptor.height == 0
            || descriptor.width > limit
            || descriptor.height > limit
        {
            return Err(CompositorError::RenderTargetCreation(format!(
                "{}x{} is outside 1..={limit}",
                descriptor.width, descriptor.height
            )));
        }

        let handle = self.targets.allocate(descriptor);
        let label = descriptor.label.as_deref().unwrap_or("Render Target");
        let gpu = GpuTarget::new(
            &self.device,
            label,
            descriptor.width,
            descriptor.height,
            descriptor.kind.layers(),
            Self::texture_format(descriptor),
        );
        self.gpu_targets.insert(handle.0, gpu);
        self.clear_all_layers(Some(handle));
        log::trace!("Created render target {handle:?} ({label})");
        Ok(handle)
    }

    fn destroy_render_target(&mut self, handle: RenderTargetHandle) {
        if self.current_target == Some(handle) {
            self.current_target = None;
        }
        self.targets.release(handle);
        self.gpu_targets.remove(&handle.0);
    }

    fn render_target(&self, handle: RenderTargetHandle) -> Option<&RenderTargetState> {
        self.targets.get(handle)
    }

    fn render_target_mut(&mut self, handle: RenderTargetHandle) -> Option<&mut RenderTargetState> {
        self.targets.get_mut(handle)
    }

    fn set_render_target(&mut self, target: Option<RenderTargetHandle>) {
        self.current_target = target.filter(|handle| self.targets.contains(*handle));
    }

    fn current_render_target(&self) -> Option<RenderTargetHandle> {
        self.current_target
    }

    fn set_clear_color(&mut self, color: Vec3, alpha: f32) {
        self.clear_color = wgpu::Color {
            r: color.x as f64,
            g: color.y as f64,
            b: color.z as f64,
            a: alpha as f64,
        };
    }

    fn clear(&mut self, color: bool, depth: bool, _stencil: bool) {
        let target = self.current_target;
        let face = self.active_face(target);
        let Some(gpu) = self.gpu_target(target) else {
            return;
        };
        let layer = gpu.layer(face);

        let color_load = if color {
            wgpu::LoadOp::Clear(self.clear_color)
        } else {
            wgpu::LoadOp::Load
        };
        let depth_load = if depth {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &gpu.layer_views[layer],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &gpu.depth_views[layer],
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn render(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        target: Option<RenderTargetHandle>,
        force_clear: bool,
    ) {
        if target.is_some() {
            self.set_render_target(target);
        }
        if force_clear {
            self.clear(true, true, true);
        }

        let current = self.current_target;
        let face = self.active_face(current);
        let Some(format) = self.gpu_target(current).map(|gpu| gpu.format) else {
            return;
        };
        self.ensure_mesh_pipeline(format);

        let view_projection = OPENGL_TO_WGPU_MATRIX * camera.view_projection_matrix();

        struct Draw {
            vertices: wgpu::Buffer,
            indices: wgpu::Buffer,
            index_count: u32,
            bind_group: wgpu::BindGroup,
        }

        let mut draws = Vec::new();
        for renderable in scene.renderables() {
            let Some(mesh) = scene.mesh(renderable.mesh) else {
                continue;
            };
            if mesh.indices.is_empty() {
                continue;
            }
            let material = scene
                .effective_material(&renderable)
                .and_then(|id| scene.materials.get(id));
            let color = material.map(|m| m.color).unwrap_or(Vec4::ONE);
            // A target can't be sampled while it is being drawn into.
            let texture_view = material
                .and_then(|m| m.primary_texture())
                .filter(|handle| Some(*handle) != current)
                .and_then(|handle| self.gpu_targets.get(&handle.0))
                .map(|gpu| &gpu.sample_view)
                .unwrap_or(&self.white_view);

            let uniforms = DrawUniforms {
                mvp: (view_projection * renderable.world).to_cols_array_2d(),
                color: color.to_array(),
            };
            let uniform_buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Draw Uniforms"),
                    contents: bytemuck::bytes_of(&uniforms),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Draw Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(texture_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            let vertices = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(mesh.name.as_str()),
                    contents: mesh.vertex_bytes(),
                    usage: wgpu::BufferUsages::VERTEX,
                });
            let indices = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(mesh.name.as_str()),
                    contents: mesh.index_bytes(),
                    usage: wgpu::BufferUsages::INDEX,
                });
            draws.push(Draw {
                vertices,
                indices,
                index_count: mesh.indices.len() as u32,
                bind_group,
            });
        }

        let (Some(gpu), Some(pipeline)) = (self.gpu_target(current), self.mesh_pipelines.get(&format))
        else {
            return;
        };
        let layer = gpu.layer(face);
        let viewport = self.pixel_viewport(self.viewport, gpu.width, gpu.height);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Scene Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &gpu.layer_views[layer],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &gpu.depth_views[layer],
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some([x, y, w, h]) = viewport {
                pass.set_viewport(x, y, w, h, 0.0, 1.0);
                pass.set_pipeline(pipeline);
                for draw in &draws {
                    pass.set_bind_group(0, &draw.bind_group, &[]);
                    pass.set_vertex_buffer(0, draw.vertices.slice(..));
                    pass.set_index_buffer(draw.indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..draw.index_count, 0, 0..1);
                }
            }
        }
        self.queue.submit(Some(encoder.finish()));
        self.bump_version(current);
    }

    fn composite(&mut self, draw: &CompositeDraw) {
        let Some(source) = draw.source else {
            log::trace!("Composite '{}' skipped: no source", draw.effect);
            return;
        };
        if draw.target == Some(source) {
            log::warn!("Composite '{}' reads and writes the same target", draw.effect);
            return;
        }
        let face = self.active_face(draw.target);
        let Some(format) = self.gpu_target(draw.target).map(|gpu| gpu.format) else {
            return;
        };
        self.ensure_composite_pipeline(format);

        let uniforms = CompositeUniforms {
            opacity: draw.opacity,
            _pad: [0.0; 3],
        };
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Composite Uniforms"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let (Some(source_gpu), Some(gpu), Some(pipeline)) = (
            self.gpu_targets.get(&source.0),
            self.gpu_target(draw.target),
            self.composite_pipelines.get(&format),
        ) else {
            return;
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source_gpu.sample_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let layer = gpu.layer(face);
        let viewport = draw
            .viewport
            .unwrap_or(Viewport::full(gpu.width, gpu.height));
        let viewport = self.pixel_viewport(viewport, gpu.width, gpu.height);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Composite Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(draw.effect.as_str()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &gpu.layer_views[layer],
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
            if let Some([x, y, w, h]) = viewport {
                pass.set_viewport(x, y, w, h, 0.0, 1.0);
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        self.bump_version(draw.target);
    }

    fn set_canvas_opacity(&mut self, opacity: f32) {
        self.canvas_opacity = opacity;
    }

    fn canvas_opacity(&self) -> f32 {
        self.canvas_opacity
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gl_depth_maps_to_unit_range() {
        let near = OPENGL_TO_WGPU_MATRIX * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = OPENGL_TO_WGPU_MATRIX * Vec4::new(0.0, 0.0, 1.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-6);
        assert!((far.z / far.w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn draw_uniforms_are_tightly_packed() {
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 80);
        assert_eq!(std::mem::size_of::<CompositeUniforms>(), 16);
    }
}
