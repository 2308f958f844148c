//! Window surface presentation.
//!
//! The harness draws nothing; each iteration clears the swapchain image and
//! presents it so the window stays responsive and the loop is paced by the
//! presentation engine.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use winit::{dpi::PhysicalSize, window::Window};

use crate::error::ContextCreationError;

pub(crate) struct PresentTarget {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    size_changed: bool,
}

impl PresentTarget {
    pub(crate) fn new(
        window: Arc<Window>,
        surface: wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        device: &wgpu::Device,
    ) -> Result<Self, ContextCreationError> {
        let size = window.inner_size();
        let caps = surface.get_capabilities(adapter);
        let Some(&format) = caps.formats.first() else {
            return Err(ContextCreationError::UnsupportedSurface(
                adapter.get_info().name,
            ));
        };
        // Fifo waits for vertical blank, which throttles the dispatch loop.
        let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            wgpu::PresentMode::Immediate
        };
        info!("Using present mode: {present_mode:?}");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(device, &config);

        Ok(Self {
            window,
            surface,
            config,
            size,
            size_changed: false,
        })
    }

    pub(crate) fn window(&self) -> &Window {
        &self.window
    }

    /// Records a new size; the surface is reconfigured before the next frame.
    pub(crate) fn resize(&mut self, size: PhysicalSize<u32>) {
        if self.size == size {
            return;
        }
        self.size = size;
        self.size_changed = true;
    }

    fn reconfigure(&mut self, device: &wgpu::Device) {
        if self.size.width > 0 && self.size.height > 0 {
            self.config.width = self.size.width;
            self.config.height = self.size.height;
            self.surface.configure(device, &self.config);
        }
    }

    pub(crate) fn present(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        if self.size_changed {
            self.reconfigure(device);
            self.size_changed = false;
        }
        // Minimized windows have nothing to present to.
        if self.size.width == 0 || self.size.height == 0 {
            return;
        }

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                debug!("Surface outdated/lost, reconfiguring...");
                self.reconfigure(device);
                return;
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("Surface timeout. Frame will be dropped.");
                return;
            }
            Err(e) => {
                error!("Surface error: {e}. Attempting to continue.");
                return;
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Present Encoder"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
        }
        queue.submit(Some(encoder.finish()));
        frame.present();
    }
}
