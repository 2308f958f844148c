//! The storage image shared between the shader and the host.
//!
//! The image is an `Rgba32Float` texture bound at [`IMAGE_BINDING`] of bind
//! group 0 with read-write storage access. Every shader loaded by the harness
//! is linked against that layout.
//!
//! Readback copies the texture into a staging buffer. wgpu requires each
//! copied row to start at a multiple of
//! [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`] (256 bytes), so the staging rows are
//! padded and the padding is stripped while unpacking.

use wgpu::util::DeviceExt;

use crate::{config::ImageSize, context::GpuContext, error::HarnessError};

/// Binding slot of the image inside bind group 0.
pub const IMAGE_BINDING: u32 = 3;

/// Texel format of the shared image: four `f32` channels.
pub const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

const CHANNELS: u32 = 4;
const TEXEL_BYTES: u32 = CHANNELS * std::mem::size_of::<f32>() as u32;

/// Bind group and pipeline layouts describing the image slot.
pub(crate) struct ImageBindingLayout {
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) pipeline_layout: wgpu::PipelineLayout,
}

impl ImageBindingLayout {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compute Image Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: IMAGE_BINDING,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::ReadWrite,
                    format: IMAGE_FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compute Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        Self {
            bind_group_layout,
            pipeline_layout,
        }
    }
}

/// A fixed-size read-write storage image.
pub struct ImageResource {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    size: ImageSize,
}

impl ImageResource {
    /// Fails if an image of `size` cannot be created or read back on a device
    /// with `limits`.
    pub fn check_size(size: ImageSize, limits: &wgpu::Limits) -> Result<(), HarnessError> {
        let ImageSize { width, height } = size;
        let max_dimension = limits.max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            return Err(HarnessError::ImageExceedsLimits {
                width,
                height,
                max_dimension,
            });
        }
        let bytes = readback_bytes(size);
        if bytes > limits.max_buffer_size {
            return Err(HarnessError::ReadbackExceedsLimits {
                bytes,
                max: limits.max_buffer_size,
            });
        }
        Ok(())
    }

    /// Allocates the image, fills every channel with `fill` and binds it.
    #[tracing::instrument(level = "debug", skip(ctx))]
    pub fn create(ctx: &GpuContext, size: ImageSize, fill: f32) -> Self {
        let data = vec![fill; size.float_count()];
        let texture = ctx.device().create_texture_with_data(
            ctx.queue(),
            &wgpu::TextureDescriptor {
                label: Some("Compute Image"),
                size: extent_of(size),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: IMAGE_FORMAT,
                usage: wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            bytemuck::cast_slice(&data),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compute Image Bind Group"),
            layout: &ctx.image_layout.bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: IMAGE_BINDING,
                resource: wgpu::BindingResource::TextureView(&view),
            }],
        });

        Self {
            texture,
            bind_group,
            size,
        }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub(crate) fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// Copies the whole image back to the host.
    ///
    /// Returns `width * height * 4` floats, row-major, RGBA per texel. Blocks
    /// until the copy has completed.
    pub fn read(&self, ctx: &GpuContext) -> Result<Vec<f32>, HarnessError> {
        let ImageSize { width, height } = self.size;
        let row_bytes = width * TEXEL_BYTES;
        let padded_row = padded_row_bytes(width);

        let staging = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Compute Image Readback"),
            size: readback_bytes(self.size),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Compute Image Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            extent_of(self.size),
        );
        ctx.queue().submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.wait_idle()?;
        receiver.recv().map_err(|_| HarnessError::ReadbackDropped)??;

        let mapped = slice.get_mapped_range();
        let texels = unpad_rows(
            &mapped,
            padded_row as usize,
            row_bytes as usize,
            height as usize,
        );
        drop(mapped);
        staging.unmap();
        Ok(texels)
    }
}

fn extent_of(size: ImageSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn padded_row_bytes(width: u32) -> u32 {
    align_to(width * TEXEL_BYTES, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
}

/// Size of the staging buffer a full readback of `size` needs.
fn readback_bytes(size: ImageSize) -> u64 {
    u64::from(padded_row_bytes(size.width)) * u64::from(size.height)
}

/// Round `value` up to the next multiple of `alignment`.
fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Drops the per-row padding of a staging copy and decodes the floats.
fn unpad_rows(bytes: &[u8], padded_row_bytes: usize, row_bytes: usize, rows: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(rows * row_bytes / std::mem::size_of::<f32>());
    for row in bytes.chunks(padded_row_bytes).take(rows) {
        out.extend(
            row[..row_bytes]
                .chunks_exact(std::mem::size_of::<f32>())
                .map(bytemuck::pod_read_unaligned::<f32>),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_align_to_copy_alignment() {
        assert_eq!(align_to(160, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(0, 256), 0);
    }

    #[test]
    fn texel_is_sixteen_bytes() {
        assert_eq!(TEXEL_BYTES, 16);
    }

    #[test]
    fn readback_rows_are_padded() {
        assert_eq!(readback_bytes(ImageSize::new(10, 5)), 256 * 5);
        assert_eq!(readback_bytes(ImageSize::new(17, 2)), 512 * 2);
    }

    #[test]
    fn size_within_texture_limit_passes() {
        let limits = wgpu::Limits::default();
        assert!(ImageResource::check_size(ImageSize::new(10, 5), &limits).is_ok());
        let max = limits.max_texture_dimension_2d;
        assert!(ImageResource::check_size(ImageSize::new(max, 1), &limits).is_ok());
    }

    #[test]
    fn wide_image_is_rejected_before_allocation() {
        let limits = wgpu::Limits {
            max_texture_dimension_2d: 8192,
            ..wgpu::Limits::default()
        };
        let err = ImageResource::check_size(ImageSize::new(20000, 5), &limits).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ImageExceedsLimits {
                width: 20000,
                height: 5,
                max_dimension: 8192
            }
        ));
    }

    #[test]
    fn oversized_readback_is_rejected() {
        let limits = wgpu::Limits {
            max_texture_dimension_2d: 8192,
            max_buffer_size: 1 << 20,
            ..wgpu::Limits::default()
        };
        let err = ImageResource::check_size(ImageSize::new(1024, 1024), &limits).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ReadbackExceedsLimits { bytes, max } if bytes == 16 << 20 && max == 1 << 20
        ));
    }

    #[test]
    fn unpad_strips_row_padding() {
        // Two rows of one texel each, padded to 32 bytes per row.
        let mut bytes = Vec::new();
        for row in 0..2 {
            let texel = [row as f32, 1.0, 2.0, 3.0];
            bytes.extend_from_slice(bytemuck::cast_slice(&texel));
            bytes.extend_from_slice(&[0xAB; 16]);
        }
        let values = unpad_rows(&bytes, 32, 16, 2);
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 1.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn unpad_ignores_trailing_rows() {
        let bytes: Vec<u8> = bytemuck::cast_slice(&[0.5f32; 12]).to_vec();
        let values = unpad_rows(&bytes, 16, 16, 2);
        assert_eq!(values, vec![0.5; 8]);
    }
}
