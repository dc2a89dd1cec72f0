// GPU buffer and depth image handles
//
// Every allocation goes through the device allocator and is returned to it
// on drop, including when construction fails partway.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

/// A GPU buffer with its backing allocation.
///
/// Host-visible buffers stay persistently mapped for their whole lifetime;
/// the allocator hands out coherent mappings, so CPU writes are visible to
/// subsequent GPU reads without an explicit flush.
pub struct Buffer {
    device: Arc<VulkanDevice>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .device
                .create_buffer(&buffer_info, None)
                .context("Failed to create buffer")?
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator()
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { device.device.destroy_buffer(buffer, None) };
                anyhow::anyhow!("Failed to allocate buffer memory: {}", e)
            })?;

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { device.device.destroy_buffer(buffer, None) };
            let _ = device.allocator().lock().free(allocation);
            return Err(e).context("Failed to bind buffer memory");
        }

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Host-visible uniform buffer, mapped for per-frame rewrites.
    pub fn uniform(device: Arc<VulkanDevice>, size: vk::DeviceSize, name: &str) -> Result<Self> {
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            name,
        )
    }

    /// Host-visible vertex buffer filled with `data`.
    pub fn vertex_with_data<T: Pod>(
        device: Arc<VulkanDevice>,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let buffer = Self::new(
            device,
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::CpuToGpu,
            name,
        )?;
        buffer.write_slice(data)?;
        Ok(buffer)
    }

    /// Writes one Pod value at the start of the mapped buffer.
    pub fn write<T: Pod>(&self, value: &T) -> Result<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    /// Writes a Pod slice at the start of the mapped buffer.
    pub fn write_slice<T: Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        anyhow::ensure!(
            bytes.len() as vk::DeviceSize <= self.size,
            "write of {} bytes exceeds buffer size {}",
            bytes.len(),
            self.size
        );

        let allocation = self.allocation.as_ref().context("Buffer already freed")?;
        let ptr = allocation
            .mapped_ptr()
            .context("Buffer is not host-visible")?;

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr() as *mut u8, bytes.len());
        }
        Ok(())
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Descriptor info covering the whole buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator().lock().free(allocation);
        }
    }
}

/// Depth attachment: image, backing allocation, and view.
pub struct DepthImage {
    device: Arc<VulkanDevice>,
    image: vk::Image,
    allocation: Option<Allocation>,
    view: vk::ImageView,
    format: vk::Format,
}

impl DepthImage {
    pub fn new(device: Arc<VulkanDevice>, extent: vk::Extent2D) -> Result<Self> {
        let format = vk::Format::D32_SFLOAT;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            device
                .device
                .create_image(&image_info, None)
                .context("Failed to create depth image")?
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device
            .allocator()
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "depth attachment",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { device.device.destroy_image(image, None) };
                anyhow::anyhow!("Failed to allocate depth image memory: {}", e)
            })?;

        if let Err(e) = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { device.device.destroy_image(image, None) };
            let _ = device.allocator().lock().free(allocation);
            return Err(e).context("Failed to bind depth image memory");
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                let _ = device.allocator().lock().free(allocation);
                return Err(e).context("Failed to create depth image view");
            }
        };

        Ok(Self {
            device,
            image,
            allocation: Some(allocation),
            view,
            format,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for DepthImage {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator().lock().free(allocation);
        }
    }
}
