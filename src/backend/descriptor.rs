// Descriptor set layout, pool, and uniform buffer binding
//
// Small fixed-purpose capability: a pool sized for the per-frame global
// sets, a single-binding layout, and the write that points a set at its
// uniform buffer. Sets are written once; only buffer contents change later.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<VulkanDevice>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Layout with a single uniform buffer at `binding`, visible to the
    /// given shader stages.
    pub fn uniform_buffer(
        device: Arc<VulkanDevice>,
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> Result<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stages)
            .build()];

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe {
            device
                .device
                .create_descriptor_set_layout(&create_info, None)
                .context("Failed to create descriptor set layout")?
        };

        Ok(Self { device, layout })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool wrapper.
pub struct DescriptorPool {
    device: Arc<VulkanDevice>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Pool holding `max_sets` sets of one uniform buffer each.
    pub fn uniform_buffer_pool(device: Arc<VulkanDevice>, max_sets: u32) -> Result<Self> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: max_sets,
        }];

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe {
            device
                .device
                .create_descriptor_pool(&create_info, None)
                .context("Failed to create descriptor pool")?
        };

        Ok(Self { device, pool })
    }

    /// Allocate one set with the given layout. Sets live as long as the pool.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe {
            self.device
                .device
                .allocate_descriptor_sets(&alloc_info)
                .context("Failed to allocate descriptor set")?
        };

        Ok(sets[0])
    }

    /// Point `set`'s `binding` at a uniform buffer.
    pub fn write_uniform_buffer(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer_info: vk::DescriptorBufferInfo,
    ) {
        let buffer_infos = [buffer_info];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_infos)
            .build();

        unsafe {
            self.device.device.update_descriptor_sets(&[write], &[]);
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}
