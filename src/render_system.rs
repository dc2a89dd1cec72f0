// Scene render system
//
// Consumes the active command-recording context and a list of scene
// objects, binds the pipeline and per-frame descriptor set, and issues
// one push-constant + draw pair per object.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use crate::backend::pipeline::{Pipeline, PipelineConfig};
use crate::backend::VulkanDevice;
use crate::model::Vertex;
use crate::scene::{PushConstantData, SceneObject};

/// Everything a render system needs for the frame being recorded.
pub struct FrameContext {
    pub command_buffer: vk::CommandBuffer,
    pub frame_slot: usize,
    pub frame_time: f32,
    pub global_descriptor_set: vk::DescriptorSet,
}

pub struct SceneRenderSystem {
    device: Arc<VulkanDevice>,
    pipeline: Pipeline,
    pipeline_layout: vk::PipelineLayout,
}

impl SceneRenderSystem {
    pub fn new(
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
        vert_path: &Path,
        frag_path: &Path,
    ) -> Result<Self> {
        let push_constant_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(PushConstantData::SIZE as u32)
            .build();

        let set_layouts = [global_set_layout];
        let push_constant_ranges = [push_constant_range];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let pipeline_layout = unsafe {
            device
                .device
                .create_pipeline_layout(&layout_info, None)
                .context("Failed to create pipeline layout")?
        };

        let config = PipelineConfig::new(
            render_pass,
            pipeline_layout,
            Vertex::binding_descriptions(),
            Vertex::attribute_descriptions(),
        );

        let pipeline = match Pipeline::new(device.clone(), vert_path, frag_path, &config) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(e);
            }
        };

        Ok(Self {
            device,
            pipeline,
            pipeline_layout,
        })
    }

    /// Record draw calls for all objects into the frame's command buffer.
    /// Must be called inside an active render pass.
    pub fn render(&self, frame: &FrameContext, objects: &[SceneObject]) {
        let cmd = frame.command_buffer;

        self.pipeline.bind(cmd);

        unsafe {
            self.device.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[frame.global_descriptor_set],
                &[],
            );
        }

        for object in objects {
            let push = PushConstantData {
                model: object.transform.matrix(),
            };

            unsafe {
                self.device.device.cmd_push_constants(
                    cmd,
                    self.pipeline_layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&push),
                );
            }

            object.model.bind(cmd);
            object.model.draw(cmd);
        }
    }
}

impl Drop for SceneRenderSystem {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}
