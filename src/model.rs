// Mesh data and vertex buffers
//
// Interleaved position/normal/color vertices in a host-visible buffer.
// Mesh loading is a collaborator concern; the built-in cube keeps the
// renderer self-contained.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::sync::Arc;

use crate::backend::buffer::Buffer;
use crate::backend::VulkanDevice;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
}

impl Vertex {
    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()]
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(12)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(24)
                .build(),
        ]
    }
}

/// A mesh with its vertex buffer, ready to bind and draw.
pub struct Model {
    device: Arc<VulkanDevice>,
    vertex_buffer: Buffer,
    vertex_count: u32,
}

impl Model {
    pub fn new(device: Arc<VulkanDevice>, vertices: &[Vertex]) -> Result<Self> {
        anyhow::ensure!(vertices.len() >= 3, "vertex count must be at least 3");

        let vertex_buffer = Buffer::vertex_with_data(device.clone(), vertices, "mesh vertices")?;

        Ok(Self {
            device,
            vertex_buffer,
            vertex_count: vertices.len() as u32,
        })
    }

    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        let buffers = [self.vertex_buffer.handle()];
        let offsets = [0];
        unsafe {
            self.device
                .device
                .cmd_bind_vertex_buffers(command_buffer, 0, &buffers, &offsets);
        }
    }

    pub fn draw(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .device
                .cmd_draw(command_buffer, self.vertex_count, 1, 0, 0);
        }
    }
}

/// Unit cube centered at the origin, one flat color and normal per face.
pub fn cube_vertices() -> Vec<Vertex> {
    // (normal, color) per face; each face expands to two triangles
    let faces: [(Vec3, Vec3, [Vec3; 4]); 6] = [
        (
            Vec3::NEG_X,
            Vec3::new(0.9, 0.9, 0.9),
            [
                Vec3::new(-0.5, -0.5, -0.5),
                Vec3::new(-0.5, -0.5, 0.5),
                Vec3::new(-0.5, 0.5, 0.5),
                Vec3::new(-0.5, 0.5, -0.5),
            ],
        ),
        (
            Vec3::X,
            Vec3::new(0.8, 0.8, 0.1),
            [
                Vec3::new(0.5, -0.5, -0.5),
                Vec3::new(0.5, 0.5, -0.5),
                Vec3::new(0.5, 0.5, 0.5),
                Vec3::new(0.5, -0.5, 0.5),
            ],
        ),
        (
            Vec3::NEG_Y,
            Vec3::new(0.9, 0.6, 0.1),
            [
                Vec3::new(-0.5, -0.5, -0.5),
                Vec3::new(0.5, -0.5, -0.5),
                Vec3::new(0.5, -0.5, 0.5),
                Vec3::new(-0.5, -0.5, 0.5),
            ],
        ),
        (
            Vec3::Y,
            Vec3::new(0.8, 0.1, 0.1),
            [
                Vec3::new(-0.5, 0.5, -0.5),
                Vec3::new(-0.5, 0.5, 0.5),
                Vec3::new(0.5, 0.5, 0.5),
                Vec3::new(0.5, 0.5, -0.5),
            ],
        ),
        (
            Vec3::NEG_Z,
            Vec3::new(0.1, 0.1, 0.8),
            [
                Vec3::new(-0.5, -0.5, -0.5),
                Vec3::new(-0.5, 0.5, -0.5),
                Vec3::new(0.5, 0.5, -0.5),
                Vec3::new(0.5, -0.5, -0.5),
            ],
        ),
        (
            Vec3::Z,
            Vec3::new(0.1, 0.8, 0.1),
            [
                Vec3::new(-0.5, -0.5, 0.5),
                Vec3::new(0.5, -0.5, 0.5),
                Vec3::new(0.5, 0.5, 0.5),
                Vec3::new(-0.5, 0.5, 0.5),
            ],
        ),
    ];

    let mut vertices = Vec::with_capacity(36);
    for (normal, color, corners) in faces {
        for &i in &[0usize, 1, 2, 0, 2, 3] {
            vertices.push(Vertex {
                position: corners[i],
                normal,
                color,
            });
        }
    }
    vertices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_and_offsets_are_interleaved() {
        assert_eq!(std::mem::size_of::<Vertex>(), 36);

        let bindings = Vertex::binding_descriptions();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 36);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
    }

    #[test]
    fn cube_has_two_triangles_per_face() {
        let vertices = cube_vertices();
        assert_eq!(vertices.len(), 36);
    }

    #[test]
    fn cube_face_normals_are_axis_aligned_units() {
        for v in cube_vertices() {
            assert!((v.normal.length() - 1.0).abs() < 1e-6);
            // Normals point along exactly one axis
            let components = [v.normal.x, v.normal.y, v.normal.z];
            assert_eq!(components.iter().filter(|c| c.abs() > 1e-6).count(), 1);
        }
    }

    #[test]
    fn cube_vertices_cast_to_bytes() {
        let vertices = cube_vertices();
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 36 * 36);
    }
}
