// Mesh and MeshModel
//
// A Mesh owns one resident vertex buffer, optionally one resident index
// buffer, and a per-mesh transform. A MeshModel is the flattened scene
// graph with an aggregate transform on top.

use ash::vk;
use glam::Mat4;

use super::buffer::{self, GpuBuffer};
use super::error::RendererError;
use crate::scene::{self, MeshData, SceneNode};

pub struct Mesh {
    vertex_count: u32,
    index_count: u32,
    vertex_buffer: GpuBuffer,
    index_buffer: Option<GpuBuffer>,
    material_index: usize,
    transform: Mat4,
}

impl Mesh {
    /// Upload the given geometry into device-local buffers.
    ///
    /// Two staged uploads: one with vertex-buffer usage, and when indices
    /// are present a second with index-buffer usage.
    pub fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        transfer_queue: vk::Queue,
        transfer_pool: vk::CommandPool,
        data: &MeshData,
    ) -> Result<Self, RendererError> {
        let vertex_buffer = buffer::upload_to_device_local(
            device,
            memory_properties,
            transfer_queue,
            transfer_pool,
            bytemuck::cast_slice(&data.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let index_buffer = if data.indices.is_empty() {
            None
        } else {
            match buffer::upload_to_device_local(
                device,
                memory_properties,
                transfer_queue,
                transfer_pool,
                bytemuck::cast_slice(&data.indices),
                vk::BufferUsageFlags::INDEX_BUFFER,
            ) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    vertex_buffer.destroy(device);
                    return Err(e);
                }
            }
        };

        Ok(Self {
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
            vertex_buffer,
            index_buffer,
            material_index: data.material_index,
            transform: Mat4::IDENTITY,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.buffer
    }

    pub fn index_buffer(&self) -> Option<vk::Buffer> {
        self.index_buffer.as_ref().map(|b| b.buffer)
    }

    pub fn material_index(&self) -> usize {
        self.material_index
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    /// Visit every resident buffer exactly once.
    fn for_each_buffer(&self, f: &mut impl FnMut(&GpuBuffer)) {
        f(&self.vertex_buffer);
        if let Some(index_buffer) = &self.index_buffer {
            f(index_buffer);
        }
    }

    /// Destroy both resident buffers. Must be called exactly once, before
    /// the owning device is destroyed.
    pub fn destroy(&self, device: &ash::Device) {
        self.for_each_buffer(&mut |buffer| buffer.destroy(device));
    }
}

pub struct MeshModel {
    meshes: Vec<Mesh>,
    transform: Mat4,
}

impl MeshModel {
    /// Upload every payload of a scene graph, in flattened traversal
    /// order (parents before child subtrees).
    ///
    /// Meshes already uploaded are torn down again if a later upload
    /// fails; load is all-or-nothing.
    pub fn from_scene(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        transfer_queue: vk::Queue,
        transfer_pool: vk::CommandPool,
        root: &SceneNode,
    ) -> Result<Self, RendererError> {
        let mut meshes = Vec::new();

        for data in scene::flatten(root) {
            match Mesh::new(device, memory_properties, transfer_queue, transfer_pool, data) {
                Ok(mesh) => meshes.push(mesh),
                Err(e) => {
                    for mesh in &meshes {
                        mesh.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            meshes,
            transform: Mat4::IDENTITY,
        })
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn mesh(&self, index: usize) -> Option<&Mesh> {
        self.meshes.get(index)
    }

    pub fn mesh_mut(&mut self, index: usize) -> Option<&mut Mesh> {
        self.meshes.get_mut(index)
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    fn for_each_buffer(&self, f: &mut impl FnMut(&GpuBuffer)) {
        for mesh in &self.meshes {
            mesh.for_each_buffer(f);
        }
    }

    /// Fan out destruction to every owned mesh. Same exactly-once
    /// obligation as `Mesh::destroy`.
    pub fn destroy(&self, device: &ash::Device) {
        self.for_each_buffer(&mut |buffer| buffer.destroy(device));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resident_buffer(size: vk::DeviceSize) -> GpuBuffer {
        GpuBuffer {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size,
        }
    }

    fn mesh_with(vertex_size: u64, index_size: Option<u64>) -> Mesh {
        Mesh {
            vertex_count: 3,
            index_count: if index_size.is_some() { 3 } else { 0 },
            vertex_buffer: resident_buffer(vertex_size),
            index_buffer: index_size.map(resident_buffer),
            material_index: 0,
            transform: Mat4::IDENTITY,
        }
    }

    #[test]
    fn model_teardown_visits_every_owned_buffer_exactly_once() {
        let model = MeshModel {
            meshes: vec![mesh_with(10, Some(20)), mesh_with(30, None)],
            transform: Mat4::IDENTITY,
        };

        // Sizes double as buffer identities here.
        let mut visited = Vec::new();
        model.for_each_buffer(&mut |buffer| visited.push(buffer.size));
        assert_eq!(visited, vec![10, 20, 30]);
    }

    #[test]
    fn mesh_without_indices_tears_down_only_the_vertex_buffer() {
        let mesh = mesh_with(42, None);
        let mut visits = 0;
        mesh.for_each_buffer(&mut |_| visits += 1);
        assert_eq!(visits, 1);
    }
}
