// GPU buffers and staged host->device uploads
//
// Host-visible memory is not guaranteed to be fast for the device, and
// device-local memory is not guaranteed to be host-mappable; a transient
// staging buffer bridges the two domains.

use ash::vk;

use super::error::RendererError;

/// A buffer handle paired with the allocation backing it. The pair is
/// owned exclusively and must be destroyed exactly once, buffer before
/// memory.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Destroy the buffer and free its memory. Calling this twice on the
    /// same pair double-frees; exactly-once is the owner's obligation.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Lowest memory type index whose bit is set in `allowed_types` and whose
/// property flags cover `required`. Exhausting the table is a hard error;
/// there is no fallback.
pub(crate) fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    allowed_types: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, RendererError> {
    for i in 0..memory_properties.memory_type_count {
        let type_allowed = allowed_types & (1 << i) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(required);

        if type_allowed && has_properties {
            return Ok(i);
        }
    }

    Err(RendererError::NoSuitableMemoryType {
        allowed_types,
        required,
    })
}

/// Create a buffer and bind freshly allocated memory of a matching type.
pub fn create_buffer(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<GpuBuffer, RendererError> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }
        .map_err(RendererError::creation("buffer"))?;

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let memory_type_index = match find_memory_type_index(
        memory_properties,
        requirements.memory_type_bits,
        properties,
    ) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(RendererError::creation("buffer memory")(e));
        }
    };

    if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        return Err(RendererError::creation("buffer memory binding")(e));
    }

    Ok(GpuBuffer {
        buffer,
        memory,
        size,
    })
}

/// Resource operations the staged uploader drives. The production
/// implementation talks to ash; tests substitute an allocation tracker to
/// pin the release discipline.
pub(crate) trait UploadOps {
    type Buffer;

    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self::Buffer, RendererError>;

    fn write(&mut self, buffer: &Self::Buffer, data: &[u8]) -> Result<(), RendererError>;

    fn copy(
        &mut self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: vk::DeviceSize,
    ) -> Result<(), RendererError>;

    fn destroy_buffer(&mut self, buffer: &Self::Buffer);
}

/// The staged-upload algorithm over abstract resource operations: create
/// a host-visible staging buffer, fill it, create the device-local
/// destination, copy across. The staging buffer is released exactly once
/// on every path, success or failure.
pub(crate) fn staged_upload<O: UploadOps>(
    ops: &mut O,
    data: &[u8],
    dst_usage: vk::BufferUsageFlags,
) -> Result<O::Buffer, RendererError> {
    let size = data.len() as vk::DeviceSize;

    let staging = ops.create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    if let Err(e) = ops.write(&staging, data) {
        ops.destroy_buffer(&staging);
        return Err(e);
    }

    let destination = match ops.create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_DST | dst_usage,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(buffer) => buffer,
        Err(e) => {
            ops.destroy_buffer(&staging);
            return Err(e);
        }
    };

    let copied = ops.copy(&staging, &destination, size);
    ops.destroy_buffer(&staging);

    match copied {
        Ok(()) => Ok(destination),
        Err(e) => {
            ops.destroy_buffer(&destination);
            Err(e)
        }
    }
}

struct DeviceUploadOps<'a> {
    device: &'a ash::Device,
    memory_properties: &'a vk::PhysicalDeviceMemoryProperties,
    transfer_queue: vk::Queue,
    transfer_pool: vk::CommandPool,
}

impl UploadOps for DeviceUploadOps<'_> {
    type Buffer = GpuBuffer;

    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer, RendererError> {
        create_buffer(self.device, self.memory_properties, size, usage, properties)
    }

    fn write(&mut self, buffer: &GpuBuffer, data: &[u8]) -> Result<(), RendererError> {
        unsafe {
            self.device
                .map_memory(buffer.memory, 0, buffer.size, vk::MemoryMapFlags::empty())
                .map(|mapped| {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast(), data.len());
                    self.device.unmap_memory(buffer.memory);
                })
        }
        .map_err(RendererError::creation("staging memory mapping"))
    }

    fn copy(
        &mut self,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: vk::DeviceSize,
    ) -> Result<(), RendererError> {
        copy_buffer(
            self.device,
            self.transfer_queue,
            self.transfer_pool,
            src.buffer,
            dst.buffer,
            size,
        )
    }

    fn destroy_buffer(&mut self, buffer: &GpuBuffer) {
        buffer.destroy(self.device);
    }
}

/// Upload `data` into a new device-local buffer via a transient staging
/// buffer and a one-shot transfer submission.
///
/// The calling thread blocks until the transfer queue is idle; staging
/// resources are released before returning. The caller owns the returned
/// buffer.
pub fn upload_to_device_local(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    transfer_queue: vk::Queue,
    transfer_pool: vk::CommandPool,
    data: &[u8],
    dst_usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer, RendererError> {
    let mut ops = DeviceUploadOps {
        device,
        memory_properties,
        transfer_queue,
        transfer_pool,
    };
    staged_upload(&mut ops, data, dst_usage)
}

/// Record and submit a one-shot buffer-to-buffer copy, then wait for the
/// transfer queue to drain before reclaiming the command buffer.
fn copy_buffer(
    device: &ash::Device,
    transfer_queue: vk::Queue,
    transfer_pool: vk::CommandPool,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<(), RendererError> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(transfer_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(RendererError::creation("transfer command buffer"))?;
    let command_buffer = command_buffers[0];

    let result = record_and_submit(device, transfer_queue, command_buffer, src, dst, size);

    unsafe { device.free_command_buffers(transfer_pool, &command_buffers) };

    result
}

fn record_and_submit(
    device: &ash::Device,
    transfer_queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<(), RendererError> {
    let stage = RendererError::creation("transfer submission");

    unsafe {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(RendererError::creation("transfer recording"))?;

        let region = vk::BufferCopy::default().size(size);
        device.cmd_copy_buffer(command_buffer, src, dst, &[region]);

        device
            .end_command_buffer(command_buffer)
            .map_err(RendererError::creation("transfer recording"))?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        device
            .queue_submit(transfer_queue, &[submit_info], vk::Fence::null())
            .map_err(stage)?;

        // The single deliberate suspension point in the bootstrap: all
        // uploads serialise on the host here.
        device
            .queue_wait_idle(transfer_queue)
            .map_err(RendererError::creation("transfer completion"))?;
    }

    Ok(())
}
