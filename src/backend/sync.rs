// Synchronization primitives
//
// Per-slot semaphores/fences for GPU-GPU and CPU-GPU ordering, plus the
// per-image table that tracks which slot last targeted each swapchain image.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Synchronization signals for one frame in flight.
pub struct FrameSync {
    /// Signaled by the presentation engine when the acquired image is usable.
    pub image_available: vk::Semaphore,
    /// Signaled by the graphics queue when the slot's submission finishes.
    pub render_finished: vk::Semaphore,
    /// CPU-side gate: the slot's resources must not be reused before this fires.
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Fence starts signaled so the first wait on a fresh slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
                in_flight_fence: device.device.create_fence(&fence_info, None)?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Tracks, per swapchain image, the frame slot that last submitted work
/// targeting it.
///
/// Before an image is reused by a different slot, the previous slot's fence
/// must be waited on; `mark_in_use` hands that slot back to the caller.
#[derive(Debug)]
pub struct ImageInFlightTable {
    last_user: Vec<Option<usize>>,
}

impl ImageInFlightTable {
    pub fn new(image_count: usize) -> Self {
        Self {
            last_user: vec![None; image_count],
        }
    }

    /// Records `slot` as the new user of `image_index` and returns the slot
    /// that previously used the image, if any and if different.
    pub fn mark_in_use(&mut self, image_index: usize, slot: usize) -> Option<usize> {
        let previous = self.last_user[image_index].replace(slot);
        previous.filter(|&p| p != slot)
    }

    pub fn last_user(&self, image_index: usize) -> Option<usize> {
        self.last_user[image_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_has_no_users() {
        let table = ImageInFlightTable::new(3);
        for i in 0..3 {
            assert_eq!(table.last_user(i), None);
        }
    }

    #[test]
    fn first_use_returns_no_stale_slot() {
        let mut table = ImageInFlightTable::new(3);
        assert_eq!(table.mark_in_use(0, 0), None);
        assert_eq!(table.last_user(0), Some(0));
    }

    #[test]
    fn reuse_by_other_slot_returns_stale_slot() {
        let mut table = ImageInFlightTable::new(2);
        assert_eq!(table.mark_in_use(1, 0), None);
        // Slot 1 targets the same image: slot 0's fence must be waited on
        assert_eq!(table.mark_in_use(1, 1), Some(0));
        assert_eq!(table.last_user(1), Some(1));
    }

    #[test]
    fn reuse_by_same_slot_needs_no_wait() {
        let mut table = ImageInFlightTable::new(2);
        table.mark_in_use(0, 1);
        // The slot-reuse fence wait already covers this case
        assert_eq!(table.mark_in_use(0, 1), None);
    }
}
