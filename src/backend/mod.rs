// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash: explicit control, automatic cleanup on drop.

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
