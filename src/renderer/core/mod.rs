//! Device bring-up, presentation and the frame loop machinery.

pub mod attachments;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod queue;
pub mod resize;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod target;
