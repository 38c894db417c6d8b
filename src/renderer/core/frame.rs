use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::config::Timeout;
use crate::renderer::core::command::{CommandEncoder, CommandPool};
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::error::{HarnessError, HarnessResult};
use crate::renderer::core::swapchain::SurfaceState;
use crate::renderer::core::sync::{Fence, Semaphore};

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
}

/// Bookkeeping for the ring of frame slots, independent of any GPU objects.
///
/// A slot moves `Idle -> Recording -> Submitted` and back to `Idle` once its
/// fence was observed signaled. Because a slot is only reused after that, at
/// most `len()` frames are ever submitted and unfinished.
#[derive(Debug)]
pub struct FrameRing {
    states: Vec<SlotState>,
    frame_index: usize,
    frame_counter: u64,
}

impl FrameRing {
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "at least one frame slot is required");
        Self {
            states: vec![SlotState::Idle; frames_in_flight],
            frame_index: 0,
            frame_counter: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Slot the next frame records into.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Number of frames submitted since creation.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    pub fn submitted_count(&self) -> usize {
        self.states
            .iter()
            .filter(|state| **state == SlotState::Submitted)
            .count()
    }

    /// The slot's fence is signaled, its previous submission finished.
    pub fn retire(&mut self, slot: usize) {
        if self.states[slot] == SlotState::Submitted {
            self.states[slot] = SlotState::Idle;
        }
    }

    pub fn begin(&mut self, slot: usize) -> HarnessResult<()> {
        self.transition(slot, SlotState::Idle, SlotState::Recording)
    }

    pub fn submit(&mut self, slot: usize) -> HarnessResult<()> {
        self.transition(slot, SlotState::Recording, SlotState::Submitted)?;
        self.frame_counter += 1;
        Ok(())
    }

    /// Recording stopped without a submission.
    pub fn abandon(&mut self, slot: usize) -> HarnessResult<()> {
        self.transition(slot, SlotState::Recording, SlotState::Idle)
    }

    pub fn advance(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.states.len();
    }

    /// All slots idle again, used after the device was drained.
    pub fn reset(&mut self) {
        self.states.fill(SlotState::Idle);
        self.frame_index = 0;
    }

    fn transition(
        &mut self,
        slot: usize,
        expected: SlotState,
        next: SlotState,
    ) -> HarnessResult<()> {
        let actual = self.states[slot];
        if actual != expected {
            return Err(HarnessError::SlotTransition { slot, actual, expected });
        }
        self.states[slot] = next;
        Ok(())
    }
}

/// How one attempt at rendering a frame ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Submitted and presented. Anything but `Valid` asks for a resize.
    Presented(SurfaceState),
    /// Acquire found the surface out of date. Nothing was submitted.
    Stale,
    /// A GPU wait timed out and the frame was dropped.
    Skipped,
}

/// Per frame-in-flight command buffer and synchronization objects
pub struct FrameSlot {
    pub command_buffer: CommandEncoder,

    // Signaled when the acquired swapchain image can be written to.
    pub image_available: Semaphore,

    // Signaled when the submitted commands finished, waited on by present.
    pub render_complete: Semaphore,

    // Signaled when the slot's command buffer may be reused.
    pub in_flight: Fence,
}

impl FrameSlot {
    fn new(
        device: &Arc<ash::Device>,
        command_buffer: vk::CommandBuffer,
    ) -> HarnessResult<Self> {
        Ok(Self {
            command_buffer: CommandEncoder::new(command_buffer, device.clone()),
            image_available: Semaphore::new(device)?,
            render_complete: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }
}

/// Drives acquire, record, submit and present over a ring of frame slots
pub struct FrameScheduler {
    slots: Vec<FrameSlot>,
    ring: FrameRing,

    command_pool: vk::CommandPool,
    queue: vk::Queue,
    fence_timeout: Timeout,
    device: Arc<ash::Device>,
}

impl FrameScheduler {
    pub fn new(
        device: &RenderDevice,
        frames_in_flight: usize,
        fence_timeout: Timeout,
    ) -> Result<Self> {
        let command_pool = &device.command_pool;
        let logical = device.logical.clone();
        let command_buffers = command_pool.allocate(frames_in_flight as u32)?;
        let slots = build_slots(
            command_buffers,
            |command_buffer| FrameSlot::new(&logical, command_buffer),
            |command_buffers| command_pool.free(command_buffers),
        )?;

        Ok(Self {
            slots,
            ring: FrameRing::new(frames_in_flight),
            command_pool: command_pool.handle,
            queue: device.graphics_queue.handle,
            fence_timeout,
            device: logical,
        })
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// Waits until the current slot is free and prepares it for recording.
    pub fn begin_frame(&mut self) -> HarnessResult<usize> {
        let index = self.ring.frame_index();
        let slot = &mut self.slots[index];

        slot.in_flight.wait(self.fence_timeout)?;
        self.ring.retire(index);

        slot.in_flight.reset()?;
        slot.command_buffer.reset()?;
        self.ring.begin(index)?;
        log::trace!("Frame slot {} begun, {} still submitted", index, self.ring.submitted_count());

        Ok(index)
    }

    /// Runs `record` between begin and end of the current slot's command buffer.
    pub fn record_into<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let slot = &mut self.slots[self.ring.frame_index()];
        slot.command_buffer.begin_recording()?;
        let recorded = record(slot.command_buffer.command_buffer);
        slot.command_buffer.end_recording()?;
        recorded
    }

    /// Submits the current slot. Execution waits for the image to be available
    /// before writing color output, and signals the slot's fence when done.
    pub fn submit(&mut self) -> HarnessResult<()> {
        let index = self.ring.frame_index();
        let slot = &self.slots[index];

        let wait_semaphores = [slot.image_available.handle];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer.command_buffer];
        let signal_semaphores = [slot.render_complete.handle];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.queue_submit(self.queue, &[submit_info], slot.in_flight.handle)?;
        }
        self.ring.submit(index)
    }

    /// Gives up the current frame after its fence was reset. The fence is
    /// replaced by a signaled one so the slot can be waited on again.
    pub fn abandon_frame(&mut self) -> HarnessResult<()> {
        let index = self.ring.frame_index();
        self.slots[index].in_flight = Fence::new(&self.device, true)?;
        self.ring.abandon(index)
    }

    /// Moves to the next slot. Independent of the acquired image index.
    pub fn advance(&mut self) {
        self.ring.advance();
    }

    /// Recreates all synchronization objects, and the command buffers when asked.
    /// The device has to be idle. On failure the scheduler holds no slots and
    /// owns no command buffers.
    pub fn recreate(
        &mut self,
        command_pool: &CommandPool,
        reallocate_command_buffers: bool,
    ) -> Result<()> {
        let old_slots = std::mem::take(&mut self.slots);
        let mut command_buffers = old_slots
            .iter()
            .map(|slot| slot.command_buffer.command_buffer)
            .collect::<Vec<_>>();
        drop(old_slots);

        if reallocate_command_buffers {
            command_pool.free(&command_buffers);
            command_buffers = command_pool.allocate(self.ring.len() as u32)?;
        }

        let device = self.device.clone();
        self.slots = build_slots(
            command_buffers,
            |command_buffer| FrameSlot::new(&device, command_buffer),
            |command_buffers| command_pool.free(command_buffers),
        )?;
        self.ring.reset();
        Ok(())
    }
}

/// One slot per command buffer, or none at all. When a slot fails, the ones
/// already built are dropped and every command buffer goes to `release`.
fn build_slots<S, E>(
    command_buffers: Vec<vk::CommandBuffer>,
    create: impl FnMut(vk::CommandBuffer) -> Result<S, E>,
    release: impl FnOnce(&[vk::CommandBuffer]),
) -> Result<Vec<S>, E> {
    let built = command_buffers
        .iter()
        .copied()
        .map(create)
        .collect::<Result<Vec<_>, _>>();
    if built.is_err() {
        release(&command_buffers);
    }
    built
}

/// The owner drains the device before dropping the scheduler.
impl Drop for FrameScheduler {
    fn drop(&mut self) {
        let command_buffers = self.slots
            .iter()
            .map(|slot| slot.command_buffer.command_buffer)
            .collect::<Vec<_>>();
        if !command_buffers.is_empty() {
            unsafe {
                self.device.free_command_buffers(self.command_pool, &command_buffers);
            }
        }
    }
}
