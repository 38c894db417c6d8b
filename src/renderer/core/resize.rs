use ash::vk;
use color_eyre::Result;
use crate::renderer::core::frame::FrameOutcome;
use crate::renderer::core::swapchain::SurfaceState;

/// Properties of the presentable chain that dependent resources care about
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainInfo {
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub format: vk::Format,
}

/// Owner of the surface dependent resources
pub trait ResizeTarget {
    /// Blocks until the device finished all submitted work.
    fn wait_idle(&mut self) -> Result<()>;

    /// Replaces the swapchain, depth buffer and framebuffers. Either everything
    /// is replaced or the error is returned.
    fn recreate_surface_resources(&mut self, width: u32, height: u32) -> Result<ChainInfo>;

    /// Recreates per-slot synchronization objects with signaled fences.
    fn recreate_frame_slots(&mut self, reallocate_command_buffers: bool) -> Result<()>;

    /// Lets aspect ratio dependent state follow the new extent.
    fn surface_resized(&mut self, extent: vk::Extent2D) -> Result<()>;
}

/// What the frame loop does with the surface around a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeAction {
    Keep,
    Resize { width: u32, height: u32 },
    /// Recreate at whatever the window reports now.
    ResizeToWindow,
}

/// Before a frame: a pending request is served when it changes the extent or
/// an earlier resize did not complete. Without a request, an unfinished
/// resize is retried at the window size.
pub fn resize_before_frame(
    pending: Option<(u32, u32)>,
    ready: bool,
    extent: vk::Extent2D,
) -> ResizeAction {
    match pending {
        Some((width, height)) if !ready || (width, height) != (extent.width, extent.height) => {
            ResizeAction::Resize { width, height }
        }
        Some(_) => ResizeAction::Keep,
        None if !ready => ResizeAction::ResizeToWindow,
        None => ResizeAction::Keep,
    }
}

/// After a frame: a stale or suboptimal surface is rebuilt at the window size.
pub fn resize_after_frame(outcome: FrameOutcome) -> ResizeAction {
    match outcome {
        FrameOutcome::Presented(SurfaceState::Valid) | FrameOutcome::Skipped => ResizeAction::Keep,
        FrameOutcome::Presented(_) | FrameOutcome::Stale => ResizeAction::ResizeToWindow,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    Resized(ChainInfo),
    /// Zero sized client area, nothing was recreated.
    Deferred,
}

/// Rebuilds surface dependent state after the window changed or the surface went stale.
///
/// While not ready, no frame may be started.
pub struct ResizeCoordinator {
    ready: bool,
    pending: Option<(u32, u32)>,
    chain: ChainInfo,
}

impl ResizeCoordinator {
    pub fn new(chain: ChainInfo) -> Self {
        Self {
            ready: true,
            pending: None,
            chain,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn chain(&self) -> ChainInfo {
        self.chain
    }

    /// Remembers a client size reported by the window system. The latest one wins.
    pub fn request(&mut self, width: u32, height: u32) {
        self.pending = Some((width, height));
    }

    /// Consumes the pending request and decides what happens before the next frame.
    pub fn before_frame(&mut self) -> ResizeAction {
        resize_before_frame(self.pending.take(), self.ready, self.chain.extent)
    }

    pub fn resize<T: ResizeTarget + ?Sized>(
        &mut self,
        target: &mut T,
        width: u32,
        height: u32,
    ) -> Result<ResizeOutcome> {
        self.ready = false;

        if width == 0 || height == 0 {
            log::debug!("Deferring resize to {}x{}", width, height);
            return Ok(ResizeOutcome::Deferred);
        }

        target.wait_idle()?;

        let chain = target.recreate_surface_resources(width, height)?;
        let image_count_changed = chain.image_count != self.chain.image_count;
        target.recreate_frame_slots(image_count_changed)?;
        self.chain = chain;

        target.surface_resized(chain.extent)?;

        log::info!(
            "Resized to {}x{} ({} images)",
            chain.extent.width,
            chain.extent.height,
            chain.image_count,
        );

        self.ready = true;
        Ok(ResizeOutcome::Resized(chain))
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre::eyre;
    use crate::renderer::core::frame::{FrameRing, SlotState, MAX_FRAMES_IN_FLIGHT};
    use super::*;

    /// Counts chain objects instead of creating them.
    struct FakeTarget {
        next_chain_id: u32,
        live_chains: Vec<u32>,
        destroyed_chains: Vec<u32>,
        live_views: usize,
        image_count: u32,
        extent: vk::Extent2D,
        fences_signaled: Vec<bool>,
        ring: FrameRing,
        gpu_busy: bool,
        reallocations: u32,
        calls: Vec<&'static str>,
        aspect_ratio: f32,
        fail_recreate: bool,
    }

    impl FakeTarget {
        fn new(width: u32, height: u32) -> Self {
            Self {
                next_chain_id: 1,
                live_chains: vec![0],
                destroyed_chains: Vec::new(),
                live_views: 3,
                image_count: 3,
                extent: vk::Extent2D { width, height },
                fences_signaled: vec![true; MAX_FRAMES_IN_FLIGHT],
                ring: FrameRing::new(MAX_FRAMES_IN_FLIGHT),
                gpu_busy: false,
                reallocations: 0,
                calls: Vec::new(),
                aspect_ratio: width as f32 / height as f32,
                fail_recreate: false,
            }
        }

        fn chain_info(&self) -> ChainInfo {
            ChainInfo {
                extent: self.extent,
                image_count: self.image_count,
                format: vk::Format::B8G8R8A8_UNORM,
            }
        }

        /// A frame submitted but not finished, as the render loop leaves it.
        fn submit_frame(&mut self) {
            let slot = self.ring.frame_index();
            self.fences_signaled[slot] = false;
            self.ring.begin(slot).unwrap();
            self.ring.submit(slot).unwrap();
            self.ring.advance();
            self.gpu_busy = true;
        }
    }

    impl ResizeTarget for FakeTarget {
        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push("wait_idle");
            self.gpu_busy = false;
            self.fences_signaled.fill(true);
            Ok(())
        }

        fn recreate_surface_resources(&mut self, width: u32, height: u32) -> Result<ChainInfo> {
            self.calls.push("surface");
            assert!(!self.gpu_busy, "chain recreated while the GPU was busy");
            if self.fail_recreate {
                return Err(eyre!("swapchain creation failed"));
            }

            let old = *self.live_chains.last().unwrap();
            let new = self.next_chain_id;
            self.next_chain_id += 1;
            self.live_chains.push(new);

            // The old chain goes away only after the new one exists
            self.live_chains.retain(|chain| *chain != old);
            self.destroyed_chains.push(old);
            self.live_views = self.image_count as usize;

            self.extent = vk::Extent2D { width, height };
            Ok(self.chain_info())
        }

        fn recreate_frame_slots(&mut self, reallocate_command_buffers: bool) -> Result<()> {
            self.calls.push("slots");
            if reallocate_command_buffers {
                self.reallocations += 1;
            }
            self.fences_signaled.fill(true);
            self.ring.reset();
            Ok(())
        }

        fn surface_resized(&mut self, extent: vk::Extent2D) -> Result<()> {
            self.calls.push("resized");
            self.aspect_ratio = extent.width as f32 / extent.height as f32;
            Ok(())
        }
    }

    #[test]
    fn shrink_leaves_every_slot_reusable() {
        let mut target = FakeTarget::new(1280, 720);
        let mut coordinator = ResizeCoordinator::new(target.chain_info());
        target.submit_frame();
        target.submit_frame();
        assert_eq!(target.ring.submitted_count(), 2);

        let outcome = coordinator.resize(&mut target, 640, 360).unwrap();

        let chain = coordinator.chain();
        assert_eq!(outcome, ResizeOutcome::Resized(chain));
        assert_eq!(chain.extent, vk::Extent2D { width: 640, height: 360 });
        assert!(coordinator.is_ready());
        assert!(target.fences_signaled.iter().all(|signaled| *signaled));
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            assert_eq!(target.ring.state(slot), SlotState::Idle);
        }
        assert!((target.aspect_ratio - 16.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn steps_run_in_order() {
        let mut target = FakeTarget::new(800, 600);
        let mut coordinator = ResizeCoordinator::new(target.chain_info());

        coordinator.resize(&mut target, 1024, 768).unwrap();

        assert_eq!(target.calls, vec!["wait_idle", "surface", "slots", "resized"]);
    }

    #[test]
    fn repeated_resize_is_idempotent_and_does_not_leak() {
        let mut target = FakeTarget::new(800, 600);
        let mut coordinator = ResizeCoordinator::new(target.chain_info());

        coordinator.resize(&mut target, 1024, 768).unwrap();
        let first = coordinator.chain();
        coordinator.resize(&mut target, 1024, 768).unwrap();
        let second = coordinator.chain();

        assert_eq!(first, second);
        assert_eq!(target.live_chains.len(), 1);
        assert_eq!(target.destroyed_chains, vec![0, 1]);
        assert_eq!(target.live_views, second.image_count as usize);
        assert_eq!(target.reallocations, 0);
    }

    #[test]
    fn command_buffers_reallocated_when_image_count_changes() {
        let mut target = FakeTarget::new(800, 600);
        let mut coordinator = ResizeCoordinator::new(target.chain_info());

        target.image_count = 4;
        coordinator.resize(&mut target, 800, 600).unwrap();
        coordinator.resize(&mut target, 800, 600).unwrap();

        assert_eq!(target.reallocations, 1);
        assert_eq!(coordinator.chain().image_count, 4);
    }

    #[test]
    fn failed_recreation_leaves_coordinator_not_ready() {
        let mut target = FakeTarget::new(800, 600);
        let mut coordinator = ResizeCoordinator::new(target.chain_info());
        target.fail_recreate = true;

        assert!(coordinator.resize(&mut target, 640, 480).is_err());

        assert!(!coordinator.is_ready());
        assert_eq!(coordinator.chain().extent, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(target.calls, vec!["wait_idle", "surface"]);
        assert_eq!(target.live_chains, vec![0]);
    }

    #[test]
    fn zero_area_is_deferred() {
        let mut target = FakeTarget::new(800, 600);
        let mut coordinator = ResizeCoordinator::new(target.chain_info());

        assert_eq!(coordinator.resize(&mut target, 0, 600).unwrap(), ResizeOutcome::Deferred);
        assert!(!coordinator.is_ready());
        assert!(target.calls.is_empty());

        coordinator.resize(&mut target, 800, 600).unwrap();
        assert!(coordinator.is_ready());
    }

    #[test]
    fn latest_request_wins() {
        let mut coordinator = ResizeCoordinator::new(FakeTarget::new(800, 600).chain_info());
        coordinator.request(100, 100);
        coordinator.request(200, 150);

        assert_eq!(coordinator.before_frame(), ResizeAction::Resize { width: 200, height: 150 });
        assert_eq!(coordinator.before_frame(), ResizeAction::Keep);
    }

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };

    #[test]
    fn pending_request_with_new_extent_resizes() {
        assert_eq!(
            resize_before_frame(Some((1024, 768)), true, EXTENT),
            ResizeAction::Resize { width: 1024, height: 768 }
        );
    }

    #[test]
    fn repeated_request_for_current_extent_is_ignored() {
        assert_eq!(resize_before_frame(Some((800, 600)), true, EXTENT), ResizeAction::Keep);
        assert_eq!(resize_before_frame(None, true, EXTENT), ResizeAction::Keep);
    }

    #[test]
    fn unfinished_resize_is_retried() {
        // Same extent still rebuilds, the previous attempt was deferred or failed
        assert_eq!(
            resize_before_frame(Some((800, 600)), false, EXTENT),
            ResizeAction::Resize { width: 800, height: 600 }
        );
        assert_eq!(resize_before_frame(None, false, EXTENT), ResizeAction::ResizeToWindow);
    }

    #[test]
    fn stale_or_suboptimal_frames_resize_to_window() {
        assert_eq!(resize_after_frame(FrameOutcome::Stale), ResizeAction::ResizeToWindow);
        assert_eq!(
            resize_after_frame(FrameOutcome::Presented(SurfaceState::OutOfDate)),
            ResizeAction::ResizeToWindow
        );
        assert_eq!(
            resize_after_frame(FrameOutcome::Presented(SurfaceState::Suboptimal)),
            ResizeAction::ResizeToWindow
        );
    }

    #[test]
    fn valid_or_skipped_frames_keep_the_surface() {
        assert_eq!(resize_after_frame(FrameOutcome::Presented(SurfaceState::Valid)), ResizeAction::Keep);
        assert_eq!(resize_after_frame(FrameOutcome::Skipped), ResizeAction::Keep);
    }

    #[test]
    fn deferred_resize_is_retried_before_the_next_frame() {
        let mut target = FakeTarget::new(800, 600);
        let mut coordinator = ResizeCoordinator::new(target.chain_info());
        coordinator.request(0, 0);

        let ResizeAction::Resize { width, height } = coordinator.before_frame() else {
            panic!("zero sized request was not served");
        };
        assert_eq!(coordinator.resize(&mut target, width, height).unwrap(), ResizeOutcome::Deferred);

        assert_eq!(coordinator.before_frame(), ResizeAction::ResizeToWindow);
    }
}
