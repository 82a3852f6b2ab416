// Frame loop - acquire / submit / present / throttle
//
// FRAME TIMELINE (one call to `draw_frame`):
// ┌──────────────────────────────────────────────────────────────────────┐
// │  wait_slot ─> acquire ─┬─> submit ─> present ─> throttle ─> next slot │
// │                        │                  │                           │
// │              out of date: rebuild,        out of date / suboptimal:   │
// │              nothing submitted            rebuild after present       │
// └──────────────────────────────────────────────────────────────────────┘
//
// The GPU side lives behind `FrameBackend`; this module only owns the
// ordering rules, the frame-slot bookkeeping and the rebuild triggers.

use ash::prelude::VkResult;
use ash::vk;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use super::error::{RendererError, RendererResult};

/// Events pushed by the window, consumed between frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The drawable changed size; the new size is re-queried, not carried
    Resized,
    CloseRequested,
}

/// What one iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Presented, then rebuilt because present reported out of date / suboptimal
    PresentedAndRebuilt,
    /// Rebuilt without drawing: acquire reported out of date, or a resize was queued
    Rebuilt,
    /// Zero-sized window, nothing to draw into
    Skipped,
}

/// GPU operations the frame loop sequences
pub trait FrameBackend {
    /// Number of images in the current swapchain
    fn image_count(&self) -> usize;
    /// Number of frame slots the backend holds sync objects for
    fn frames_in_flight(&self) -> usize;
    /// Block until the slot's previous submission has finished
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()>;
    fn reset_slot(&mut self, slot: usize) -> RendererResult<()>;
    /// Acquire with an unbounded timeout, signalling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> VkResult<(u32, bool)>;
    /// Submit the image's command buffer; wait image-available, signal render-finished
    fn submit(&mut self, slot: usize, image_index: u32) -> VkResult<()>;
    /// Present waiting on render-finished. `Ok(true)` means suboptimal.
    fn present(&mut self, slot: usize, image_index: u32) -> VkResult<bool>;
    fn wait_present_idle(&mut self) -> RendererResult<()>;
    fn wait_device_idle(&mut self) -> RendererResult<()>;
    /// Tear down and recreate every swapchain-bound resource
    fn rebuild(&mut self, window_size: vk::Extent2D) -> RendererResult<()>;
}

pub struct FrameLoop<B: FrameBackend> {
    backend: B,
    frames_in_flight: usize,
    current_slot: usize,
    /// Frame slot whose submission last used each swapchain image
    image_owner: Vec<Option<usize>>,
    rebuild_pending: bool,
    close_requested: bool,
    rebuild_count: u64,
    events_tx: Sender<SurfaceEvent>,
    events_rx: Receiver<SurfaceEvent>,
}

impl<B: FrameBackend> FrameLoop<B> {
    /// Slot depth comes from the backend, so slot indices always have sync objects
    pub fn new(backend: B) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let image_owner = vec![None; backend.image_count()];
        let frames_in_flight = backend.frames_in_flight().max(1);

        Self {
            backend,
            frames_in_flight,
            current_slot: 0,
            image_owner,
            rebuild_pending: false,
            close_requested: false,
            rebuild_count: 0,
            events_tx,
            events_rx,
        }
    }

    /// Handle for the window side to push events with
    pub fn event_sender(&self) -> Sender<SurfaceEvent> {
        self.events_tx.clone()
    }

    /// Drain pending window events. Returns false once close was requested.
    pub fn pump_events(&mut self) -> bool {
        loop {
            match self.events_rx.try_recv() {
                Ok(SurfaceEvent::Resized) => self.rebuild_pending = true,
                Ok(SurfaceEvent::CloseRequested) => self.close_requested = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        !self.close_requested
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    #[cfg(test)]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Run one iteration of the frame protocol. At most one rebuild per call.
    pub fn draw_frame(&mut self, window_size: vk::Extent2D) -> RendererResult<FrameOutcome> {
        // Minimized: no valid extent to build for, keep any pending rebuild
        if window_size.width == 0 || window_size.height == 0 {
            return Ok(FrameOutcome::Skipped);
        }

        // A queued resize is its own iteration; the fresh chain is used next call
        if self.rebuild_pending {
            self.rebuild(window_size)?;
            return Ok(FrameOutcome::Rebuilt);
        }

        let slot = self.current_slot;
        self.backend.wait_for_slot(slot)?;

        // Step 1: acquire
        let image_index = match self.backend.acquire_image(slot) {
            Ok((index, _suboptimal)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Acquire: surface out of date");
                self.rebuild(window_size)?;
                return Ok(FrameOutcome::Rebuilt);
            }
            Err(result) => return Err(RendererError::AcquireFailed(result)),
        };

        // An image can come back while another slot's submission still uses it
        let image = image_index as usize;
        if let Some(owner) = self.image_owner.get(image).copied().flatten() {
            if owner != slot {
                self.backend.wait_for_slot(owner)?;
            }
        }
        if let Some(entry) = self.image_owner.get_mut(image) {
            *entry = Some(slot);
        }

        // Step 2: submit. The fence is only reset once a submit is certain.
        self.backend.reset_slot(slot)?;
        self.backend
            .submit(slot, image_index)
            .map_err(RendererError::SubmitFailed)?;

        // Step 3: present
        let needs_rebuild = match self.backend.present(slot, image_index) {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(result) => return Err(RendererError::PresentFailed(result)),
        };

        // Step 4: throttle. Deeper pipelines are throttled by the slot fences.
        if self.frames_in_flight == 1 {
            self.backend.wait_present_idle()?;
        }

        self.current_slot = (slot + 1) % self.frames_in_flight;

        if needs_rebuild {
            log::debug!("Present: surface out of date or suboptimal");
            self.rebuild(window_size)?;
            return Ok(FrameOutcome::PresentedAndRebuilt);
        }

        Ok(FrameOutcome::Presented)
    }

    /// Rebuild every swapchain-bound resource for the current window size
    pub fn rebuild(&mut self, window_size: vk::Extent2D) -> RendererResult<()> {
        self.backend.rebuild(window_size)?;
        self.image_owner = vec![None; self.backend.image_count()];
        self.rebuild_pending = false;
        self.rebuild_count += 1;
        Ok(())
    }

    /// Wait for all GPU work; call before any resource is dropped
    pub fn finish(&mut self) -> RendererResult<()> {
        self.backend.wait_device_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Reset(usize),
        Acquire(usize),
        Submit(usize, u32),
        Present(usize, u32),
        PresentIdle,
        DeviceIdle,
        Rebuild(u32, u32),
    }

    /// Scripted backend: acquire/present results are popped per call,
    /// falling back to success with round-robin image indices.
    struct MockBackend {
        calls: Vec<Call>,
        acquire_script: VecDeque<VkResult<(u32, bool)>>,
        present_script: VecDeque<VkResult<bool>>,
        image_count: usize,
        image_count_after_rebuild: usize,
        frames_in_flight: usize,
        next_image: u32,
        extent: vk::Extent2D,
    }

    impl MockBackend {
        fn new(image_count: usize) -> Self {
            Self {
                calls: Vec::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                image_count,
                image_count_after_rebuild: image_count,
                frames_in_flight: 1,
                next_image: 0,
                extent: vk::Extent2D { width: 800, height: 600 },
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        fn submits(&self) -> usize {
            self.count(|c| matches!(c, Call::Submit(..)))
        }

        fn rebuilds(&self) -> usize {
            self.count(|c| matches!(c, Call::Rebuild(..)))
        }
    }

    impl FrameBackend for MockBackend {
        fn image_count(&self) -> usize {
            self.image_count
        }

        fn frames_in_flight(&self) -> usize {
            self.frames_in_flight
        }

        fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> RendererResult<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> VkResult<(u32, bool)> {
            self.calls.push(Call::Acquire(slot));
            self.acquire_script.pop_front().unwrap_or_else(|| {
                let index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count as u32;
                Ok((index, false))
            })
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> VkResult<()> {
            self.calls.push(Call::Submit(slot, image_index));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VkResult<bool> {
            self.calls.push(Call::Present(slot, image_index));
            self.present_script.pop_front().unwrap_or(Ok(false))
        }

        fn wait_present_idle(&mut self) -> RendererResult<()> {
            self.calls.push(Call::PresentIdle);
            Ok(())
        }

        fn wait_device_idle(&mut self) -> RendererResult<()> {
            self.calls.push(Call::DeviceIdle);
            Ok(())
        }

        fn rebuild(&mut self, window_size: vk::Extent2D) -> RendererResult<()> {
            self.calls.push(Call::Rebuild(window_size.width, window_size.height));
            self.image_count = self.image_count_after_rebuild;
            self.extent = window_size;
            self.next_image = 0;
            Ok(())
        }
    }

    fn frame_loop(mut backend: MockBackend, frames_in_flight: usize) -> FrameLoop<MockBackend> {
        backend.frames_in_flight = frames_in_flight;
        FrameLoop::new(backend)
    }

    const SIZE: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn test_single_frame_in_flight_order() {
        let mut frames = frame_loop(MockBackend::new(3), 1);

        assert_eq!(frames.draw_frame(SIZE).unwrap(), FrameOutcome::Presented);
        assert_eq!(
            frames.backend().calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Submit(0, 0),
                Call::Present(0, 0),
                Call::PresentIdle,
            ]
        );
        assert_eq!(frames.current_slot(), 0);
    }

    #[test]
    fn test_out_of_date_acquire_rebuilds_without_submitting() {
        let mut backend = MockBackend::new(3);
        backend
            .acquire_script
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        let mut frames = frame_loop(backend, 2);

        assert_eq!(frames.draw_frame(SIZE).unwrap(), FrameOutcome::Rebuilt);
        assert_eq!(frames.backend().submits(), 0);
        assert_eq!(frames.backend().rebuilds(), 1);
        assert_eq!(frames.rebuild_count(), 1);
        // The slot's fence was never reset, so the next wait cannot deadlock
        assert_eq!(frames.backend().count(|c| matches!(c, Call::Reset(_))), 0);
        assert_eq!(frames.current_slot(), 0);

        assert_eq!(frames.draw_frame(SIZE).unwrap(), FrameOutcome::Presented);
        assert_eq!(frames.backend().submits(), 1);
        assert_eq!(frames.backend().rebuilds(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_still_draws() {
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(Ok((1, true)));
        let mut frames = frame_loop(backend, 1);

        assert_eq!(frames.draw_frame(SIZE).unwrap(), FrameOutcome::Presented);
        assert!(frames.backend().calls.contains(&Call::Submit(0, 1)));
        assert_eq!(frames.backend().rebuilds(), 0);
    }

    #[test]
    fn test_present_out_of_date_or_suboptimal_rebuilds_once_after_present() {
        for result in [Err(vk::Result::ERROR_OUT_OF_DATE_KHR), Ok(true)] {
            let mut backend = MockBackend::new(3);
            backend.present_script.push_back(result);
            let mut frames = frame_loop(backend, 1);

            assert_eq!(
                frames.draw_frame(SIZE).unwrap(),
                FrameOutcome::PresentedAndRebuilt
            );

            let calls = &frames.backend().calls;
            let present = calls
                .iter()
                .position(|c| matches!(c, Call::Present(..)))
                .unwrap();
            let rebuild = calls
                .iter()
                .position(|c| matches!(c, Call::Rebuild(..)))
                .unwrap();
            assert!(present < rebuild);
            assert_eq!(frames.backend().submits(), 1);
            assert_eq!(frames.backend().rebuilds(), 1);
        }
    }

    #[test]
    fn test_fatal_results_are_surfaced() {
        let mut backend = MockBackend::new(3);
        backend
            .acquire_script
            .push_back(Err(vk::Result::ERROR_DEVICE_LOST));
        let mut frames = frame_loop(backend, 1);
        assert!(matches!(
            frames.draw_frame(SIZE),
            Err(RendererError::AcquireFailed(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(frames.backend().submits(), 0);

        let mut backend = MockBackend::new(3);
        backend
            .present_script
            .push_back(Err(vk::Result::ERROR_SURFACE_LOST_KHR));
        let mut frames = frame_loop(backend, 1);
        assert!(matches!(
            frames.draw_frame(SIZE),
            Err(RendererError::PresentFailed(vk::Result::ERROR_SURFACE_LOST_KHR))
        ));
        assert_eq!(frames.backend().rebuilds(), 0);
    }

    #[test]
    fn test_resize_event_triggers_rebuild_before_next_frame() {
        let mut frames = frame_loop(MockBackend::new(3), 2);
        let events = frames.event_sender();

        events.send(SurfaceEvent::Resized).unwrap();
        events.send(SurfaceEvent::Resized).unwrap();
        assert!(frames.pump_events());

        let resized = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert_eq!(frames.draw_frame(resized).unwrap(), FrameOutcome::Rebuilt);

        // Coalesced into one rebuild, using the size passed in by the caller
        assert_eq!(frames.backend().calls, vec![Call::Rebuild(1024, 768)]);
        assert_eq!(frames.backend().extent, resized);

        assert_eq!(frames.draw_frame(resized).unwrap(), FrameOutcome::Presented);
        assert_eq!(frames.backend().rebuilds(), 1);
    }

    #[test]
    fn test_queued_resize_and_stale_acquire_rebuild_once_per_call() {
        let mut backend = MockBackend::new(3);
        backend
            .acquire_script
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        let mut frames = frame_loop(backend, 2);
        frames.event_sender().send(SurfaceEvent::Resized).unwrap();
        frames.pump_events();

        // The queued resize is handled without touching acquire
        assert_eq!(frames.draw_frame(SIZE).unwrap(), FrameOutcome::Rebuilt);
        assert_eq!(frames.backend().rebuilds(), 1);
        assert_eq!(frames.backend().count(|c| matches!(c, Call::Acquire(_))), 0);

        // The chain is still stale: the acquire path rebuilds exactly once more
        assert_eq!(frames.draw_frame(SIZE).unwrap(), FrameOutcome::Rebuilt);
        assert_eq!(frames.backend().rebuilds(), 2);
        assert_eq!(frames.backend().submits(), 0);

        assert_eq!(frames.draw_frame(SIZE).unwrap(), FrameOutcome::Presented);
        assert_eq!(frames.backend().rebuilds(), 2);
        assert_eq!(frames.backend().submits(), 1);
    }

    #[test]
    fn test_slot_depth_comes_from_backend() {
        let mut backend = MockBackend::new(3);
        backend.frames_in_flight = 3;
        let mut frames = FrameLoop::new(backend);
        assert_eq!(frames.frames_in_flight(), 3);

        for _ in 0..4 {
            frames.draw_frame(SIZE).unwrap();
        }
        let slots: Vec<_> = frames
            .backend()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Acquire(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0]);

        // A backend reporting no slots still gets one
        let mut backend = MockBackend::new(3);
        backend.frames_in_flight = 0;
        assert_eq!(FrameLoop::new(backend).frames_in_flight(), 1);
    }

    #[test]
    fn test_minimized_window_skips_and_keeps_pending_rebuild() {
        let mut frames = frame_loop(MockBackend::new(3), 2);
        frames.event_sender().send(SurfaceEvent::Resized).unwrap();
        frames.pump_events();

        let minimized = vk::Extent2D {
            width: 0,
            height: 0,
        };
        assert_eq!(frames.draw_frame(minimized).unwrap(), FrameOutcome::Skipped);
        assert!(frames.backend().calls.is_empty());

        frames.draw_frame(SIZE).unwrap();
        assert_eq!(frames.backend().rebuilds(), 1);
    }

    #[test]
    fn test_close_requested_stops_the_loop() {
        let mut frames = frame_loop(MockBackend::new(3), 2);
        assert!(frames.pump_events());

        frames
            .event_sender()
            .send(SurfaceEvent::CloseRequested)
            .unwrap();
        assert!(!frames.pump_events());

        frames.finish().unwrap();
        assert_eq!(frames.backend().calls, vec![Call::DeviceIdle]);
    }

    #[test]
    fn test_slots_rotate_with_multiple_frames_in_flight() {
        let mut frames = frame_loop(MockBackend::new(3), 2);

        for _ in 0..4 {
            frames.draw_frame(SIZE).unwrap();
        }

        let submits: Vec<_> = frames
            .backend()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit(slot, image) => Some((*slot, *image)),
                _ => None,
            })
            .collect();
        assert_eq!(submits, vec![(0, 0), (1, 1), (0, 2), (1, 0)]);
        assert_eq!(frames.backend().count(|c| *c == Call::PresentIdle), 0);
    }

    #[test]
    fn test_image_reused_by_other_slot_waits_on_owner() {
        let mut backend = MockBackend::new(2);
        backend.acquire_script.push_back(Ok((0, false)));
        backend.acquire_script.push_back(Ok((0, false)));
        let mut frames = frame_loop(backend, 2);

        frames.draw_frame(SIZE).unwrap();
        frames.draw_frame(SIZE).unwrap();

        let calls = &frames.backend().calls;
        let second_acquire = calls
            .iter()
            .rposition(|c| *c == Call::Acquire(1))
            .unwrap();
        assert_eq!(calls[second_acquire + 1], Call::Wait(0));
        assert_eq!(calls[second_acquire + 2], Call::Reset(1));
    }

    #[test]
    fn test_rebuild_tracks_new_image_count() {
        let mut backend = MockBackend::new(2);
        backend.image_count_after_rebuild = 4;
        backend
            .acquire_script
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        let mut frames = frame_loop(backend, 2);

        frames.draw_frame(SIZE).unwrap();
        assert_eq!(frames.image_owner.len(), frames.backend().image_count());
        assert_eq!(frames.image_owner.len(), 4);

        // Rebuilding again without a frame in between changes nothing structural
        frames.rebuild(SIZE).unwrap();
        assert_eq!(frames.image_owner.len(), 4);
        assert_eq!(frames.backend().extent, SIZE);
        assert_eq!(frames.rebuild_count(), 2);
    }
}
