// Latest decoded picture, shared between the acquisition loop and readers
//
// The loop replaces the picture after every decode; readers convert it in
// place under the lock. A reader arriving before the first publish waits on
// the condvar instead of polling.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::video::DecodedPicture;

#[derive(Default)]
struct SlotState {
    picture: Option<DecodedPicture>,
    /// An acquisition loop is running and will publish
    active: bool,
    published: u64,
}

#[derive(Default)]
pub struct SharedFrameSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl SharedFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a loop as starting; the previous picture is dropped
    pub fn activate(&self) {
        let mut state = self.state.lock();
        state.picture = None;
        state.active = true;
    }

    /// Mark the loop as gone and release any waiting readers
    pub fn deactivate(&self) {
        self.state.lock().active = false;
        self.changed.notify_all();
    }

    pub fn clear(&self) {
        self.state.lock().picture = None;
    }

    /// Replace the current picture, returning the old one
    pub fn publish(&self, picture: DecodedPicture) -> Option<DecodedPicture> {
        let previous = {
            let mut state = self.state.lock();
            state.published += 1;
            state.picture.replace(picture)
        };
        self.changed.notify_all();
        previous
    }

    pub fn has_picture(&self) -> bool {
        self.state.lock().picture.is_some()
    }

    pub fn frames_published(&self) -> u64 {
        self.state.lock().published
    }

    /// Run `f` on the latest picture while holding the lock.
    ///
    /// If nothing has been published yet and a loop is active, waits up to
    /// `timeout` for the first publish. Returns `None` when no picture is
    /// available.
    pub fn read_latest<R>(&self, timeout: Duration, f: impl FnOnce(&DecodedPicture) -> R) -> Option<R> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.picture.is_none() && state.active {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.picture.as_ref().map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::PixelLayout;
    use std::sync::Arc;

    fn picture(luma: u8) -> DecodedPicture {
        DecodedPicture::solid(2, 2, PixelLayout::Yuv420p, luma, 128, 128)
    }

    #[test]
    fn inactive_slot_is_not_ready_without_waiting() {
        let slot = SharedFrameSlot::new();
        let started = Instant::now();
        assert!(slot.read_latest(Duration::from_secs(5), |_| ()).is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn first_reader_waits_for_publish() {
        let slot = Arc::new(SharedFrameSlot::new());
        slot.activate();

        let publisher = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                slot.publish(picture(77));
            })
        };
        let luma = slot.read_latest(Duration::from_secs(5), |p| p.planes[0].data[0]);
        publisher.join().unwrap();
        assert_eq!(luma, Some(77));
    }

    #[test]
    fn deactivate_releases_waiting_readers() {
        let slot = Arc::new(SharedFrameSlot::new());
        slot.activate();
        let stopper = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                slot.deactivate();
            })
        };
        let started = Instant::now();
        assert!(slot.read_latest(Duration::from_secs(10), |_| ()).is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    #[test]
    fn wait_gives_up_after_timeout() {
        let slot = SharedFrameSlot::new();
        slot.activate();
        assert!(slot.read_latest(Duration::from_millis(30), |_| ()).is_none());
    }

    #[test]
    fn readers_see_latest_picture() {
        let slot = SharedFrameSlot::new();
        slot.activate();
        assert!(slot.publish(picture(1)).is_none());
        let old = slot.publish(picture(2)).unwrap();
        assert_eq!(old.planes[0].data[0], 1);
        assert_eq!(slot.read_latest(Duration::ZERO, |p| p.planes[0].data[0]), Some(2));
        assert_eq!(slot.frames_published(), 2);

        // activating for a new loop drops the stale picture
        slot.activate();
        assert!(!slot.has_picture());
    }
}
