use std::collections::VecDeque;

/// Holds released resources until the GPU can no longer be reading them. Anything retired
/// survives `max_in_flight_frames + 1` calls to `on_frame_complete` and drops on the next one.
///
/// Resources are grouped by the frame they were retired in, the front group drops first.
pub struct ResourceDropSink<T> {
    // Retired while the current frame is recorded
    current_frame: Vec<T>,
    in_flight_frames: VecDeque<Vec<T>>,
    max_in_flight_frames: usize,
    number_of_retired_resources: usize,
}

impl<T> ResourceDropSink<T> {
    pub fn new(max_in_flight_frames: u32) -> Self {
        let max_in_flight_frames = max_in_flight_frames as usize;
        ResourceDropSink {
            current_frame: Vec::new(),
            in_flight_frames: VecDeque::with_capacity(max_in_flight_frames + 2),
            max_in_flight_frames,
            number_of_retired_resources: 0,
        }
    }

    pub fn retire(
        &mut self,
        resource: T,
    ) {
        self.current_frame.push(resource);
        self.number_of_retired_resources += 1;
    }

    pub fn number_of_retired_resources(&self) -> usize {
        self.number_of_retired_resources
    }

    /// Call once per presented frame
    pub fn on_frame_complete(&mut self) {
        let completed_frame = std::mem::take(&mut self.current_frame);
        self.in_flight_frames.push_back(completed_frame);
        while self.in_flight_frames.len() > self.max_in_flight_frames + 1 {
            if let Some(expired) = self.in_flight_frames.pop_front() {
                self.number_of_retired_resources -= expired.len();
            }
        }
    }

    /// Immediately drop everything. Only valid once the device is idle.
    pub fn destroy(&mut self) {
        self.current_frame.clear();
        self.in_flight_frames.clear();
        self.number_of_retired_resources = 0;
    }
}

// Owners call destroy() before dropping the sink
impl<T> Drop for ResourceDropSink<T> {
    fn drop(&mut self) {
        if self.number_of_retired_resources > 0 && !std::thread::panicking() {
            log::warn!(
                "ResourceDropSink dropped with {} resources still in flight",
                self.number_of_retired_resources
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_resources_live_for_in_flight_frames() {
        let resource = Arc::new(());
        let mut sink = ResourceDropSink::new(2);
        sink.retire(resource.clone());
        assert_eq!(Arc::strong_count(&resource), 2);

        for _ in 0..3 {
            sink.on_frame_complete();
        }
        assert_eq!(Arc::strong_count(&resource), 2);

        sink.on_frame_complete();
        assert_eq!(Arc::strong_count(&resource), 1);
        assert_eq!(sink.number_of_retired_resources(), 0);
    }

    #[test]
    fn test_each_frame_drops_its_own_resources() {
        let first = Arc::new(());
        let second = Arc::new(());
        let mut sink = ResourceDropSink::new(0);
        sink.retire(first.clone());
        sink.retire(first.clone());
        sink.on_frame_complete();
        sink.retire(second.clone());
        assert_eq!(sink.number_of_retired_resources(), 3);

        sink.on_frame_complete();
        assert_eq!(Arc::strong_count(&first), 1);
        assert_eq!(Arc::strong_count(&second), 2);
        assert_eq!(sink.number_of_retired_resources(), 1);

        sink.on_frame_complete();
        assert_eq!(Arc::strong_count(&second), 1);
        assert_eq!(sink.number_of_retired_resources(), 0);
    }

    #[test]
    fn test_destroy() {
        let resource = Arc::new(());
        let mut sink = ResourceDropSink::new(3);
        sink.retire(resource.clone());
        sink.destroy();
        assert_eq!(Arc::strong_count(&resource), 1);

        // Still usable afterwards
        sink.retire(resource.clone());
        assert_eq!(sink.number_of_retired_resources(), 1);
        sink.destroy();
    }
}
