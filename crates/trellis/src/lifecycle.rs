//! Request accounting shared by entities and collections.

/// In-flight request counter. An entity or collection is "loading" while
/// at least one network operation has started and not yet settled. The
/// counter is decremented on both success and failure paths.
#[derive(Debug, Default, Clone)]
pub struct RequestState {
    pending: u32,
}

impl RequestState {
    pub(crate) fn begin(&mut self) {
        self.pending += 1;
    }

    pub(crate) fn finish(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn is_loading(&self) -> bool {
        self.pending > 0
    }
}
