/// Used/maximum byte counters for the local chunk store.
///
/// The storage manager keeps exactly one of these behind its storage lock,
/// so every reservation and release is ordered with the map mutation it
/// belongs to.
#[derive(Debug)]
pub struct CapacityAccount {
    used: u64,
    max: u64,
}

impl CapacityAccount {
    pub fn new(max: u64) -> Self {
        Self { used: 0, max }
    }

    /// Reserves `bytes` if they fit under the current maximum.
    pub fn try_reserve(&mut self, bytes: u64) -> bool {
        match self.used.checked_add(bytes) {
            Some(total) if total <= self.max => {
                self.used = total;
                true
            }
            _ => false,
        }
    }

    pub fn release(&mut self, bytes: u64) {
        self.used = self.used.saturating_sub(bytes);
    }

    pub fn set_max(&mut self, max: u64) {
        self.max = max;
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn is_over_budget(&self) -> bool {
        self.used > self.max
    }
}
