use rand::Rng;
use std::time::Duration;

/// Upper bound of the random wait before a peer answers a multicast request.
pub const RESPONSE_WINDOW: Duration = Duration::from_millis(400);

/// How long a peer waits before answering, so that concurrent responders
/// spread out and can overhear each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Uniformly random in `[0, window]`.
    Uniform(Duration),
    /// Always the same delay.
    Fixed(Duration),
}

impl Backoff {
    pub fn delay(&self) -> Duration {
        match *self {
            Backoff::Uniform(window) => {
                let window_ms = window.as_millis() as u64;
                Duration::from_millis(rand::thread_rng().gen_range(0..=window_ms))
            }
            Backoff::Fixed(delay) => delay,
        }
    }

    /// Longest delay this backoff can produce.
    pub fn max(&self) -> Duration {
        match *self {
            Backoff::Uniform(window) => window,
            Backoff::Fixed(delay) => delay,
        }
    }

    pub async fn wait(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Uniform(RESPONSE_WINDOW)
    }
}
