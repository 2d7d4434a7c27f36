use std::{fmt, time::Duration};

pub trait Delay {
    fn delay(&mut self, duration: Duration);
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Delay for ThreadSleep {
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry an operation at a fixed poll interval with no attempt cap and no
/// backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRetry {
    poll: Duration,
    target: &'static str,
}

impl PollRetry {
    pub const fn forever(poll: Duration) -> Self {
        Self {
            poll,
            target: "retry",
        }
    }

    pub const fn with_target(self, target: &'static str) -> Self {
        Self { target, ..self }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// Returns the successful value and the number of attempts it took.
    pub fn run<T, E, D>(&self, delay: &mut D, mut op: impl FnMut() -> Result<T, E>) -> (T, u32)
    where
        E: fmt::Display,
        D: Delay + ?Sized,
    {
        let mut attempt: u32 = 1;
        loop {
            match op() {
                Ok(value) => return (value, attempt),
                Err(error) => {
                    log::debug!(
                        target: self.target,
                        "attempt {attempt} failed: {error}; retrying in {:?}",
                        self.poll
                    );
                }
            }
            delay.delay(self.poll);
            attempt = attempt.saturating_add(1);
        }
    }
}
