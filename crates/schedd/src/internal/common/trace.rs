pub struct ScopedTimer<'a> {
    process: &'a str,
    method: &'static str,
    start: std::time::Instant,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(process: &'a str, method: &'static str) -> Self {
        tracing::debug!(
            action = "measure",
            process = process,
            method = method,
            event = "start"
        );
        Self {
            process,
            method,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        tracing::debug!(
            action = "measure",
            method = self.method,
            process = self.process,
            event = "end",
            elapsed_us = self.start.elapsed().as_micros() as u64
        );
    }
}

/// Runs `$block` while emitting start/end tracing events for the given phase.
macro_rules! trace_time {
    ($process:tt, $method:tt, $block:expr) => {{
        let _timer = $crate::internal::common::trace::ScopedTimer::new($process, $method);
        $block
    }};
}
