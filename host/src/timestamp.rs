//! Shared timestamp subsystem (§4.7, §9): the firmware's 32-bit wrapping
//! microsecond tick reconstructed into a monotonic host-side value, plus a
//! host-side wall clock for display, in `win_can_utils`'s style of deriving
//! timestamps from `Instant`/`SystemTime` rather than an OS-specific API.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Reconstructs the device's 32-bit wrapping microsecond tick into a
/// monotonically increasing `u64`, given the session's starting tick.
pub struct DeviceClock {
    origin: u32,
    wraps: u64,
    last_raw: u32,
}

impl DeviceClock {
    /// `origin` is the first device tick observed after `open()`.
    pub fn new(origin: u32) -> Self {
        Self { origin, wraps: 0, last_raw: origin }
    }

    /// Feeds the next raw 32-bit device tick, returning microseconds since
    /// the session origin. Detects exactly one wraparound per call: ticks
    /// only arrive a few times a second, far below the ~71 minutes a 32-bit
    /// microsecond counter takes to wrap.
    pub fn normalize(&mut self, raw: u32) -> u64 {
        if raw < self.last_raw {
            self.wraps += 1;
        }
        self.last_raw = raw;
        let since_origin = raw.wrapping_sub(self.origin) as u64;
        since_origin + self.wraps * (u32::MAX as u64 + 1)
    }
}

/// Host-side elapsed time plus a wall-clock offset captured once at
/// `open()`, for `HH:MM:SS.mmm.µµµ`-style formatting of received frames.
pub struct HostClock {
    start_instant: Instant,
    start_wall_us: u64,
}

impl HostClock {
    pub fn new() -> Self {
        let start_wall_us = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0);
        Self { start_instant: Instant::now(), start_wall_us }
    }

    /// Microseconds elapsed since this clock was created.
    pub fn elapsed_us(&self) -> u64 {
        self.start_instant.elapsed().as_micros() as u64
    }

    /// Wall-clock microseconds since the Unix epoch, for the current instant.
    pub fn wall_us_now(&self) -> u64 {
        self.start_wall_us + self.elapsed_us()
    }

    /// Wall-clock microseconds since the Unix epoch, for a past `Instant`
    /// captured against this same clock (e.g. a FIFO slot's receive time).
    pub fn wall_us_for_instant(&self, instant: Instant) -> u64 {
        self.start_wall_us + instant.saturating_duration_since(self.start_instant).as_micros() as u64
    }

    /// Formats a wall-clock microsecond timestamp as `HH:MM:SS.mmm.µµµ`.
    pub fn format(wall_us: u64) -> TimeString {
        TimeString::from_wall_us(wall_us)
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

/// The `HH:MM:SS.mmm.µµµ` timestamp string `decode`'s formatters print.
pub struct TimeString {
    hours: u64,
    minutes: u64,
    seconds: u64,
    millis: u64,
    micros: u64,
}

impl TimeString {
    pub fn from_wall_us(wall_us: u64) -> Self {
        let total_secs = wall_us / 1_000_000;
        let micros = wall_us % 1_000_000;
        Self {
            hours: (total_secs / 3600) % 24,
            minutes: (total_secs / 60) % 60,
            seconds: total_secs % 60,
            millis: micros / 1000,
            micros: micros % 1000,
        }
    }
}

impl std::fmt::Display for TimeString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}.{:03}.{:03}", self.hours, self.minutes, self.seconds, self.millis, self.micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_clock_counts_up_without_wrap() {
        let mut clock = DeviceClock::new(1000);
        assert_eq!(clock.normalize(1000), 0);
        assert_eq!(clock.normalize(2000), 1000);
    }

    #[test]
    fn device_clock_detects_one_wraparound() {
        let mut clock = DeviceClock::new(u32::MAX - 100);
        let before = clock.normalize(u32::MAX - 50);
        assert_eq!(before, 50);
        let after_wrap = clock.normalize(10);
        assert!(after_wrap > before);
    }

    #[test]
    fn time_string_formats_hh_mm_ss_mmm_uuu() {
        let wall_us = (3 * 3600 + 2 * 60 + 1) * 1_000_000 + 123_456;
        let s = HostClock::format(wall_us).to_string();
        assert_eq!(s, "03:02:01.123.456");
    }
}
