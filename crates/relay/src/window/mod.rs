//! Scheduling windows: fixed-size level spans used to batch rights prefetch.

use flashbake_config::Breakpoint;
use flashbake_primitives::prelude::*;
use thiserror::Error;
use tracing::*;

use crate::observer::{Publisher, Subscription};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("window size must be positive")]
    ZeroSize,

    #[error("breakpoints out of order at level {0}")]
    Unordered(u64),

    #[error("breakpoint at level {level} expects size {expected} before it, previous segment has {actual}")]
    Mismatch {
        level: u64,
        expected: u64,
        actual: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Segment {
    start_level: u64,
    size: u64,
    first_window: u64,
}

/// Maps levels to window indices, allowing the window size to change at
/// configured levels. Indices stay contiguous across changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSchedule {
    segments: Vec<Segment>,
}

impl WindowSchedule {
    /// Windows of `size` levels from genesis.
    pub fn uniform(size: u64) -> Result<Self, ScheduleError> {
        Self::with_breakpoints(size, &[])
    }

    /// Builds a schedule from the historical `breakpoints` and the size the
    /// chain reports now, which applies after the last breakpoint.
    pub fn with_breakpoints(
        current_size: u64,
        breakpoints: &[Breakpoint],
    ) -> Result<Self, ScheduleError> {
        if current_size == 0 {
            return Err(ScheduleError::ZeroSize);
        }

        let first_size = breakpoints.first().map_or(current_size, |bp| bp.size_before);
        if first_size == 0 {
            return Err(ScheduleError::ZeroSize);
        }

        let mut segments = vec![Segment {
            start_level: 0,
            size: first_size,
            first_window: 0,
        }];

        for (i, bp) in breakpoints.iter().enumerate() {
            let prev = segments[segments.len() - 1];
            if bp.level <= prev.start_level {
                return Err(ScheduleError::Unordered(bp.level));
            }
            if bp.size_before != prev.size {
                return Err(ScheduleError::Mismatch {
                    level: bp.level,
                    expected: bp.size_before,
                    actual: prev.size,
                });
            }

            let is_last = i + 1 == breakpoints.len();
            let size = if is_last && bp.size_after != current_size {
                warn!(
                    level = bp.level,
                    configured = bp.size_after,
                    chain = current_size,
                    "last breakpoint disagrees with chain, using chain value"
                );
                current_size
            } else {
                bp.size_after
            };
            if size == 0 {
                return Err(ScheduleError::ZeroSize);
            }

            let span = bp.level - prev.start_level;
            segments.push(Segment {
                start_level: bp.level,
                size,
                first_window: prev.first_window + span.div_ceil(prev.size),
            });
        }

        Ok(Self { segments })
    }

    fn segment_for_level(&self, level: u64) -> &Segment {
        let idx = self
            .segments
            .partition_point(|s| s.start_level <= level)
            .saturating_sub(1);
        &self.segments[idx]
    }

    fn segment_for_window(&self, window: u64) -> (usize, &Segment) {
        let idx = self
            .segments
            .partition_point(|s| s.first_window <= window)
            .saturating_sub(1);
        (idx, &self.segments[idx])
    }

    /// Window containing `level`.
    pub fn window_of(&self, level: u64) -> u64 {
        let seg = self.segment_for_level(level);
        seg.first_window + (level - seg.start_level) / seg.size
    }

    /// Window size in effect at `level`.
    pub fn size_at(&self, level: u64) -> u64 {
        self.segment_for_level(level).size
    }

    /// First and last level of `window`, inclusive.
    pub fn span(&self, window: u64) -> (u64, u64) {
        let (idx, seg) = self.segment_for_window(window);
        let start = seg.start_level + (window - seg.first_window) * seg.size;
        let mut end = start + seg.size - 1;
        if let Some(next) = self.segments.get(idx + 1) {
            end = end.min(next.start_level - 1);
        }
        (start, end)
    }
}

/// Raised when a head enters a window later than any seen before.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowEvent {
    pub window: u64,
    pub block: BlockRef,
}

/// Turns the head stream into window transitions.
///
/// The first head only sets the baseline. After that an event fires once
/// per window, when a head first lands in a window higher than the last.
#[derive(Debug)]
pub struct WindowMonitor {
    schedule: Option<WindowSchedule>,
    last_window: Option<u64>,
    publisher: Publisher<WindowEvent>,
}

impl WindowMonitor {
    /// Monitor whose window size is not known yet.
    pub fn unresolved() -> Self {
        Self {
            schedule: None,
            last_window: None,
            publisher: Publisher::new(),
        }
    }

    pub fn new(schedule: WindowSchedule) -> Self {
        let mut monitor = Self::unresolved();
        monitor.resolve(schedule);
        monitor
    }

    pub fn resolve(&mut self, schedule: WindowSchedule) {
        self.schedule = Some(schedule);
    }

    pub fn subscribe(&self) -> Subscription<WindowEvent> {
        self.publisher.subscribe()
    }

    /// Window of `level`, or `None` while the window size is unknown.
    pub fn calculate_window(&self, level: u64) -> Option<u64> {
        self.schedule.as_ref().map(|s| s.window_of(level))
    }

    pub fn last_window(&self) -> Option<u64> {
        self.last_window
    }

    /// Feeds a head, publishing and returning a transition if it makes one.
    pub fn on_block(&mut self, block: &BlockRef) -> Option<WindowEvent> {
        let window = self.calculate_window(block.level)?;

        match self.last_window {
            None => {
                debug!(%window, level = block.level, "first window observed");
                self.last_window = Some(window);
                None
            }
            Some(last) if window > last => {
                self.last_window = Some(window);
                info!(%window, level = block.level, "window advanced");
                let ev = WindowEvent {
                    window,
                    block: block.clone(),
                };
                self.publisher.publish(ev.clone());
                Some(ev)
            }
            Some(_) => None,
        }
    }
}

/// Feeds heads from `blocks` into `monitor` until the head stream closes.
pub async fn window_monitor_task(mut monitor: WindowMonitor, mut blocks: Subscription<BlockRef>) {
    while let Some(block) = blocks.recv().await {
        monitor.on_block(&block);
    }
    debug!("head subscription closed, window monitor exiting");
}
