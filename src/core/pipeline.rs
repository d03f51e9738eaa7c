use std::io::{Read, Seek, Write};
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::Sender;
use thread_priority::ThreadPriority;
use tracing::{error, info, warn};

use super::channel::channel;
use super::frame::Geometry;
use crate::decoder::capture::{CaptureUnit, Captured};
use crate::error::{PipelineError, Result};
use crate::renderer::converter::{ConvertUnit, Converter};
use crate::renderer::framebuffer::{DisplayUnit, Displayed};

/// How many frames each unit handles before returning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameLimit {
    #[default]
    Unbounded,
    Frames(u64),
}

impl FrameLimit {
    pub fn allows(&self, done: u64) -> bool {
        match self {
            FrameLimit::Unbounded => true,
            FrameLimit::Frames(n) => done < *n,
        }
    }
}

impl From<Option<u64>> for FrameLimit {
    fn from(frames: Option<u64>) -> Self {
        frames.map_or(FrameLimit::Unbounded, FrameLimit::Frames)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Unit {
    Capture,
    Convert,
    Display,
}

impl Unit {
    fn name(self) -> &'static str {
        match self {
            Unit::Capture => "capture",
            Unit::Convert => "convert",
            Unit::Display => "display",
        }
    }
}

enum Exit<R, W> {
    Captured(Captured<R>),
    Converted(u64),
    Displayed(Displayed<W>),
    Failed(Unit, PipelineError),
    Panicked(Unit),
}

/// Everything the three units hand back once a bounded run completes.
#[derive(Debug)]
pub struct PipelineReport<R, W> {
    pub captured: Captured<R>,
    pub converted: u64,
    pub displayed: Displayed<W>,
}

/// Capture -> convert -> display, one thread per unit, joined by two
/// single-slot channels.
pub struct Pipeline<R, W> {
    capture_device: R,
    display_device: W,
    capture: Geometry,
    display: Geometry,
    limit: FrameLimit,
    realtime: bool,
}

impl<R, W> Pipeline<R, W>
where
    R: Read + Send + 'static,
    W: Write + Seek + Send + 'static,
{
    pub fn new(capture_device: R, capture: Geometry, display_device: W, display: Geometry) -> Self {
        Self {
            capture_device,
            display_device,
            capture,
            display,
            limit: FrameLimit::Unbounded,
            realtime: false,
        }
    }

    pub fn limit(mut self, limit: FrameLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Run every unit thread at maximum scheduling priority.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Start all three units and wait.
    ///
    /// Returns the first fatal error any unit reports. The other units are
    /// left blocked on their channels. With `FrameLimit::Unbounded` this
    /// only ever returns an error.
    pub fn run(self) -> Result<PipelineReport<R, W>> {
        let Self {
            capture_device,
            display_device,
            capture,
            display: display_geometry,
            limit,
            realtime,
        } = self;

        info!(%capture, %display_geometry, ?limit, "starting pipeline");

        let (raw_tx, raw_rx) = channel("capture channel", capture.raw_len())?;
        let (display_tx, display_rx) = channel("display channel", display_geometry.display_len())?;

        let source = CaptureUnit::new(capture_device, capture, raw_tx)?;
        let converter = ConvertUnit::new(Converter::new(capture, display_geometry), raw_rx, display_tx)?;
        let sink = DisplayUnit::new(display_device, display_geometry, display_rx)?;

        let (exit_tx, exit_rx) = crossbeam_channel::unbounded();
        spawn_unit(Unit::Display, realtime, exit_tx.clone(), move || {
            sink.run(limit).map(Exit::Displayed)
        })?;
        spawn_unit(Unit::Convert, realtime, exit_tx.clone(), move || {
            converter.run(limit).map(Exit::Converted)
        })?;
        spawn_unit(Unit::Capture, realtime, exit_tx, move || {
            source.run(limit).map(Exit::Captured)
        })?;

        let mut captured = None;
        let mut converted = None;
        let mut displayed = None;
        while let Ok(exit) = exit_rx.recv() {
            match exit {
                Exit::Captured(c) => captured = Some(c),
                Exit::Converted(n) => converted = Some(n),
                Exit::Displayed(d) => displayed = Some(d),
                Exit::Failed(unit, err) => {
                    error!(unit = unit.name(), error = %err, "unit failed");
                    return Err(err);
                }
                Exit::Panicked(unit) => {
                    error!(unit = unit.name(), "unit panicked");
                    return Err(PipelineError::UnitPanicked { unit: unit.name() });
                }
            }
            if let (Some(_), Some(_), Some(_)) = (&captured, &converted, &displayed) {
                break;
            }
        }

        match (captured, converted, displayed) {
            (Some(captured), Some(converted), Some(displayed)) => {
                info!(
                    frames = displayed.frames,
                    short_reads = captured.short_reads,
                    short_writes = displayed.short_writes,
                    "pipeline finished"
                );
                Ok(PipelineReport {
                    captured,
                    converted,
                    displayed,
                })
            }
            // Every unit sends exactly one exit before dropping its sender.
            _ => unreachable!("unit exited without reporting"),
        }
    }
}

fn spawn_unit<R, W, F>(
    unit: Unit,
    realtime: bool,
    exits: Sender<Exit<R, W>>,
    work: F,
) -> Result<()>
where
    R: Send + 'static,
    W: Send + 'static,
    F: FnOnce() -> Result<Exit<R, W>> + Send + 'static,
{
    thread::Builder::new()
        .name(unit.name().to_string())
        .spawn(move || {
            if realtime {
                raise_priority(unit);
            }
            let exit = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(Ok(exit)) => exit,
                Ok(Err(err)) => Exit::Failed(unit, err),
                Err(_) => Exit::Panicked(unit),
            };
            let _ = exits.send(exit);
        })
        .map(drop)
        .map_err(|source| PipelineError::Spawn {
            unit: unit.name(),
            source,
        })
}

fn raise_priority(unit: Unit) {
    match thread_priority::set_current_thread_priority(ThreadPriority::Max) {
        Ok(()) => info!(unit = unit.name(), "running at maximum priority"),
        Err(e) => warn!(unit = unit.name(), error = ?e, "cannot raise thread priority"),
    }
}
