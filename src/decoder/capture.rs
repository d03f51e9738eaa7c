use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::core::channel::FrameSender;
use crate::core::frame::{Frame, Geometry};
use crate::core::pipeline::FrameLimit;
use crate::error::{PipelineError, Result};

/// Open the capture device read-only.
pub fn open_capture(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| PipelineError::Open {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Full,
    /// Fewer bytes than a frame arrived. The rest of the buffer still holds
    /// the previous frame's bytes.
    Short { got: usize },
}

/// What the capture unit hands back after a bounded run.
#[derive(Debug)]
pub struct Captured<R> {
    pub device: R,
    pub frames: u64,
    pub short_reads: u64,
}

/// Source unit: one read per frame from the capture device, then a send.
pub struct CaptureUnit<R> {
    device: R,
    frame: Frame,
    output: FrameSender,
    short_reads: u64,
}

impl<R: Read> CaptureUnit<R> {
    pub fn new(device: R, geometry: Geometry, output: FrameSender) -> Result<Self> {
        Ok(Self {
            device,
            frame: Frame::raw(geometry)?,
            output,
            short_reads: 0,
        })
    }

    /// Issue a single read for one frame's worth of bytes. An I/O error is
    /// fatal; a short read is not.
    pub fn read_frame(&mut self) -> Result<ReadOutcome> {
        let expected = self.frame.len();
        let got = loop {
            match self.device.read(self.frame.as_mut_slice()) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PipelineError::Read(e)),
            }
        };

        if got < expected {
            return Ok(ReadOutcome::Short { got });
        }
        Ok(ReadOutcome::Full)
    }

    pub fn step(&mut self) -> Result<ReadOutcome> {
        let outcome = self.read_frame()?;
        if let ReadOutcome::Short { got } = outcome {
            self.short_reads += 1;
            warn!(got, expected = self.frame.len(), "short read from capture device");
        }
        self.output.send(&self.frame);
        Ok(outcome)
    }

    pub fn run(mut self, limit: FrameLimit) -> Result<Captured<R>> {
        info!(frame_bytes = self.frame.len(), "capture started");
        let mut frames = 0;
        while limit.allows(frames) {
            self.step()?;
            frames += 1;
            debug!(frame = frames, "captured");
        }
        Ok(Captured {
            device: self.device,
            frames,
            short_reads: self.short_reads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::channel;
    use std::io::{self, Cursor};

    /// Delivers `len - shortfall` bytes per read, counting up from `fill`.
    struct ShortReader {
        shortfall: usize,
        fill: u8,
    }

    impl Read for ShortReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().saturating_sub(self.shortfall);
            buf[..n].fill(self.fill);
            self.fill = self.fill.wrapping_add(1);
            Ok(n)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "device gone"))
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
    }

    impl Read for InterruptedOnce {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(ErrorKind::Interrupted.into());
            }
            buf.fill(9);
            Ok(buf.len())
        }
    }

    fn geometry() -> Geometry {
        Geometry::new(4, 2)
    }

    #[test]
    fn full_frames_are_sent_in_order() {
        let g = geometry();
        let mut bytes = vec![1u8; g.raw_len()];
        bytes.extend(vec![2u8; g.raw_len()]);
        let (tx, rx) = channel("raw", g.raw_len()).unwrap();
        let unit = CaptureUnit::new(Cursor::new(bytes), g, tx).unwrap();

        let worker = std::thread::spawn(move || unit.run(FrameLimit::Frames(2)));
        let mut frame = Frame::raw(g).unwrap();
        rx.receive(&mut frame);
        assert_eq!(frame.as_slice(), &vec![1u8; g.raw_len()][..]);
        rx.receive(&mut frame);
        assert_eq!(frame.as_slice(), &vec![2u8; g.raw_len()][..]);

        let captured = worker.join().unwrap().unwrap();
        assert_eq!(captured.frames, 2);
        assert_eq!(captured.short_reads, 0);
    }

    #[test]
    fn short_read_warns_and_keeps_going() {
        let g = Geometry::capture();
        let (tx, rx) = channel("raw", g.raw_len()).unwrap();
        let reader = ShortReader { shortfall: 10, fill: 1 };
        let unit = CaptureUnit::new(reader, g, tx).unwrap();

        let worker = std::thread::spawn(move || unit.run(FrameLimit::Frames(3)));
        let mut frame = Frame::raw(g).unwrap();
        for fill in 1..=3u8 {
            rx.receive(&mut frame);
            let (head, tail) = frame.as_slice().split_at(g.raw_len() - 10);
            assert!(head.iter().all(|&b| b == fill));
            // Tail bytes were never written by any read.
            assert!(tail.iter().all(|&b| b == 0));
        }

        let captured = worker.join().unwrap().unwrap();
        assert_eq!(captured.frames, 3);
        assert_eq!(captured.short_reads, 3);
    }

    #[test]
    fn short_read_reports_byte_count() {
        let g = geometry();
        let (tx, _rx) = channel("raw", g.raw_len()).unwrap();
        let mut unit = CaptureUnit::new(ShortReader { shortfall: 5, fill: 0 }, g, tx).unwrap();
        assert_eq!(
            unit.read_frame().unwrap(),
            ReadOutcome::Short { got: g.raw_len() - 5 }
        );
    }

    #[test]
    fn read_error_is_fatal() {
        let g = geometry();
        let (tx, _rx) = channel("raw", g.raw_len()).unwrap();
        let unit = CaptureUnit::new(FailingReader, g, tx).unwrap();
        let err = unit.run(FrameLimit::Unbounded).err().unwrap();
        assert!(matches!(err, PipelineError::Read(_)));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn interrupted_read_is_retried() {
        let g = geometry();
        let (tx, _rx) = channel("raw", g.raw_len()).unwrap();
        let mut unit = CaptureUnit::new(InterruptedOnce { interrupted: false }, g, tx).unwrap();
        assert_eq!(unit.read_frame().unwrap(), ReadOutcome::Full);
    }

    #[test]
    fn missing_device_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_capture(&dir.path().join("video0")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
