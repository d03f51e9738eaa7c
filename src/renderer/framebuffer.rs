use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::channel::FrameReceiver;
use crate::core::frame::{Frame, Geometry, DISPLAY_BYTES_PER_PIXEL};
use crate::core::pipeline::FrameLimit;
use crate::error::{PipelineError, Result};

/// Log throughput every this many displayed frames.
const REPORT_EVERY: u64 = 300;

/// Open the framebuffer device for reading and writing.
pub fn open_framebuffer(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| PipelineError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Variable screen information reported by the display device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ScreenInfo {
    pub xres: u32,
    pub yres: u32,
    pub bits_per_pixel: u32,
    /// Bytes in one RGB565 frame at this resolution.
    pub frame_bytes: usize,
}

impl ScreenInfo {
    pub fn new(xres: u32, yres: u32, bits_per_pixel: u32) -> Result<Self> {
        if xres == 0 || yres == 0 {
            return Err(PipelineError::Geometry(format!(
                "device reports empty resolution {xres}x{yres}"
            )));
        }
        if bits_per_pixel != (DISPLAY_BYTES_PER_PIXEL * 8) as u32 {
            warn!(
                bits_per_pixel,
                "display is not 16 bpp, output is still RGB565"
            );
        }
        Ok(Self {
            xres,
            yres,
            bits_per_pixel,
            frame_bytes: xres as usize * yres as usize * DISPLAY_BYTES_PER_PIXEL,
        })
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.xres as usize, self.yres as usize)
    }
}

/// Query the display resolution once via `FBIOGET_VSCREENINFO`.
#[cfg(target_os = "linux")]
pub fn query_screen(device: &File) -> Result<ScreenInfo> {
    use std::os::unix::io::AsRawFd;

    let mut var = fb::VarScreenInfo::default();
    // SAFETY: `var` is a #[repr(C)] mirror of `struct fb_var_screeninfo`,
    // which is exactly what FBIOGET_VSCREENINFO fills in.
    let rc = unsafe {
        libc::ioctl(
            device.as_raw_fd(),
            fb::FBIOGET_VSCREENINFO as _,
            &mut var as *mut fb::VarScreenInfo,
        )
    };
    if rc == -1 {
        return Err(PipelineError::Geometry(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    ScreenInfo::new(var.xres, var.yres, var.bits_per_pixel)
}

#[cfg(not(target_os = "linux"))]
pub fn query_screen(_device: &File) -> Result<ScreenInfo> {
    Err(PipelineError::Geometry(
        "framebuffer geometry query is only supported on Linux".into(),
    ))
}

#[cfg(target_os = "linux")]
mod fb {
    pub const FBIOGET_VSCREENINFO: u32 = 0x4600;

    #[repr(C)]
    #[derive(Default)]
    pub struct Bitfield {
        pub offset: u32,
        pub length: u32,
        pub msb_right: u32,
    }

    // <linux/fb.h> struct fb_var_screeninfo
    #[repr(C)]
    #[derive(Default)]
    pub struct VarScreenInfo {
        pub xres: u32,
        pub yres: u32,
        pub xres_virtual: u32,
        pub yres_virtual: u32,
        pub xoffset: u32,
        pub yoffset: u32,
        pub bits_per_pixel: u32,
        pub grayscale: u32,
        pub red: Bitfield,
        pub green: Bitfield,
        pub blue: Bitfield,
        pub transp: Bitfield,
        pub nonstd: u32,
        pub activate: u32,
        pub height: u32,
        pub width: u32,
        pub accel_flags: u32,
        pub pixclock: u32,
        pub left_margin: u32,
        pub right_margin: u32,
        pub upper_margin: u32,
        pub lower_margin: u32,
        pub hsync_len: u32,
        pub vsync_len: u32,
        pub sync: u32,
        pub vmode: u32,
        pub rotate: u32,
        pub colorspace: u32,
        pub reserved: [u32; 4],
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Full,
    Short { written: usize },
}

/// What the display unit hands back after a bounded run.
#[derive(Debug)]
pub struct Displayed<W> {
    pub device: W,
    pub frames: u64,
    pub short_writes: u64,
}

/// Sink unit: receive a DisplayFrame and write it from the device origin.
pub struct DisplayUnit<W> {
    device: W,
    frame: Frame,
    input: FrameReceiver,
    short_writes: u64,
}

impl<W: Write + Seek> DisplayUnit<W> {
    pub fn new(device: W, geometry: Geometry, input: FrameReceiver) -> Result<Self> {
        Ok(Self {
            device,
            frame: Frame::display(geometry)?,
            input,
            short_writes: 0,
        })
    }

    /// Rewind to the start of the device and write the current frame with a
    /// single write call.
    pub fn write_frame(&mut self) -> Result<WriteOutcome> {
        self.device
            .seek(SeekFrom::Start(0))
            .map_err(PipelineError::Write)?;

        let expected = self.frame.len();
        let written = loop {
            match self.device.write(self.frame.as_slice()) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PipelineError::Write(e)),
            }
        };
        self.device.flush().map_err(PipelineError::Write)?;

        if written < expected {
            return Ok(WriteOutcome::Short { written });
        }
        Ok(WriteOutcome::Full)
    }

    pub fn step(&mut self) -> Result<WriteOutcome> {
        self.input.receive(&mut self.frame);
        let outcome = self.write_frame()?;
        if let WriteOutcome::Short { written } = outcome {
            self.short_writes += 1;
            warn!(written, expected = self.frame.len(), "short write to display device");
        }
        Ok(outcome)
    }

    pub fn run(mut self, limit: FrameLimit) -> Result<Displayed<W>> {
        info!(frame_bytes = self.frame.len(), "display started");
        let started = Instant::now();
        let mut frames = 0;
        while limit.allows(frames) {
            self.step()?;
            frames += 1;
            debug!(frame = frames, "displayed");
            if frames % REPORT_EVERY == 0 {
                let fps = frames as f64 / started.elapsed().as_secs_f64();
                info!(frames, fps, "display throughput");
            }
        }
        Ok(Displayed {
            device: self.device,
            frames,
            short_writes: self.short_writes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::{channel, FrameSender};
    use std::io::{self, Cursor};

    /// Accepts at most `limit` bytes per write.
    struct ClippedWriter {
        inner: Cursor<Vec<u8>>,
        limit: usize,
    }

    impl Write for ClippedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.inner.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for ClippedWriter {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    struct BrokenDevice;

    impl Write for BrokenDevice {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::Other, "no space"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for BrokenDevice {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    fn geometry() -> Geometry {
        Geometry::new(3, 2)
    }

    fn send_filled(tx: &FrameSender, value: u8) {
        let mut frame = Frame::display(geometry()).unwrap();
        frame.as_mut_slice().fill(value);
        tx.send(&frame);
    }

    #[test]
    fn every_frame_is_written_from_the_origin() {
        let g = geometry();
        let (tx, rx) = channel("display", g.display_len()).unwrap();
        let unit = DisplayUnit::new(Cursor::new(Vec::new()), g, rx).unwrap();

        let worker = std::thread::spawn(move || unit.run(FrameLimit::Frames(3)));
        for value in [1, 2, 3] {
            send_filled(&tx, value);
        }

        let displayed = worker.join().unwrap().unwrap();
        assert_eq!(displayed.frames, 3);
        assert_eq!(displayed.short_writes, 0);
        assert_eq!(displayed.device.into_inner(), vec![3u8; g.display_len()]);
    }

    #[test]
    fn short_write_is_a_warning() {
        let g = geometry();
        let (tx, rx) = channel("display", g.display_len()).unwrap();
        let device = ClippedWriter {
            inner: Cursor::new(Vec::new()),
            limit: g.display_len() - 4,
        };
        let mut unit = DisplayUnit::new(device, g, rx).unwrap();

        send_filled(&tx, 5);
        assert_eq!(
            unit.step().unwrap(),
            WriteOutcome::Short { written: g.display_len() - 4 }
        );
        send_filled(&tx, 6);
        unit.step().unwrap();
        assert_eq!(unit.short_writes, 2);
    }

    #[test]
    fn write_error_is_fatal() {
        let g = geometry();
        let (tx, rx) = channel("display", g.display_len()).unwrap();
        let unit = DisplayUnit::new(BrokenDevice, g, rx).unwrap();
        send_filled(&tx, 1);
        let err = unit.run(FrameLimit::Unbounded).err().unwrap();
        assert!(matches!(err, PipelineError::Write(_)));
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn file_backed_display_holds_latest_frame() {
        let g = geometry();
        let file = tempfile::tempfile().unwrap();
        let (tx, rx) = channel("display", g.display_len()).unwrap();
        let unit = DisplayUnit::new(file, g, rx).unwrap();

        let worker = std::thread::spawn(move || unit.run(FrameLimit::Frames(2)));
        send_filled(&tx, 0x11);
        send_filled(&tx, 0x22);
        let mut file = worker.join().unwrap().unwrap().device;

        let mut contents = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        std::io::Read::read_to_end(&mut file, &mut contents).unwrap();
        assert_eq!(contents, vec![0x22; g.display_len()]);
    }

    #[test]
    fn screen_info_rejects_empty_resolution() {
        let err = ScreenInfo::new(0, 600, 16).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn screen_info_derives_frame_size() {
        let info = ScreenInfo::new(800, 600, 16).unwrap();
        assert_eq!(info.geometry(), Geometry::new(800, 600));
        assert_eq!(info.frame_bytes, 800 * 600 * 2);
        // Other depths are accepted with a warning.
        assert!(ScreenInfo::new(800, 600, 32).is_ok());
    }

    #[test]
    fn regular_file_has_no_screen_info() {
        let file = tempfile::tempfile().unwrap();
        let err = query_screen(&file).unwrap_err();
        assert!(matches!(err, PipelineError::Geometry(_)));
    }

    #[test]
    fn missing_framebuffer_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_framebuffer(&dir.path().join("fb0")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
