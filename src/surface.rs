//! Window pixel buffers.
//!
//! Pixels are 32-bit ARGB in native byte order, premultiplied the way the
//! drawing layer produces them. A [`Surface`] either owns its bytes or maps a
//! client-provided shared-memory segment read-only. [`SurfaceHandle`] is the
//! shared-ownership handle handed out to callers.

use std::io;
use std::sync::Arc;

use bytes::Bytes;

use crate::output::{Image, Rect};

pub type SurfaceHandle = Arc<Surface>;

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("invalid shared memory name {0:?}")]
    InvalidName(String),

    #[error("failed to open shared memory {name:?}: {source}")]
    Open { name: String, source: io::Error },

    #[error("shared memory {name:?} holds {actual} bytes, need {needed}")]
    TooSmall { name: String, actual: u64, needed: u64 },

    #[error("failed to map shared memory {name:?}: {source}")]
    Map { name: String, source: io::Error },

    #[error("shared memory surfaces are not supported on this platform")]
    Unsupported,
}

#[derive(Debug)]
enum Pixels {
    Owned(Vec<u8>),
    Mapped(memmap2::Mmap),
}

#[derive(Debug)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Pixels,
}

impl Surface {
    /// A fully transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: Pixels::Owned(vec![0; width as usize * height as usize * 4]),
        }
    }

    /// Build a surface from ARGB pixels in row-major order.
    pub fn from_argb(width: u32, height: u32, pixels: &[u32]) -> Self {
        let mut data = Vec::with_capacity(pixels.len() * 4);
        for p in pixels.iter().take(width as usize * height as usize) {
            data.extend_from_slice(&p.to_ne_bytes());
        }
        data.resize(width as usize * height as usize * 4, 0);
        Self {
            width,
            height,
            pixels: Pixels::Owned(data),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.pixels, Pixels::Mapped(_))
    }

    pub fn data(&self) -> &[u8] {
        match &self.pixels {
            Pixels::Owned(v) => v,
            Pixels::Mapped(m) => &m[..],
        }
    }

    fn data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.pixels {
            Pixels::Owned(v) => Some(v),
            Pixels::Mapped(_) => None,
        }
    }

    /// ARGB value at `(x, y)`. Out of bounds reads as transparent.
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let data = self.data();
        u32::from_ne_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]])
    }

    fn argb(&self) -> impl Iterator<Item = u32> + '_ {
        self.data()
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// An owned copy of this surface's pixels.
    pub fn to_owned_surface(&self) -> Surface {
        Surface {
            width: self.width,
            height: self.height,
            pixels: Pixels::Owned(self.data().to_vec()),
        }
    }

    /// A new surface of the given size holding the overlapping part of this one.
    pub fn resized(&self, width: u32, height: u32) -> Surface {
        let mut out = Surface::new(width, height);
        let copy_w = self.width.min(width) as usize * 4;
        let rows = self.height.min(height) as usize;
        let src = self.data();
        if let Some(dst) = out.data_mut() {
            for row in 0..rows {
                let s = row * self.width as usize * 4;
                let d = row * width as usize * 4;
                dst[d..d + copy_w].copy_from_slice(&src[s..s + copy_w]);
            }
        }
        out
    }

    /// Copy pixels within the surface: each destination rectangle in `area`
    /// receives the pixels found `(dx, dy)` away in the previous contents.
    pub fn scroll(&mut self, area: &[Rect], dx: i32, dy: i32) {
        let (w, h) = (self.width as i64, self.height as i64);
        let snapshot = self.data().to_vec();
        let Some(dst) = self.data_mut() else {
            return;
        };
        for rect in area {
            let x0 = (rect.x as i64).max(0);
            let y0 = (rect.y as i64).max(0);
            let x1 = (rect.x as i64 + rect.width as i64).min(w);
            let y1 = (rect.y as i64 + rect.height as i64).min(h);
            for y in y0..y1 {
                let sy = y - dy as i64;
                if sy < 0 || sy >= h {
                    continue;
                }
                for x in x0..x1 {
                    let sx = x - dx as i64;
                    if sx < 0 || sx >= w {
                        continue;
                    }
                    let d = ((y * w + x) * 4) as usize;
                    let s = ((sy * w + sx) * 4) as usize;
                    dst[d..d + 4].copy_from_slice(&snapshot[s..s + 4]);
                }
            }
        }
    }

    /// Full opaque image for an initial or resync upload.
    pub fn to_rgb_image(&self) -> Image {
        let mut rgba = Vec::with_capacity(self.data().len());
        for p in self.argb() {
            rgba.extend_from_slice(&[(p >> 16) as u8, (p >> 8) as u8, p as u8, 0xFF]);
        }
        Image {
            width: self.width,
            height: self.height,
            rgba: Bytes::from(rgba),
        }
    }

    /// Difference image against `previous`: pixels whose RGB is unchanged
    /// become fully transparent, changed pixels are fully opaque.
    ///
    /// Returns `None` when the sizes differ and no diff is possible.
    pub fn diff(&self, previous: &Surface) -> Option<Image> {
        if self.width != previous.width || self.height != previous.height {
            return None;
        }
        let mut rgba = Vec::with_capacity(self.data().len());
        for (new, old) in self.argb().zip(previous.argb()) {
            if new & 0x00FF_FFFF == old & 0x00FF_FFFF {
                rgba.extend_from_slice(&[0, 0, 0, 0]);
            } else {
                rgba.extend_from_slice(&[(new >> 16) as u8, (new >> 8) as u8, new as u8, 0xFF]);
            }
        }
        Some(Image {
            width: self.width,
            height: self.height,
            rgba: Bytes::from(rgba),
        })
    }

    /// Map the POSIX shared-memory segment `name` read-only as a
    /// `width * height` surface. The segment is unlinked right after mapping,
    /// so it lives exactly as long as the mapping.
    #[cfg(unix)]
    pub fn open_shared(name: &str, width: u32, height: u32) -> Result<Surface, SurfaceError> {
        use std::ffi::CString;
        use std::os::fd::FromRawFd;

        let needed = width as u64 * height as u64 * 4;
        let c_name = CString::new(name).map_err(|_| SurfaceError::InvalidName(name.to_string()))?;

        // SAFETY: `c_name` is a valid NUL-terminated string for the call.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd < 0 {
            return Err(SurfaceError::Open {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: `fd` was just returned by shm_open and is owned by nobody else.
        let file = unsafe { std::fs::File::from_raw_fd(fd) };

        let result = map_segment(&file, name, needed);
        // SAFETY: `c_name` is a valid NUL-terminated string for the call.
        unsafe { libc::shm_unlink(c_name.as_ptr()) };

        let map = result?;
        Ok(Surface {
            width,
            height,
            pixels: Pixels::Mapped(map),
        })
    }

    #[cfg(not(unix))]
    pub fn open_shared(_name: &str, _width: u32, _height: u32) -> Result<Surface, SurfaceError> {
        Err(SurfaceError::Unsupported)
    }
}

#[cfg(unix)]
fn map_segment(file: &std::fs::File, name: &str, needed: u64) -> Result<memmap2::Mmap, SurfaceError> {
    let actual = file
        .metadata()
        .map_err(|source| SurfaceError::Open {
            name: name.to_string(),
            source,
        })?
        .len();
    if actual < needed {
        return Err(SurfaceError::TooSmall {
            name: name.to_string(),
            actual,
            needed,
        });
    }
    // SAFETY: the segment is mapped read-only; the client owns its contents
    // and the protocol treats them as a snapshot at update time.
    unsafe { memmap2::MmapOptions::new().len(needed as usize).map(file) }.map_err(|source| {
        SurfaceError::Map {
            name: name.to_string(),
            source,
        }
    })
}
