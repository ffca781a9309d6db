//! RGBA raster target

use super::layout::Rect;
use crate::capture::{Resolution, VideoFrame};

/// A fixed-size RGBA8 drawing surface
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    /// Opaque black canvas
    pub fn new(resolution: Resolution) -> Self {
        let mut canvas = Self {
            width: resolution.width,
            height: resolution.height,
            data: vec![0; resolution.rgba_len()],
        };
        canvas.fill([0, 0, 0, 255]);
        canvas
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        let px = &self.data[idx..idx + 4];
        Some([px[0], px[1], px[2], px[3]])
    }

    fn put(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let idx = ((y * self.width + x) * 4) as usize;
        self.data[idx..idx + 4].copy_from_slice(&rgba);
    }

    /// Draw a frame scaled into `dest` with nearest-neighbor sampling.
    /// Parts of `dest` outside the canvas are clipped.
    pub fn draw_scaled(&mut self, frame: &VideoFrame, dest: Rect) {
        if frame.width == 0 || frame.height == 0 || dest.width == 0 || dest.height == 0 {
            return;
        }

        let x0 = dest.x.max(0) as i64;
        let y0 = dest.y.max(0) as i64;
        let x1 = dest.right().min(self.width as i64);
        let y1 = dest.bottom().min(self.height as i64);

        for cy in y0..y1 {
            let dy = (cy - dest.y as i64) as u64;
            let src_y = ((dy * frame.height as u64) / dest.height as u64).min(frame.height as u64 - 1);
            for cx in x0..x1 {
                let dx = (cx - dest.x as i64) as u64;
                let src_x = ((dx * frame.width as u64) / dest.width as u64).min(frame.width as u64 - 1);

                let src_idx = ((src_y * frame.width as u64 + src_x) * 4) as usize;
                let Some(src) = frame.data.get(src_idx..src_idx + 4) else {
                    continue;
                };
                // Video is composited opaque
                self.put(cx as u32, cy as u32, [src[0], src[1], src[2], 255]);
            }
        }
    }

    /// Stroke the outline of `path` with a line of `line_width` centered on it.
    /// A pixel is painted when its center falls inside the stroke.
    pub fn stroke_rect(&mut self, path: Rect, line_width: f64, rgba: [u8; 4]) {
        let half = line_width / 2.0;
        let (left, top) = (path.x as f64, path.y as f64);
        let (right, bottom) = (path.right() as f64, path.bottom() as f64);

        let outer = (left - half, top - half, right + half, bottom + half);
        let inner = (left + half, top + half, right - half, bottom - half);

        let x0 = outer.0.floor().max(0.0) as u32;
        let y0 = outer.1.floor().max(0.0) as u32;
        let x1 = (outer.2.ceil().max(0.0) as u32).min(self.width);
        let y1 = (outer.3.ceil().max(0.0) as u32).min(self.height);

        for y in y0..y1 {
            let cy = y as f64 + 0.5;
            for x in x0..x1 {
                let cx = x as f64 + 0.5;
                let in_outer = cx > outer.0 && cx < outer.2 && cy > outer.1 && cy < outer.3;
                let in_inner = cx > inner.0 && cx < inner.2 && cy > inner.1 && cy < inner.3;
                if in_outer && !in_inner {
                    self.put(x, y, rgba);
                }
            }
        }
    }

    /// Copy the current contents out as a frame
    pub fn snapshot(&self, timestamp_ms: f64) -> VideoFrame {
        VideoFrame {
            width: self.width,
            height: self.height,
            data: std::sync::Arc::new(self.data.clone()),
            timestamp_ms,
        }
    }
}

/// Resize a frame to exactly `target` if it isn't already
pub fn fit_frame(frame: VideoFrame, target: Resolution) -> VideoFrame {
    if frame.resolution() == target {
        return frame;
    }
    let mut canvas = Canvas::new(target);
    canvas.draw_scaled(&frame, Rect::new(0, 0, target.width, target.height));
    canvas.snapshot(frame.timestamp_ms)
}
