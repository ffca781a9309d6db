//! Picture-in-picture geometry

use crate::capture::Resolution;
use serde::Serialize;

/// Overlay size as a percentage of each canvas dimension
pub const PIP_SCALE_PERCENT: u32 = 20;

/// Distance from the overlay to the right and bottom canvas edges
pub const PIP_MARGIN: u32 = 20;

/// Border stroke width
pub const BORDER_WIDTH: f64 = 3.0;

/// Distance of the border path outside the overlay
pub const BORDER_OFFSET: i32 = 2;

/// Border color (#3b82f6)
pub const ACCENT_COLOR: [u8; 4] = [0x3b, 0x82, 0xf6, 0xff];

/// Axis-aligned rectangle in canvas pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Grow the rectangle by `by` pixels on every side
    pub fn inflate(&self, by: i32) -> Self {
        Self {
            x: self.x - by,
            y: self.y - by,
            width: (self.width as i64 + 2 * by as i64).max(0) as u32,
            height: (self.height as i64 + 2 * by as i64).max(0) as u32,
        }
    }

    /// Whether the rectangle lies entirely within a canvas of the given size
    pub fn within(&self, canvas: Resolution) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.right() <= canvas.width as i64
            && self.bottom() <= canvas.height as i64
    }
}

/// Where the overlay and its border go on a canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipLayout {
    pub canvas: Resolution,
    pub pip: Rect,
    pub border: Rect,
}

impl PipLayout {
    pub fn for_canvas(canvas: Resolution) -> Self {
        let pip_width = canvas.width * PIP_SCALE_PERCENT / 100;
        let pip_height = canvas.height * PIP_SCALE_PERCENT / 100;

        // Tiny canvases cannot fit the margin; pin to the origin instead
        let x = (canvas.width as i64 - pip_width as i64 - PIP_MARGIN as i64).max(0) as i32;
        let y = (canvas.height as i64 - pip_height as i64 - PIP_MARGIN as i64).max(0) as i32;

        let pip = Rect::new(x, y, pip_width, pip_height);
        Self {
            canvas,
            pip,
            border: pip.inflate(BORDER_OFFSET),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::QualityTier;

    #[test]
    fn high_tier_layout() {
        let layout = PipLayout::for_canvas(QualityTier::High.resolution());
        assert_eq!(layout.pip, Rect::new(1516, 844, 384, 216));
        assert_eq!(layout.border, Rect::new(1514, 842, 388, 220));
    }

    #[test]
    fn overlay_stays_inside_canvas_and_under_a_fifth() {
        for width in (1..2000).step_by(37) {
            for height in (1..1200).step_by(29) {
                let canvas = Resolution::new(width, height);
                let layout = PipLayout::for_canvas(canvas);
                assert!(layout.pip.within(canvas), "{canvas}: {:?}", layout.pip);
                assert!(layout.pip.width * 5 <= width);
                assert!(layout.pip.height * 5 <= height);
            }
        }
    }
}
