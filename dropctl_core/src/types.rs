//! Small geometric value types shared by vision, arbiter and control.

/// Sub-pixel point in camera coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Component-wise difference `self - other`.
    pub fn minus(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }

    /// Divide both coordinates by `scale` (display to camera pixels).
    pub fn unscale(self, scale: f64) -> Self {
        Self::new(self.x / scale, self.y / scale)
    }

    /// Integer pixel containing this point, if it is non-negative.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn pixel(self) -> Option<(u32, u32)> {
        if self.x.is_finite() && self.y.is_finite() && self.x >= 0.0 && self.y >= 0.0 {
            Some((self.x.floor() as u32, self.y.floor() as u32))
        } else {
            None
        }
    }
}

/// Axis-aligned box in integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoxRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoxRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Square of side `size` around the integer pixel holding `center`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn centered(center: Point2, size: u32) -> Self {
        let half = (size / 2) as i32;
        let cx = center.x.floor() as i32;
        let cy = center.y.floor() as i32;
        Self::new(cx - half, cy - half, size, size)
    }

    /// Smallest box holding every pixel in `pixels`.
    #[allow(clippy::cast_possible_wrap)]
    pub fn bounding(pixels: &[(u32, u32)]) -> Self {
        let Some(&(x0, y0)) = pixels.first() else {
            return Self::default();
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
        for &(x, y) in pixels {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Self::new(min_x as i32, min_y as i32, max_x - min_x + 1, max_y - min_y + 1)
    }

    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    /// Half-open containment: left/top edges inside, right/bottom outside.
    pub fn contains(&self, p: Point2) -> bool {
        p.x >= f64::from(self.x)
            && p.y >= f64::from(self.y)
            && p.x < f64::from(self.x) + f64::from(self.width)
            && p.y < f64::from(self.y) + f64::from(self.height)
    }

    /// Box shrunk by `dx` on the left and right and `dy` on top and bottom.
    #[allow(clippy::cast_sign_loss)]
    pub fn shrunk(&self, dx: i32, dy: i32) -> Self {
        let w = i64::from(self.width) - 2 * i64::from(dx);
        let h = i64::from(self.height) - 2 * i64::from(dy);
        Self::new(
            self.x + dx,
            self.y + dy,
            u32::try_from(w.max(0)).unwrap_or(0),
            u32::try_from(h.max(0)).unwrap_or(0),
        )
    }
}

/// Flow direction of a channel in camera coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowDirection {
    #[default]
    PosX,
    NegX,
    PosY,
    NegY,
}

impl FlowDirection {
    /// `1`/`-1` select the x axis, `2`/`-2` the y axis; the sign is the
    /// sense of positive flow.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::PosX),
            -1 => Some(Self::NegX),
            2 => Some(Self::PosY),
            -2 => Some(Self::NegY),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::PosX => 1,
            Self::NegX => -1,
            Self::PosY => 2,
            Self::NegY => -2,
        }
    }

    /// Signed coordinate of `p` along the flow axis.
    pub fn project(self, p: Point2) -> f64 {
        match self {
            Self::PosX => p.x,
            Self::NegX => -p.x,
            Self::PosY => p.y,
            Self::NegY => -p.y,
        }
    }
}
