//! Basic geometry of the greenhouse rig: the envelope the carriage can
//! move in, where "home" is by default, and the grid of plant positions.
//!
//! All coordinates are in centimeters. Absolute positions are measured from
//! the rig's corner, with x along the short side and y along the long side.
//! Grid cells are stored as offsets from HOME, so that recalibrating HOME
//! moves the whole grid along with it.

pub mod grid;

pub use grid::{Grid, GridError, CELL_TOLERANCE};

pub struct Cm;

pub type Point = euclid::Point2D<f32, Cm>;
pub type Offset = euclid::Vector2D<f32, Cm>;
pub type Len = euclid::Length<f32, Cm>;

pub trait LenExt {
    fn cm(self) -> Len;
}

impl LenExt for f32 {
    fn cm(self) -> Len {
        Len::new(self)
    }
}

/// Straight-line distance between two points, in centimeters.
pub fn distance(a: Point, b: Point) -> f32 {
    (b - a).length()
}

pub struct RigConfigBuilder {
    width: Len,
    height: Len,
}

impl Default for RigConfigBuilder {
    fn default() -> Self {
        Self {
            width: 45.0f32.cm(),
            height: 63.0f32.cm(),
        }
    }
}

impl RigConfigBuilder {
    pub fn build(&self) -> RigConfig {
        RigConfig {
            width: self.width,
            height: self.height,
        }
    }

    pub fn with_width(&mut self, width: Len) -> &mut Self {
        self.width = width;
        self
    }

    pub fn with_height(&mut self, height: Len) -> &mut Self {
        self.height = height;
        self
    }
}

/// The physical envelope of a rig.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RigConfig {
    /// Extent of the x axis (the short side of the greenhouse).
    pub width: Len,
    /// Extent of the y axis (the long side of the greenhouse).
    pub height: Len,
}

impl Default for RigConfig {
    fn default() -> Self {
        RigConfigBuilder::default().build()
    }
}

impl RigConfig {
    /// The factory HOME position: the geometric center of the rig.
    pub fn default_home(&self) -> Point {
        Point::new(self.width.get() / 2.0, self.height.get() / 2.0)
    }

    /// Is `p` inside the envelope? The coordinator doesn't enforce this (the
    /// device clamps on its own), but it's useful for warnings.
    pub fn contains(&self, p: &Point) -> bool {
        (0.0..=self.width.get()).contains(&p.x) && (0.0..=self.height.get()).contains(&p.y)
    }

    /// How far HOME has been moved away from the factory default.
    pub fn calibration_offset(&self, home: Point) -> Offset {
        home - self.default_home()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_home_is_center() {
        let cfg = RigConfig::default();
        assert_eq!(cfg.default_home(), Point::new(22.5, 31.5));
        assert_eq!(cfg.calibration_offset(cfg.default_home()), Offset::zero());
    }

    #[test]
    fn builder() {
        let cfg = RigConfigBuilder::default()
            .with_width(40.0f32.cm())
            .with_height(80.0f32.cm())
            .build();
        assert_eq!(cfg.default_home(), Point::new(20.0, 40.0));
        assert!(cfg.contains(&Point::new(0.0, 80.0)));
        assert!(!cfg.contains(&Point::new(-0.5, 10.0)));
    }

    proptest! {
        #[test]
        fn offset_recovers_home(x in -10.0..60.0f32, y in -10.0..80.0f32) {
            let cfg = RigConfig::default();
            let home = Point::new(x, y);
            let back = cfg.default_home() + cfg.calibration_offset(home);
            prop_assert!((back.x - home.x).abs() < 1e-4);
            prop_assert!((back.y - home.y).abs() < 1e-4);
        }

        #[test]
        fn distance_is_symmetric(ax in 0.0..45.0f32, ay in 0.0..63.0f32, bx in 0.0..45.0f32, by in 0.0..63.0f32) {
            let a = Point::new(ax, ay);
            let b = Point::new(bx, by);
            prop_assert!((distance(a, b) - distance(b, a)).abs() < 1e-4);
            prop_assert!(distance(a, a) == 0.0);
        }
    }
}
