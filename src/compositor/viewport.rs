//! Viewport rectangles given in pixels or canvas percentages
//!
//! Values follow the host's attribute conventions: `"25%"` is a share of the
//! canvas edge, anything else is read as a leading integer (`"120"`, `"120px"`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CompositorError, CompositorResult};

/// One edge or extent of a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawViewportValue", into = "String")]
pub enum ViewportValue {
    Pixels(i32),
    /// Percentage of the canvas edge, `50.0` meaning half
    Percent(f64),
}

impl Default for ViewportValue {
    fn default() -> Self {
        ViewportValue::Pixels(0)
    }
}

impl ViewportValue {
    /// Resolve against a canvas edge of `extent` pixels, truncating toward zero.
    pub fn resolve(&self, extent: f32) -> f32 {
        match *self {
            ViewportValue::Pixels(px) => px as f32,
            ViewportValue::Percent(percent) => (percent * 0.01 * extent as f64).trunc() as f32,
        }
    }
}

/// Leading decimal integer with optional sign, ignoring trailing text.
fn parse_leading_int(text: &str) -> Option<i32> {
    let text = text.trim_start();
    let (sign, digits) = match text.as_bytes().first() {
        Some(b'-') => (-1, &text[1..]),
        Some(b'+') => (1, &text[1..]),
        _ => (1, text),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i32>().ok().map(|value| sign * value)
}

/// Leading decimal float, ignoring trailing text.
fn parse_leading_float(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (index, c) in text.char_indices() {
        match c {
            '+' | '-' if index == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = index + c.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    text[..end].parse::<f64>().ok()
}

impl FromStr for ViewportValue {
    type Err = CompositorError;

    fn from_str(text: &str) -> CompositorResult<Self> {
        let invalid = || CompositorError::InvalidViewport(text.to_string());
        match text.strip_suffix('%') {
            Some(percent) => parse_leading_float(percent)
                .map(ViewportValue::Percent)
                .ok_or_else(invalid),
            None => parse_leading_int(text)
                .map(ViewportValue::Pixels)
                .ok_or_else(invalid),
        }
    }
}

impl fmt::Display for ViewportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewportValue::Pixels(px) => write!(f, "{px}"),
            ViewportValue::Percent(percent) => write!(f, "{percent}%"),
        }
    }
}

impl From<ViewportValue> for String {
    fn from(value: ViewportValue) -> Self {
        value.to_string()
    }
}

impl From<i32> for ViewportValue {
    fn from(px: i32) -> Self {
        ViewportValue::Pixels(px)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawViewportValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl TryFrom<RawViewportValue> for ViewportValue {
    type Error = CompositorError;

    fn try_from(raw: RawViewportValue) -> CompositorResult<Self> {
        match raw {
            RawViewportValue::Int(px) => i32::try_from(px)
                .map(ViewportValue::Pixels)
                .map_err(|_| CompositorError::InvalidViewport(px.to_string())),
            RawViewportValue::Float(px) => Ok(ViewportValue::Pixels(px.trunc() as i32)),
            RawViewportValue::Text(text) => text.parse(),
        }
    }
}

/// Resolved rectangle in layout pixels, origin at the bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewportRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn lerp(&self, target: &ViewportRect, t: f32) -> ViewportRect {
        ViewportRect {
            x: (1.0 - t) * self.x + t * target.x,
            y: (1.0 - t) * self.y + t * target.y,
            width: (1.0 - t) * self.width + t * target.width,
            height: (1.0 - t) * self.height + t * target.height,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

/// The four attribute values of a view's viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportSpec {
    pub left: ViewportValue,
    pub bottom: ViewportValue,
    pub width: ViewportValue,
    pub height: ViewportValue,
}

impl Default for ViewportSpec {
    fn default() -> Self {
        Self::full()
    }
}

impl ViewportSpec {
    pub fn new(
        left: ViewportValue,
        bottom: ViewportValue,
        width: ViewportValue,
        height: ViewportValue,
    ) -> Self {
        Self {
            left,
            bottom,
            width,
            height,
        }
    }

    /// The whole canvas.
    pub fn full() -> Self {
        Self::new(
            ViewportValue::Pixels(0),
            ViewportValue::Pixels(0),
            ViewportValue::Percent(100.0),
            ViewportValue::Percent(100.0),
        )
    }

    /// Parse four attribute strings.
    pub fn parse(left: &str, bottom: &str, width: &str, height: &str) -> CompositorResult<Self> {
        Ok(Self::new(
            left.parse()?,
            bottom.parse()?,
            width.parse()?,
            height.parse()?,
        ))
    }

    /// Resolve against a canvas of `canvas_width` x `canvas_height`.
    ///
    /// Negative origins wrap from the far edge, then extents are clamped so the
    /// rectangle ends inside the canvas.
    pub fn resolve(&self, canvas_width: f32, canvas_height: f32) -> ViewportRect {
        let mut y = self.bottom.resolve(canvas_height);
        let mut x = self.left.resolve(canvas_width);
        if x < 0.0 {
            x += canvas_width;
        }
        if y < 0.0 {
            y += canvas_height;
        }

        let width = self.width.resolve(canvas_width).min(canvas_width - x);
        let height = self.height.resolve(canvas_height).min(canvas_height - y);
        ViewportRect::new(x, y, width, height)
    }
}

/// Linear transition between two resolved rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportAnimation {
    pub from: ViewportRect,
    pub to: ViewportRect,
    pub elapsed: f32,
    /// Zero or less means no animation is running
    pub total: f32,
}

impl ViewportAnimation {
    pub fn start(from: ViewportRect, to: ViewportRect, total: f32) -> Self {
        Self {
            from,
            to,
            elapsed: 0.0,
            total,
        }
    }

    pub fn is_active(&self) -> bool {
        self.total > 0.0
    }

    /// Advance by `delta` seconds and return the interpolated rectangle, or
    /// `None` when no animation is running. Finishing clears `total`.
    pub fn step(&mut self, delta: f32) -> Option<ViewportRect> {
        if !self.is_active() {
            return None;
        }
        self.elapsed += delta;
        let mut progress = self.elapsed / self.total;
        if progress >= 1.0 {
            self.total = 0.0;
            progress = 1.0;
        }
        Some(self.from.lerp(&self.to, progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("50%", ViewportValue::Percent(50.0))]
    #[case("12.5%", ViewportValue::Percent(12.5))]
    #[case("120", ViewportValue::Pixels(120))]
    #[case("120px", ViewportValue::Pixels(120))]
    #[case("-40", ViewportValue::Pixels(-40))]
    #[case("7.9", ViewportValue::Pixels(7))]
    fn parses_attribute_strings(#[case] text: &str, #[case] expected: ViewportValue) {
        assert_eq!(text.parse::<ViewportValue>().unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("%")]
    fn rejects_non_numbers(#[case] text: &str) {
        assert!(matches!(
            text.parse::<ViewportValue>(),
            Err(CompositorError::InvalidViewport(_))
        ));
    }

    #[test]
    fn percentages_truncate() {
        let spec = ViewportSpec::parse("0", "0", "33%", "50%").unwrap();
        let rect = spec.resolve(1000.0, 601.0);
        assert_eq!(rect, ViewportRect::new(0.0, 0.0, 330.0, 300.0));
    }

    #[test]
    fn extent_is_clamped_to_canvas() {
        let spec = ViewportSpec::parse("600", "100", "800", "100%").unwrap();
        let rect = spec.resolve(1000.0, 500.0);
        assert_eq!(rect.width, 400.0);
        assert_eq!(rect.height, 400.0);
    }

    #[test]
    fn negative_origin_wraps() {
        let spec = ViewportSpec::parse("-200", "-25%", "200", "100").unwrap();
        let rect = spec.resolve(1000.0, 400.0);
        assert_eq!(rect.x, 800.0);
        assert_eq!(rect.y, 300.0);
    }

    #[test]
    fn wrapped_origin_keeps_extent_inside_canvas() {
        let spec = ViewportSpec::parse("-200", "-100", "300", "300").unwrap();
        let rect = spec.resolve(1000.0, 400.0);
        assert_eq!(rect, ViewportRect::new(800.0, 300.0, 200.0, 100.0));
        assert!(rect.x + rect.width <= 1000.0);
        assert!(rect.y + rect.height <= 400.0);
    }

    #[rstest]
    fn percentages_survive_resolving_and_back(
        #[values(320.0, 801.0, 1280.0, 1917.0)] canvas_width: f32,
        #[values(0.0, 12.5, 25.0, 33.3, 50.0, 100.0)] percent: f64,
    ) {
        let canvas_height = canvas_width / 2.0;
        let spec = ViewportSpec::new(
            ViewportValue::Percent(percent),
            ViewportValue::Percent(percent),
            ViewportValue::Percent(100.0 - percent),
            ViewportValue::Percent(100.0 - percent),
        );
        let rect = spec.resolve(canvas_width, canvas_height);

        let back = |pixels: f32, extent: f32| pixels as f64 / extent as f64 * 100.0;
        let one_pixel = |extent: f32| 100.0 / extent as f64;
        assert!((back(rect.x, canvas_width) - percent).abs() <= one_pixel(canvas_width));
        assert!((back(rect.y, canvas_height) - percent).abs() <= one_pixel(canvas_height));
        assert!(
            (back(rect.width, canvas_width) - (100.0 - percent)).abs() <= one_pixel(canvas_width)
        );
        assert!(
            (back(rect.height, canvas_height) - (100.0 - percent)).abs()
                <= one_pixel(canvas_height)
        );
    }

    #[test]
    fn deserializes_mixed_values() {
        let spec: ViewportSpec =
            toml::from_str("left = 10\nbottom = \"5%\"\nwidth = \"50%\"\nheight = 240").unwrap();
        assert_eq!(spec.left, ViewportValue::Pixels(10));
        assert_eq!(spec.bottom, ViewportValue::Percent(5.0));
        assert_eq!(spec.height, ViewportValue::Pixels(240));
    }

    #[test]
    fn animation_reaches_target_and_stops() {
        let from = ViewportRect::new(0.0, 0.0, 100.0, 100.0);
        let to = ViewportRect::new(100.0, 0.0, 300.0, 100.0);
        let mut animation = ViewportAnimation::start(from, to, 1.0);

        let half = animation.step(0.5).unwrap();
        assert_eq!(half, ViewportRect::new(50.0, 0.0, 200.0, 100.0));

        let end = animation.step(0.75).unwrap();
        assert_eq!(end, to);
        assert!(!animation.is_active());
        assert_eq!(animation.step(0.1), None);
    }
}
