//! 3×3 anatomical zone labels from a finding's center point.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VerticalBand {
    Top,
    Middle,
    Bottom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HorizontalBand {
    Left,
    Center,
    Right,
}

impl VerticalBand {
    pub fn as_str(self) -> &'static str {
        match self {
            VerticalBand::Top => "top",
            VerticalBand::Middle => "middle",
            VerticalBand::Bottom => "bottom",
        }
    }
}

impl HorizontalBand {
    pub fn as_str(self) -> &'static str {
        match self {
            HorizontalBand::Left => "left",
            HorizontalBand::Center => "center",
            HorizontalBand::Right => "right",
        }
    }

    /// Side column used by the PDF detail table.
    pub fn side(self) -> &'static str {
        match self {
            HorizontalBand::Left => "Left",
            HorizontalBand::Center => "Center",
            HorizontalBand::Right => "Right",
        }
    }
}

/// Zone label, rendered as `"{vertical}-{horizontal}"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    pub vertical: VerticalBand,
    pub horizontal: HorizontalBand,
}

impl Position {
    /// Classify a center point against an image of `width` × `height`.
    ///
    /// Bands are thirds of each axis; a point on a boundary belongs to the
    /// lower band. Points outside the image fall into the nearest edge band.
    pub fn classify(cx: f64, cy: f64, width: u32, height: u32) -> Self {
        let w = width as f64;
        let h = height as f64;
        let horizontal = if cx < w / 3.0 {
            HorizontalBand::Left
        } else if cx < 2.0 * w / 3.0 {
            HorizontalBand::Center
        } else {
            HorizontalBand::Right
        };
        let vertical = if cy < h / 3.0 {
            VerticalBand::Top
        } else if cy < 2.0 * h / 3.0 {
            VerticalBand::Middle
        } else {
            VerticalBand::Bottom
        };
        Self {
            vertical,
            horizontal,
        }
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.vertical.as_str(), self.horizontal.as_str())
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (v, h) = s
            .split_once('-')
            .ok_or_else(|| format!("position '{}' is not '<vertical>-<horizontal>'", s))?;
        let vertical = match v {
            "top" => VerticalBand::Top,
            "middle" => VerticalBand::Middle,
            "bottom" => VerticalBand::Bottom,
            other => return Err(format!("unknown vertical band '{}'", other)),
        };
        let horizontal = match h {
            "left" => HorizontalBand::Left,
            "center" => HorizontalBand::Center,
            "right" => HorizontalBand::Right,
            other => return Err(format!("unknown horizontal band '{}'", other)),
        };
        Ok(Self {
            vertical,
            horizontal,
        })
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [&str; 9] = [
        "top-left",
        "top-center",
        "top-right",
        "middle-left",
        "middle-center",
        "middle-right",
        "bottom-left",
        "bottom-center",
        "bottom-right",
    ];

    #[test]
    fn classifies_corners_and_center() {
        assert_eq!(Position::classify(10.0, 10.0, 300, 300).label(), "top-left");
        assert_eq!(
            Position::classify(150.0, 150.0, 300, 300).label(),
            "middle-center"
        );
        assert_eq!(
            Position::classify(290.0, 290.0, 300, 300).label(),
            "bottom-right"
        );
    }

    #[test]
    fn boundaries_belong_to_lower_band() {
        // w/3 = 100 exactly: not < 100, so the point is in the center band.
        assert_eq!(
            Position::classify(100.0, 0.0, 300, 300).horizontal,
            HorizontalBand::Center
        );
        assert_eq!(
            Position::classify(99.999, 0.0, 300, 300).horizontal,
            HorizontalBand::Left
        );
        assert_eq!(
            Position::classify(0.0, 200.0, 300, 300).vertical,
            VerticalBand::Bottom
        );
    }

    #[test]
    fn every_in_bounds_point_maps_to_a_known_label() {
        let (w, h) = (640u32, 480u32);
        for x in (0..w).step_by(13) {
            for y in (0..h).step_by(11) {
                let label = Position::classify(x as f64, y as f64, w, h).label();
                assert!(LABELS.contains(&label.as_str()), "unexpected {label}");
            }
        }
    }

    #[test]
    fn label_parses_back() {
        for label in LABELS {
            let parsed: Position = label.parse().expect("known label");
            assert_eq!(parsed.to_string(), label);
        }
        assert!("left-top".parse::<Position>().is_err());
        assert!("center".parse::<Position>().is_err());
    }
}
