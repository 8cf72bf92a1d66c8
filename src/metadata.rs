use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The overlay was positioned while the photo was taken.
pub const FLAG_OVERLAY_SET_BY_CAMERA: u32 = 0x1;
/// The overlay position was found by pupil detection rather than by hand.
pub const FLAG_OVERLAY_POSITION_DETERMINED_AUTOMATICALLY: u32 = 0x2;
/// The user locked the overlay so that pan/zoom no longer moves it.
pub const FLAG_OVERLAY_POSITION_LOCKED: u32 = 0x4;

/// Which eye a photo shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RightLeft {
    Right,
    Left,
}

impl RightLeft {
    /// Value stored in XMP.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Right => "right",
            Self::Left => "left",
        }
    }

    /// Parse the stored value. Accepts the short forms `r`/`l` as well.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "right" | "r" => Some(Self::Right),
            "left" | "l" => Some(Self::Left),
            _ => None,
        }
    }
}

/// Annotation metadata of one iris photo.
///
/// Every field is optional: an absent field means "never set", which is not
/// the same as a zeroed value. A brightness of `Some(0.0)` is an explicit
/// neutral setting, `None` means the viewer falls back to its default.
///
/// Coordinates (`x_center`, `y_center`, `x_position`, `y_position`) are
/// relative to the image size, so they survive rescaling of the bitmap.
///
/// `orientation` is read from EXIF for display only. It is never written and
/// is skipped by serde.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub comment: Option<String>,
    pub person: Option<String>,

    /// Overlay center, x in [0, 1].
    pub x_center: Option<f32>,
    /// Overlay center, y in [0, 1].
    pub y_center: Option<f32>,
    /// Overlay size relative to the image.
    pub overlay_scale_factor: Option<f32>,

    /// View center, x in [0, 1].
    pub x_position: Option<f32>,
    /// View center, y in [0, 1].
    pub y_position: Option<f32>,
    pub zoom_factor: Option<f32>,

    pub organize_date: Option<NaiveDateTime>,
    pub right_left: Option<RightLeft>,

    /// Brightness offset in [-1, 1].
    pub brightness: Option<f32>,
    /// Contrast factor in [0, ∞), 1 is neutral.
    pub contrast: Option<f32>,
    /// Overlay color as ARGB.
    pub overlay_color: Option<u32>,

    pub pupil_size: Option<f32>,
    pub pupil_x_offset: Option<f32>,
    pub pupil_y_offset: Option<f32>,

    /// Bit set of `FLAG_*` values.
    pub flags: u32,

    #[serde(skip)]
    pub orientation: Option<u16>,
}

impl Metadata {
    /// `true` if no persisted field is set.
    pub fn is_empty(&self) -> bool {
        let persisted = Metadata {
            orientation: None,
            ..self.clone()
        };
        persisted == Metadata::default()
    }

    pub fn has_overlay_position(&self) -> bool {
        self.x_center.is_some() && self.y_center.is_some() && self.overlay_scale_factor.is_some()
    }

    pub fn has_view_position(&self) -> bool {
        self.x_position.is_some() && self.y_position.is_some() && self.zoom_factor.is_some()
    }

    pub fn has_brightness_contrast(&self) -> bool {
        self.brightness.is_some() && self.contrast.is_some()
    }

    pub fn reset_overlay_position(&mut self) {
        self.x_center = None;
        self.y_center = None;
        self.overlay_scale_factor = None;
        self.remove_flag(FLAG_OVERLAY_POSITION_DETERMINED_AUTOMATICALLY);
        self.remove_flag(FLAG_OVERLAY_POSITION_LOCKED);
    }

    pub fn reset_view_position(&mut self) {
        self.x_position = None;
        self.y_position = None;
        self.zoom_factor = None;
    }

    /// Set brightness, clamped to [-1, 1]. NaN clears the value.
    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = if brightness.is_nan() {
            None
        } else {
            Some(brightness.clamp(-1.0, 1.0))
        };
    }

    /// Set contrast, clamped to [0, ∞). NaN clears the value.
    pub fn set_contrast(&mut self, contrast: f32) {
        self.contrast = if contrast.is_nan() {
            None
        } else {
            Some(contrast.max(0.0))
        };
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }

    pub fn add_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    pub fn remove_flag(&mut self, flag: u32) {
        self.flags &= !flag;
    }

    /// Fill fields that are absent here with values from `other`.
    ///
    /// Used to combine the XMP record with the standard EXIF tags: XMP wins,
    /// EXIF only fills gaps.
    pub fn fill_missing_from(&mut self, other: &Metadata) {
        fn fill<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
            if target.is_none() {
                target.clone_from(source);
            }
        }

        fill(&mut self.title, &other.title);
        fill(&mut self.description, &other.description);
        fill(&mut self.subject, &other.subject);
        fill(&mut self.comment, &other.comment);
        fill(&mut self.person, &other.person);
        fill(&mut self.x_center, &other.x_center);
        fill(&mut self.y_center, &other.y_center);
        fill(&mut self.overlay_scale_factor, &other.overlay_scale_factor);
        fill(&mut self.x_position, &other.x_position);
        fill(&mut self.y_position, &other.y_position);
        fill(&mut self.zoom_factor, &other.zoom_factor);
        fill(&mut self.organize_date, &other.organize_date);
        fill(&mut self.right_left, &other.right_left);
        fill(&mut self.brightness, &other.brightness);
        fill(&mut self.contrast, &other.contrast);
        fill(&mut self.overlay_color, &other.overlay_color);
        fill(&mut self.pupil_size, &other.pupil_size);
        fill(&mut self.pupil_x_offset, &other.pupil_x_offset);
        fill(&mut self.pupil_y_offset, &other.pupil_y_offset);
        fill(&mut self.orientation, &other.orientation);
        if self.flags == 0 {
            self.flags = other.flags;
        }
    }
}

/// Format an ARGB color as `#AARRGGBB`.
pub fn format_color(argb: u32) -> String {
    format!("#{argb:08X}")
}

/// Parse `#AARRGGBB` or `#RRGGBB` (opaque).
pub fn parse_color(value: &str) -> Option<u32> {
    let hex = value.trim().trim_start_matches('#');
    match hex.len() {
        8 => u32::from_str_radix(hex, 16).ok(),
        6 => u32::from_str_radix(hex, 16).ok().map(|rgb| 0xFF00_0000 | rgb),
        _ => None,
    }
}
