//! Display resources: named, immutable visual assets referenced by actions.

use crate::error::{OdeError, Result};
use crate::types::{BoundingBox, RgbaColor};

/// The visual asset itself.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayKind {
    Color(RgbaColor),
    Font {
        family: String,
        size: u32,
        color: RgbaColor,
    },
    Rectangle {
        bbox: BoundingBox,
        border_width: u32,
        color: RgbaColor,
        bg_color: Option<RgbaColor>,
    },
}

/// Named display resource. Never mutated after creation.
#[derive(Debug)]
pub struct DisplayResource {
    name: String,
    kind: DisplayKind,
}

impl DisplayResource {
    pub fn new(name: impl Into<String>, kind: DisplayKind) -> Result<Self> {
        let name = name.into();
        validate(&name, &kind)?;
        Ok(Self { name, kind })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &DisplayKind {
        &self.kind
    }

    /// The color this resource describes, if it is a plain color.
    pub fn as_color(&self) -> Option<RgbaColor> {
        match self.kind {
            DisplayKind::Color(color) => Some(color),
            _ => None,
        }
    }
}

fn validate(name: &str, kind: &DisplayKind) -> Result<()> {
    let bad_color = |c: &RgbaColor| {
        OdeError::InvalidParameter(format!(
            "display '{}' has a color channel outside 0.0..=1.0: {:?}",
            name, c
        ))
    };
    match kind {
        DisplayKind::Color(color) => {
            if !color.is_valid() {
                return Err(bad_color(color));
            }
        }
        DisplayKind::Font {
            family,
            size,
            color,
        } => {
            if family.trim().is_empty() || *size == 0 {
                return Err(OdeError::InvalidParameter(format!(
                    "font '{}' needs a family and a non-zero size",
                    name
                )));
            }
            if !color.is_valid() {
                return Err(bad_color(color));
            }
        }
        DisplayKind::Rectangle {
            bbox,
            color,
            bg_color,
            ..
        } => {
            if bbox.width <= 0.0 || bbox.height <= 0.0 {
                return Err(OdeError::InvalidParameter(format!(
                    "rectangle '{}' must have positive dimensions",
                    name
                )));
            }
            if !color.is_valid() {
                return Err(bad_color(color));
            }
            if let Some(bg) = bg_color.as_ref().filter(|c| !c.is_valid()) {
                return Err(bad_color(bg));
            }
        }
    }
    Ok(())
}
