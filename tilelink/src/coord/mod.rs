//! Tile coordinate codec
//!
//! Provides the `TileCoord` value type and the conversions between a
//! coordinate and the opaque identifier string the viewer carries around
//! (`tilelink://tile/<level>/<x>/<y>`). Identifiers outside that pattern
//! are rejected.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// URL scheme prefix for tile identifiers.
pub const IDENTIFIER_SCHEME: &str = "tilelink://tile";

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^tilelink://tile/(\d+)/(\d+)/(\d+)$").expect("identifier regex is valid")
    })
}

/// Errors that can occur when parsing a tile identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// Identifier does not match the `tilelink://tile/<level>/<x>/<y>` pattern.
    #[error("Invalid tile identifier: {0}")]
    InvalidIdentifier(String),
    /// A coordinate component overflowed its integer range.
    #[error("Tile coordinate component out of range in: {0}")]
    ComponentOutOfRange(String),
}

/// A tile coordinate in the viewer's pyramid.
///
/// `level` is the pyramid level (0 = most zoomed out), `x`/`y` are the
/// column/row within that level. Immutable value type; derived from and
/// encoded to an opaque identifier string via [`tile_url`] and
/// [`parse_identifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Pyramid level
    pub level: u32,
    /// Tile column within the level
    pub x: u32,
    /// Tile row within the level
    pub y: u32,
}

impl TileCoord {
    /// Create a new tile coordinate.
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}

/// Encode a tile coordinate as an opaque identifier string.
///
/// The result is stable and round-trips through [`parse_identifier`].
pub fn tile_url(level: u32, x: u32, y: u32) -> String {
    format!("{}/{}/{}/{}", IDENTIFIER_SCHEME, level, x, y)
}

/// Decode a tile identifier back into a coordinate.
///
/// # Errors
///
/// Returns [`CoordError::InvalidIdentifier`] when the string does not match
/// the documented pattern, or [`CoordError::ComponentOutOfRange`] when a
/// component does not fit in a `u32`.
pub fn parse_identifier(identifier: &str) -> Result<TileCoord, CoordError> {
    let captures = identifier_pattern()
        .captures(identifier)
        .ok_or_else(|| CoordError::InvalidIdentifier(identifier.to_string()))?;

    let component = |index: usize| -> Result<u32, CoordError> {
        captures[index]
            .parse::<u32>()
            .map_err(|_| CoordError::ComponentOutOfRange(identifier.to_string()))
    };

    Ok(TileCoord {
        level: component(1)?,
        x: component(2)?,
        y: component(3)?,
    })
}
