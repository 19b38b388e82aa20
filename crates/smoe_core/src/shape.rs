//! Shape metadata for activations and saliency fields.

use serde::{Deserialize, Serialize};

/// Shape of a 4D activation tensor.
///
/// Follows the convolutional convention `(B, C, H, W)`:
/// - `B`: batch size
/// - `C`: channels
/// - `H`, `W`: spatial extent
///
/// # Example
///
/// ```rust
/// use smoe_core::ActivationShape;
///
/// let shape = ActivationShape::from([1, 64, 56, 56]);
/// assert_eq!(shape.channels(), 64);
/// assert_eq!(shape.spatial().as_array(), [56, 56]);
/// assert_eq!(shape.to_string(), "(B=1, C=64, H=56, W=56)");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivationShape {
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
}

impl ActivationShape {
    /// Create a new shape.
    #[must_use]
    pub const fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
        }
    }

    /// Batch size.
    #[must_use]
    pub const fn batch(&self) -> usize {
        self.batch
    }

    /// Channel count.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Spatial extent.
    #[must_use]
    pub const fn spatial(&self) -> MapSize {
        MapSize::new(self.height, self.width)
    }
}

impl std::fmt::Display for ActivationShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(B={}, C={}, H={}, W={})",
            self.batch, self.channels, self.height, self.width
        )
    }
}

impl From<[usize; 4]> for ActivationShape {
    fn from([batch, channels, height, width]: [usize; 4]) -> Self {
        Self::new(batch, channels, height, width)
    }
}

/// Spatial resolution `(H, W)` of a saliency map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapSize {
    /// Height in pixels.
    pub height: usize,
    /// Width in pixels.
    pub width: usize,
}

impl MapSize {
    /// Create a new map size.
    #[must_use]
    pub const fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Convert to an array.
    #[must_use]
    pub const fn as_array(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    /// Both sides are strictly positive.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.height > 0 && self.width > 0
    }
}

impl Default for MapSize {
    fn default() -> Self {
        Self::new(224, 224)
    }
}

impl std::fmt::Display for MapSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

impl From<[usize; 2]> for MapSize {
    fn from([height, width]: [usize; 2]) -> Self {
        Self::new(height, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_accessors() {
        let shape = ActivationShape::from([2, 8, 7, 5]);
        assert_eq!(shape.batch(), 2);
        assert_eq!(shape.channels(), 8);
        assert_eq!(shape.spatial(), MapSize::new(7, 5));
        assert_eq!(shape.to_string(), "(B=2, C=8, H=7, W=5)");
    }

    #[test]
    fn test_map_size_validity() {
        assert!(MapSize::new(4, 4).is_valid());
        assert!(!MapSize::new(0, 4).is_valid());
        assert_eq!(MapSize::default().as_array(), [224, 224]);
    }

    #[test]
    fn test_map_size_serialization() {
        let size = MapSize::new(32, 48);
        let json = serde_json::to_string(&size).unwrap();
        let restored: MapSize = serde_json::from_str(&json).unwrap();
        assert_eq!(size, restored);
    }
}
