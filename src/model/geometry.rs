//! Coordinate primitives shared by every annotation shape.
//!
//! Three coordinate systems are in play:
//!
//! - **Normalized 2D** ([`Point2D`]): fractions of the image width/height in `[0, 1]`.
//! - **Voxel space** ([`VoxelPoint`]): integer indices `(i, j, k)` into a volume,
//!   along the first, second, and third (slice) axes of the stored array.
//! - **World space** ([`WorldPoint`]): physical millimetre coordinates obtained from
//!   voxel space through a [`VolumeGeometry`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Values this far outside `[0, 1]` are treated as float noise and clamped.
pub const NORM_TOLERANCE: f64 = 1e-6;

/// A point in normalized image-plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    /// Horizontal position as a fraction of image width.
    #[serde(rename = "xNorm")]
    pub xnorm: f64,
    /// Vertical position as a fraction of image height.
    #[serde(rename = "yNorm")]
    pub ynorm: f64,
}

impl Point2D {
    /// Create a new normalized point without validation.
    pub fn new(xnorm: f64, ynorm: f64) -> Self {
        Self { xnorm, ynorm }
    }

    /// Validate both coordinates, clamping values within [`NORM_TOLERANCE`].
    pub fn validated(self, field: &str) -> Result<Self, String> {
        Ok(Self {
            xnorm: check_norm(self.xnorm, &format!("{field}.xNorm"))?,
            ynorm: check_norm(self.ynorm, &format!("{field}.yNorm"))?,
        })
    }

    /// Convert to pixel coordinates for an image of the given size.
    pub fn to_pixels(self, width: usize, height: usize) -> (f64, f64) {
        (self.xnorm * width as f64, self.ynorm * height as f64)
    }

    /// Convert pixel coordinates to a normalized point, clamped to the image.
    pub fn from_pixels(x: f64, y: f64, width: usize, height: usize) -> Self {
        Self {
            xnorm: (x / width as f64).clamp(0.0, 1.0),
            ynorm: (y / height as f64).clamp(0.0, 1.0),
        }
    }
}

/// Check that a normalized value lies in `[0, 1]`.
pub(crate) fn check_norm(value: f64, field: &str) -> Result<f64, String> {
    if !value.is_finite() {
        return Err(format!("{field} is not a finite number"));
    }
    if value < -NORM_TOLERANCE || value > 1.0 + NORM_TOLERANCE {
        return Err(format!("{field} = {value} is outside [0, 1]"));
    }
    Ok(value.clamp(0.0, 1.0))
}

/// Check that a value is finite and non-negative.
pub(crate) fn check_non_negative(value: f64, field: &str) -> Result<f64, String> {
    if !value.is_finite() {
        return Err(format!("{field} is not a finite number"));
    }
    if value < 0.0 {
        return Err(format!("{field} = {value} is negative"));
    }
    Ok(value)
}

/// Integer indices into a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoxelPoint {
    /// Index along the first array axis.
    pub i: u32,
    /// Index along the second array axis.
    pub j: u32,
    /// Slice index.
    pub k: u32,
}

impl VoxelPoint {
    /// Create a new voxel point.
    pub fn new(i: u32, j: u32, k: u32) -> Self {
        Self { i, j, k }
    }

    /// Whether the point lies inside a volume of the given dimensions.
    pub fn within(&self, dims: Dimensions) -> bool {
        (self.i as usize) < dims.width
            && (self.j as usize) < dims.height
            && (self.k as usize) < dims.depth
    }
}

/// Physical coordinates of a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    /// Physical x.
    pub x: f64,
    /// Physical y.
    pub y: f64,
    /// Physical z.
    pub z: f64,
}

impl WorldPoint {
    /// Create a new world point.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Vector from `self` to `other`.
    pub fn to(&self, other: &WorldPoint) -> [f64; 3] {
        [other.x - self.x, other.y - self.y, other.z - self.z]
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &WorldPoint) -> f64 {
        norm(self.to(other))
    }
}

/// Size of an image or volume in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Extent along the first axis (image columns).
    pub width: usize,
    /// Extent along the second axis (image rows).
    pub height: usize,
    /// Number of slices or frames; 1 for a single image.
    pub depth: usize,
}

impl Dimensions {
    /// Dimensions of a single 2D image.
    pub fn image(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    /// Dimensions of a volume.
    pub fn volume(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Shape tuple in array axis order.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }

    /// Total number of voxels.
    pub fn len(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Whether any extent is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this describes a single 2D plane.
    pub fn is_planar(&self) -> bool {
        self.depth == 1
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Mapping from voxel indices to world coordinates.
///
/// `world = origin + direction * (spacing ⊙ ijk)`, where column `c` of
/// `direction` is the unit vector of array axis `c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    /// World position of voxel (0, 0, 0).
    pub origin: [f64; 3],
    /// Distance between voxel centres along each array axis.
    pub spacing: [f64; 3],
    /// Row-major 3x3 direction cosine matrix.
    pub direction: [[f64; 3]; 3],
}

impl VolumeGeometry {
    /// Identity geometry: unit spacing, axis-aligned, origin at zero.
    pub const IDENTITY: Self = Self {
        origin: [0.0; 3],
        spacing: [1.0; 3],
        direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    /// Create a geometry from its parts.
    pub fn new(origin: [f64; 3], spacing: [f64; 3], direction: [[f64; 3]; 3]) -> Self {
        Self {
            origin,
            spacing,
            direction,
        }
    }

    /// Build a geometry from the first three rows of a 4x4 affine.
    ///
    /// Column norms become the spacing; a zero column keeps unit spacing and
    /// the identity direction for that axis.
    pub fn from_affine(rows: [[f64; 4]; 3]) -> Self {
        let mut spacing = [1.0; 3];
        let mut direction = Self::IDENTITY.direction;
        for c in 0..3 {
            let column = [rows[0][c], rows[1][c], rows[2][c]];
            let length = norm(column);
            if length > f64::EPSILON {
                spacing[c] = length;
                for r in 0..3 {
                    direction[r][c] = column[r] / length;
                }
            }
        }
        Self {
            origin: [rows[0][3], rows[1][3], rows[2][3]],
            spacing,
            direction,
        }
    }

    /// Map a voxel to world coordinates.
    pub fn to_world(&self, voxel: &VoxelPoint) -> WorldPoint {
        let scaled = [
            f64::from(voxel.i) * self.spacing[0],
            f64::from(voxel.j) * self.spacing[1],
            f64::from(voxel.k) * self.spacing[2],
        ];
        let mut out = self.origin;
        for (r, value) in out.iter_mut().enumerate() {
            *value += (0..3).map(|c| self.direction[r][c] * scaled[c]).sum::<f64>();
        }
        WorldPoint::new(out[0], out[1], out[2])
    }

    /// Unit normal of the slice plane (the third axis direction).
    pub fn slice_normal(&self) -> [f64; 3] {
        normalize([
            self.direction[0][2],
            self.direction[1][2],
            self.direction[2][2],
        ])
        .unwrap_or([0.0, 0.0, 1.0])
    }
}

impl Default for VolumeGeometry {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Euclidean length of a vector.
pub(crate) fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Unit vector in the direction of `v`, or `None` for a zero vector.
pub(crate) fn normalize(v: [f64; 3]) -> Option<[f64; 3]> {
    let length = norm(v);
    (length > f64::EPSILON).then(|| [v[0] / length, v[1] / length, v[2] / length])
}

pub(crate) fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_norm_clamps_noise() {
        assert_eq!(check_norm(1.0 + 1e-9, "x").unwrap(), 1.0);
        assert_eq!(check_norm(-1e-9, "x").unwrap(), 0.0);
        assert!(check_norm(1.1, "x").is_err());
        assert!(check_norm(f64::NAN, "x").is_err());
    }

    #[test]
    fn test_point_pixels() {
        let p = Point2D::new(0.25, 0.5);
        assert_eq!(p.to_pixels(1000, 800), (250.0, 400.0));
        assert_eq!(Point2D::from_pixels(1200.0, 400.0, 1000, 800), Point2D::new(1.0, 0.5));
    }

    #[test]
    fn test_identity_geometry() {
        let geometry = VolumeGeometry::IDENTITY;
        let world = geometry.to_world(&VoxelPoint::new(1, 2, 3));
        assert_eq!(world, WorldPoint::new(1.0, 2.0, 3.0));
        assert_eq!(geometry.slice_normal(), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_affine_decomposition() {
        // Flipped x axis, 0.5mm in-plane, 2mm slices, shifted origin.
        let geometry = VolumeGeometry::from_affine([
            [-0.5, 0.0, 0.0, 10.0],
            [0.0, 0.5, 0.0, -5.0],
            [0.0, 0.0, 2.0, 100.0],
        ]);
        assert_eq!(geometry.spacing, [0.5, 0.5, 2.0]);
        assert_eq!(geometry.direction[0][0], -1.0);

        let world = geometry.to_world(&VoxelPoint::new(4, 2, 1));
        assert!((world.x - 8.0).abs() < 1e-12);
        assert!((world.y - -4.0).abs() < 1e-12);
        assert!((world.z - 102.0).abs() < 1e-12);
    }

    #[test]
    fn test_voxel_within() {
        let dims = Dimensions::volume(4, 4, 2);
        assert!(VoxelPoint::new(3, 3, 1).within(dims));
        assert!(!VoxelPoint::new(3, 3, 2).within(dims));
    }
}
