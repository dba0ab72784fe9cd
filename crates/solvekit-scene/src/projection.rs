/// Evaluated camera state at a single frame.
///
/// The camera looks down its local `-Z` axis with `+Y` up. Image coordinates
/// are normalised film coordinates, `[-0.5, 0.5]` across the film back.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    /// Camera centre in world space.
    pub position: [f64; 3],
    /// Rotation from camera to world space.
    pub world_r_cam: [[f64; 3]; 3],
    /// Focal length in millimetres.
    pub focal_length: f64,
    /// Horizontal film aperture in millimetres.
    pub film_width: f64,
    /// Vertical film aperture in millimetres.
    pub film_height: f64,
}

/// Compute the rotation matrix for XYZ euler angles in degrees.
///
/// The X rotation is applied first, then Y, then Z.
///
/// # Arguments
///
/// * `rotate` - The rotation angles around X, Y and Z, in degrees.
///
/// # Returns
///
/// The rotation matrix `Rz * Ry * Rx`.
///
/// Example:
///
/// ```
/// use solvekit_scene::projection::euler_xyz_to_rotation_matrix;
///
/// let rotation = euler_xyz_to_rotation_matrix(&[0.0, 0.0, 0.0]);
/// assert_eq!(rotation, [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
/// ```
pub fn euler_xyz_to_rotation_matrix(rotate: &[f64; 3]) -> [[f64; 3]; 3] {
    let (sx, cx) = rotate[0].to_radians().sin_cos();
    let (sy, cy) = rotate[1].to_radians().sin_cos();
    let (sz, cz) = rotate[2].to_radians().sin_cos();

    [
        [cy * cz, sx * sy * cz - cx * sz, cx * sy * cz + sx * sz],
        [cy * sz, sx * sy * sz + cx * cz, cx * sy * sz - sx * cz],
        [-sy, sx * cy, cx * cy],
    ]
}

impl CameraPose {
    /// Create a camera pose from translate/rotate values and the film back.
    ///
    /// # Arguments
    ///
    /// * `translate` - Camera centre in world space.
    /// * `rotate` - XYZ euler rotation in degrees.
    /// * `focal_length` - Focal length in millimetres.
    /// * `film_width` - Horizontal film aperture in millimetres.
    /// * `film_height` - Vertical film aperture in millimetres.
    pub fn new(
        translate: [f64; 3],
        rotate: [f64; 3],
        focal_length: f64,
        film_width: f64,
        film_height: f64,
    ) -> Self {
        Self {
            position: translate,
            world_r_cam: euler_xyz_to_rotation_matrix(&rotate),
            focal_length,
            film_width,
            film_height,
        }
    }

    /// Transform a world-space point into camera space.
    pub fn world_to_camera(&self, point: &[f64; 3]) -> [f64; 3] {
        let d = [
            point[0] - self.position[0],
            point[1] - self.position[1],
            point[2] - self.position[2],
        ];
        let r = &self.world_r_cam;
        // R^T * d
        [
            r[0][0] * d[0] + r[1][0] * d[1] + r[2][0] * d[2],
            r[0][1] * d[0] + r[1][1] * d[1] + r[2][1] * d[2],
            r[0][2] * d[0] + r[1][2] * d[1] + r[2][2] * d[2],
        ]
    }

    /// Project a world-space point into normalised film coordinates.
    ///
    /// Returns `None` when the point is on or behind the image plane.
    pub fn project(&self, point: &[f64; 3]) -> Option<[f64; 2]> {
        let p = self.world_to_camera(point);
        let depth = -p[2];
        if depth <= f64::EPSILON || self.film_width <= 0.0 || self.film_height <= 0.0 {
            return None;
        }
        Some([
            self.focal_length * p[0] / (depth * self.film_width),
            self.focal_length * p[1] / (depth * self.film_height),
        ])
    }

    /// World-space unit direction of the ray through a film coordinate.
    pub fn ray_direction(&self, image: &[f64; 2]) -> [f64; 3] {
        let local = [
            image[0] * self.film_width / self.focal_length,
            image[1] * self.film_height / self.focal_length,
            -1.0,
        ];
        let r = &self.world_r_cam;
        let d = [
            r[0][0] * local[0] + r[0][1] * local[1] + r[0][2] * local[2],
            r[1][0] * local[0] + r[1][1] * local[1] + r[1][2] * local[2],
            r[2][0] * local[0] + r[2][1] * local[1] + r[2][2] * local[2],
        ];
        let norm = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        [d[0] / norm, d[1] / norm, d[2] / norm]
    }
}
