//! Five-point face alignment.
//!
//! Fits a similarity transform (uniform scale, rotation, translation) from
//! detected landmarks to the canonical ArcFace landmark layout, then warps
//! the face into a 112×112 crop.

pub const ALIGNED_SIZE: usize = 112;

/// Canonical landmark positions in a 112×112 ArcFace crop:
/// left eye, right eye, nose tip, left mouth corner, right mouth corner.
pub const ARCFACE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `x' = a·x − b·y + tx`, `y' = b·x + a·y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares similarity mapping `src` onto `dst`.
    ///
    /// Returns `None` when the source points are (numerically) all the same point.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (sx0, sy0) = centroid(src);
        let (dx0, dy0) = centroid(dst);

        let mut spread = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - sx0, sy - sy0);
            let (dx, dy) = (dx - dx0, dy - dy0);
            spread += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }
        if spread < 1e-6 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: dx0 - (a * sx0 - b * sy0),
            ty: dy0 - (b * sx0 + a * sy0),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Bilinear sample of a grayscale frame; outside the frame reads as black.
fn sample(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let at = |px: f32, py: f32| -> f32 {
        if px < 0.0 || py < 0.0 || px >= width as f32 || py >= height as f32 {
            0.0
        } else {
            frame[py as usize * width + px as usize] as f32
        }
    };

    let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1.0, y0) * fx;
    let bottom = at(x0, y0 + 1.0) * (1.0 - fx) + at(x0 + 1.0, y0 + 1.0) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Warp the face described by `landmarks` into an aligned 112×112 crop.
///
/// Returns `None` for degenerate landmarks.
pub fn align_face(
    frame: &[u8],
    width: u32,
    height: u32,
    landmarks: &[(f32, f32); 5],
) -> Option<Vec<u8>> {
    let (w, h) = (width as usize, height as usize);
    if frame.len() < w * h {
        return None;
    }
    let to_source = Similarity::estimate(landmarks, &ARCFACE_LANDMARKS)?.inverse()?;

    let mut aligned = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let (sx, sy) = to_source.apply((ox as f32, oy as f32));
            aligned[oy * ALIGNED_SIZE + ox] = sample(frame, w, h, sx, sy).round().clamp(0.0, 255.0) as u8;
        }
    }
    Some(aligned)
}
