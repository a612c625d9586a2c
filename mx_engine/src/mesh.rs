use glam::DVec3;
use serde::Serialize;

/// Regular grid of cuboid cells, centred on the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Mesh {
    pub size: [usize; 3],
    #[serde(serialize_with = "serialize_dvec3")]
    pub cell: DVec3,
}

impl Default for Mesh {
    fn default() -> Self {
        Self {
            size: [32, 32, 1],
            cell: DVec3::splat(4e-9),
        }
    }
}

impl Mesh {
    pub fn new(size: [usize; 3], cell: DVec3) -> Self {
        Self { size, cell }
    }

    /// Total cell count, or `None` when it does not fit in `usize`.
    pub fn cells(&self) -> Option<usize> {
        self.size
            .iter()
            .try_fold(1usize, |total, &n| total.checked_mul(n))
    }

    pub fn world_size(&self) -> DVec3 {
        DVec3::new(
            self.size[0] as f64 * self.cell.x,
            self.size[1] as f64 * self.cell.y,
            self.size[2] as f64 * self.cell.z,
        )
    }

    /// Cell index in x-fastest order.
    pub fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (iz * self.size[1] + iy) * self.size[0] + ix
    }

    /// Position of a cell centre relative to the mesh centre.
    pub fn cell_center(&self, index: usize) -> DVec3 {
        let ix = index % self.size[0];
        let iy = (index / self.size[0]) % self.size[1];
        let iz = index / (self.size[0] * self.size[1]);
        let grid = DVec3::new(ix as f64, iy as f64, iz as f64);
        let half = DVec3::new(
            self.size[0] as f64,
            self.size[1] as f64,
            self.size[2] as f64,
        ) / 2.0;
        (grid + 0.5 - half) * self.cell
    }
}

pub(crate) fn serialize_dvec3<S>(value: &DVec3, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    value.to_array().serialize(serializer)
}
