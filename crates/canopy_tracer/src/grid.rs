//! Uniform voxel grid over the simulated domain.
//!
//! Each cell lists the primitives whose (slightly inflated) bounding box
//! touches it. The lists live in one shared index arena addressed by
//! per-cell start offsets, and are rebuilt from scratch every step.

use canopy_core::{grid_cell_count, Primitive, MAX_GRID_CELLS};
use canopy_math::{Aabb, IVec3, UVec3, Vec3};

/// Amount bounding boxes are grown by before they are binned, so primitives
/// lying exactly on a cell face are listed on both sides.
pub const GRID_EPSILON: f32 = 1e-4;

/// Voxel grid with compressed cell lists.
#[derive(Debug, Clone)]
pub struct Grid {
    origin: Vec3,
    size: Vec3,
    resolution: UVec3,
    cell_size: Vec3,
    /// `cell_start[c]..cell_start[c + 1]` indexes `refs` for cell `c`
    cell_start: Vec<u32>,
    refs: Vec<u32>,
}

impl Grid {
    /// Create an empty grid spanning `origin .. origin + size`.
    ///
    /// Resolution components below 1 are raised to 1. A resolution with more
    /// than [`MAX_GRID_CELLS`] cells falls back to a single cell.
    pub fn new(origin: Vec3, size: Vec3, resolution: UVec3) -> Self {
        let mut resolution = resolution.max(UVec3::ONE);
        let cell_count = match grid_cell_count(resolution) {
            Some(n) if n <= MAX_GRID_CELLS => n,
            _ => {
                log::error!(
                    "grid resolution {}x{}x{} exceeds {} cells; using a single cell",
                    resolution.x,
                    resolution.y,
                    resolution.z,
                    MAX_GRID_CELLS
                );
                resolution = UVec3::ONE;
                1
            }
        };
        Self {
            origin,
            size,
            resolution,
            cell_size: size / resolution.as_vec3(),
            cell_start: vec![0; cell_count + 1],
            refs: Vec::new(),
        }
    }

    /// Rebuild all cell lists from `primitives`.
    ///
    /// Primitives entirely outside the grid are not listed anywhere.
    pub fn build(&mut self, primitives: &[Primitive]) {
        let cell_count = self.cell_count();
        let bounds = self.bounds();
        let ranges: Vec<Option<(IVec3, IVec3)>> = primitives
            .iter()
            .map(|p| {
                let bbox = p.bbox.inflate(GRID_EPSILON);
                if !bbox.overlaps(&bounds) {
                    return None;
                }
                Some((self.clamped_cell(bbox.min()), self.clamped_cell(bbox.max())))
            })
            .collect();

        // Pass 1: count references per cell
        let mut counts = vec![0u32; cell_count];
        for (lo, hi) in ranges.iter().flatten() {
            self.for_each_cell(*lo, *hi, |c| counts[c] += 1);
        }

        self.cell_start.clear();
        self.cell_start.reserve(cell_count + 1);
        let mut total = 0u32;
        self.cell_start.push(0);
        for count in &counts {
            total += count;
            self.cell_start.push(total);
        }

        // Pass 2: fill the arena
        self.refs.clear();
        self.refs.resize(total as usize, 0);
        let mut cursor: Vec<u32> = self.cell_start[..cell_count].to_vec();
        let mut outside = 0usize;
        for (index, range) in ranges.iter().enumerate() {
            let Some((lo, hi)) = range else {
                outside += 1;
                continue;
            };
            let refs = &mut self.refs;
            Self::visit_range(self.resolution, *lo, *hi, |c| {
                refs[cursor[c] as usize] = index as u32;
                cursor[c] += 1;
            });
        }

        if outside > 0 {
            log::debug!("{} primitives lie outside the grid and were not binned", outside);
        }
        log::debug!(
            "grid {}x{}x{} built: {} primitives, {} cell references",
            self.resolution.x,
            self.resolution.y,
            self.resolution.z,
            primitives.len() - outside,
            self.refs.len()
        );
    }

    fn for_each_cell<F: FnMut(usize)>(&self, lo: IVec3, hi: IVec3, f: F) {
        Self::visit_range(self.resolution, lo, hi, f);
    }

    fn visit_range<F: FnMut(usize)>(resolution: UVec3, lo: IVec3, hi: IVec3, mut f: F) {
        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    f(Self::linear_index(resolution, IVec3::new(x, y, z)));
                }
            }
        }
    }

    #[inline]
    fn linear_index(resolution: UVec3, cell: IVec3) -> usize {
        let r = resolution.as_ivec3();
        (cell.x + r.x * (cell.y + r.y * cell.z)) as usize
    }

    /// Cell containing `p`, with out-of-range coordinates clamped to the grid.
    pub fn clamped_cell(&self, p: Vec3) -> IVec3 {
        let rel = ((p - self.origin) / self.cell_size).floor();
        let max = self.resolution.as_ivec3() - IVec3::ONE;
        // Saturating float-to-int cast, then clamp
        IVec3::new(rel.x as i32, rel.y as i32, rel.z as i32).clamp(IVec3::ZERO, max)
    }

    /// Cell containing `p`, or `None` outside the grid.
    pub fn cell_of(&self, p: Vec3) -> Option<IVec3> {
        if !self.bounds().contains(p) {
            return None;
        }
        Some(self.clamped_cell(p))
    }

    /// Whether `cell` lies within the grid.
    #[inline]
    pub fn in_range(&self, cell: IVec3) -> bool {
        cell.cmpge(IVec3::ZERO).all() && cell.cmplt(self.resolution.as_ivec3()).all()
    }

    /// Primitive indices listed in `cell`. Out-of-range cells are empty.
    pub fn cell(&self, cell: IVec3) -> &[u32] {
        if !self.in_range(cell) {
            return &[];
        }
        let c = Self::linear_index(self.resolution, cell);
        match (self.cell_start.get(c), self.cell_start.get(c + 1)) {
            (Some(&start), Some(&end)) => &self.refs[start as usize..end as usize],
            _ => &[],
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.origin, self.origin + self.size)
    }

    /// Length of the grid's diagonal.
    pub fn diagonal(&self) -> f32 {
        self.size.length()
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn resolution(&self) -> UVec3 {
        self.resolution
    }

    pub fn cell_size(&self) -> Vec3 {
        self.cell_size
    }

    pub fn cell_count(&self) -> usize {
        self.cell_start.len() - 1
    }

    /// Total number of cell references held by the arena.
    pub fn reference_count(&self) -> usize {
        self.refs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{PrimitiveStore, ShapeParams};
    use canopy_math::Mat4;

    fn unit_grid(res: u32) -> Grid {
        Grid::new(Vec3::splat(-1.0), Vec3::splat(2.0), UVec3::splat(res))
    }

    #[test]
    fn test_default_resolution_single_cell() {
        let grid = Grid::new(Vec3::ZERO, Vec3::ONE, UVec3::ZERO);
        assert_eq!(grid.resolution(), UVec3::ONE);
        assert_eq!(grid.cell_count(), 1);
        assert_eq!(grid.cell_size(), Vec3::ONE);
    }

    #[test]
    fn test_oversized_resolution_falls_back_to_one_cell() {
        let grid = Grid::new(Vec3::ZERO, Vec3::ONE, UVec3::new(2048, 2048, 1024));
        assert_eq!(grid.resolution(), UVec3::ONE);
        assert_eq!(grid.cell_count(), 1);

        let grid = Grid::new(Vec3::ZERO, Vec3::ONE, UVec3::new(u32::MAX, u32::MAX, 2));
        assert_eq!(grid.cell_count(), 1);
    }

    #[test]
    fn test_cell_of() {
        let grid = unit_grid(10);
        assert_eq!(grid.cell_of(Vec3::ZERO), Some(IVec3::splat(5)));
        assert_eq!(grid.cell_of(Vec3::splat(-1.0)), Some(IVec3::ZERO));
        // The far face belongs to the last cell
        assert_eq!(grid.cell_of(Vec3::splat(1.0)), Some(IVec3::splat(9)));
        assert_eq!(grid.cell_of(Vec3::new(0.0, 1.5, 0.0)), None);
    }

    #[test]
    fn test_build_lists_small_sphere_in_its_cells() {
        let mut store = PrimitiveStore::new();
        let m = Mat4::from_translation(Vec3::new(0.05, 0.05, 0.05));
        store.add(ShapeParams::Sphere { radius: 0.02 }, &m, [0, 1], None).unwrap();

        let mut grid = unit_grid(10);
        grid.build(store.as_slice());

        assert_eq!(grid.cell(IVec3::new(5, 5, 5)), &[0]);
        assert!(grid.cell(IVec3::new(4, 5, 5)).is_empty());
        assert_eq!(grid.reference_count(), 1);
    }

    #[test]
    fn test_primitive_on_cell_face_listed_on_both_sides() {
        let mut store = PrimitiveStore::new();
        store
            .add(
                ShapeParams::Triangle([
                    Vec3::new(0.01, 0.0, 0.01),
                    Vec3::new(0.01, 0.0, 0.09),
                    Vec3::new(0.09, 0.0, 0.09),
                ]),
                &Mat4::IDENTITY,
                [0, 1],
                None,
            )
            .unwrap();
        let mut grid = unit_grid(10);
        grid.build(store.as_slice());

        // y = 0 is the face between cell rows 4 and 5
        assert_eq!(grid.cell(IVec3::new(5, 4, 5)), &[0]);
        assert_eq!(grid.cell(IVec3::new(5, 5, 5)), &[0]);
    }

    #[test]
    fn test_outside_primitives_skipped_and_rebuild_clears() {
        let mut store = PrimitiveStore::new();
        let far = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        store.add(ShapeParams::Sphere { radius: 0.5 }, &far, [0, 1], None).unwrap();
        store
            .add(ShapeParams::Sphere { radius: 3.0 }, &Mat4::IDENTITY, [0, 1], None)
            .unwrap();

        let mut grid = unit_grid(2);
        grid.build(store.as_slice());
        assert_eq!(grid.reference_count(), 8);
        assert!((0..2).all(|x| grid.cell(IVec3::new(x, 0, 0)) == [1]));

        grid.build(&[]);
        assert_eq!(grid.reference_count(), 0);
        assert!(grid.cell(IVec3::ZERO).is_empty());
    }

    #[test]
    fn test_out_of_range_cell_is_empty() {
        let grid = unit_grid(2);
        assert!(grid.cell(IVec3::new(-1, 0, 0)).is_empty());
        assert!(grid.cell(IVec3::new(0, 2, 0)).is_empty());
    }
}
