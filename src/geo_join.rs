//! Nearest-neighbor spatial join between two point sets.
//!
//! Distances are planar over raw `(lat, lon)` pairs. At metro scale the
//! distortion does not change which neighbor wins often enough to matter.

use std::fmt::Debug;

use rstar::primitives::GeomWithData;
use rstar::RTree;

/// A row that may carry a `(lat, lon)` location.
pub trait SpatialRow {
    fn lat_lon(&self) -> Option<(f64, f64)>;
}

/// A right-hand table whose rows can be copied onto left rows, column by column.
pub trait PayloadTable {
    type Row: SpatialRow;
    type Column: Copy + PartialEq + Debug;

    fn rows(&self) -> &[Self::Row];
    fn has_column(&self, column: Self::Column) -> bool;
}

/// A left-hand row that can receive selected columns of a matched right row.
pub trait Augment<R, C> {
    fn augment(&mut self, matched: &R, columns: &[C]);
}

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// R-tree over the located rows of a table; each point stores its row index.
pub struct NearestIndex {
    tree: RTree<IndexedPoint>,
}

impl NearestIndex {
    /// Rows without a location are left out of the index.
    pub fn build<R: SpatialRow>(rows: &[R]) -> Self {
        let points = rows
            .iter()
            .enumerate()
            .filter_map(|(idx, row)| {
                let (lat, lon) = row.lat_lon()?;
                Some(IndexedPoint::new([lat, lon], idx))
            })
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Row index of the closest point.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<usize> {
        self.tree.nearest_neighbor(&[lat, lon]).map(|p| p.data)
    }

    /// Row indices of the `k` closest points, closest first.
    pub fn k_nearest(&self, lat: f64, lon: f64, k: usize) -> Vec<usize> {
        self.tree
            .nearest_neighbor_iter(&[lat, lon])
            .take(k)
            .map(|p| p.data)
            .collect()
    }
}

/// Outcome of a nearest join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinReport<C> {
    pub matched: usize,
    /// left rows without coordinates, left untouched
    pub passed_through: usize,
    pub applied_columns: Vec<C>,
    pub skipped_columns: Vec<C>,
}

impl<C> JoinReport<C> {
    /// true when a requested column was missing or nothing could be written
    pub fn has_warning(&self) -> bool {
        !self.skipped_columns.is_empty() || self.applied_columns.is_empty()
    }
}

/// Copies `columns` from the nearest right row onto every located left row.
///
/// Every left row is kept. Rows without coordinates are not joined. Requested
/// columns absent from the right table are skipped with a warning, and when no
/// column is left the left rows are returned unchanged.
pub fn nearest_join<L, T>(left: &mut [L], right: &T, columns: &[T::Column]) -> JoinReport<T::Column>
where
    L: SpatialRow + Augment<T::Row, T::Column>,
    T: PayloadTable,
{
    let (applied_columns, skipped_columns): (Vec<_>, Vec<_>) =
        columns.iter().copied().partition(|c| right.has_column(*c));

    if !skipped_columns.is_empty() {
        log::warn!(
            "columns {:?} do not exist in the right table and will be skipped",
            skipped_columns
        );
    }

    let passed_through = left.iter().filter(|row| row.lat_lon().is_none()).count();
    let mut report = JoinReport {
        matched: 0,
        passed_through,
        applied_columns,
        skipped_columns,
    };

    if report.applied_columns.is_empty() {
        log::warn!("no available columns to write from the nearest join");
        return report;
    }

    let index = NearestIndex::build(right.rows());
    if index.is_empty() {
        log::warn!("right table has no located rows, nearest join skipped");
        return report;
    }

    for row in left.iter_mut() {
        let Some((lat, lon)) = row.lat_lon() else {
            continue;
        };
        if let Some(idx) = index.nearest(lat, lon) {
            row.augment(&right.rows()[idx], &report.applied_columns);
            report.matched += 1;
        }
    }

    log::info!(
        "nearest join matched {} rows, passed through {} rows without coordinates",
        report.matched,
        report.passed_through
    );
    report
}
