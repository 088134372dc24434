//! # Connected Component Labelling
//!
//! Two-pass labelling of a [`BinaryMask`] with a union-find table resolving label
//! equivalences. Background is label 0 and is never reported as a component.
//! Final labels run `1..=n` in raster order of each component's first pixel.

use crate::mask::BinaryMask;
use crate::preprocessing::CropRegion;

/// Pixel adjacency used to decide which foreground pixels belong together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    /// Edge neighbours only
    Four,
    /// Edge and corner neighbours
    #[default]
    Eight,
}

/// A labelled foreground region.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedComponent {
    pub label: u32,
    /// Number of pixels in the region
    pub area: usize,
    /// Mean pixel position `(x, y)`
    pub centroid: (f64, f64),
    /// Tight bounding box in mask coordinates
    pub bbox: CropRegion,
}

/// Label image plus per-component statistics.
#[derive(Debug, Clone)]
pub struct ComponentLabeling {
    width: u32,
    height: u32,
    labels: Vec<u32>,
    pub components: Vec<ConnectedComponent>,
}

impl ComponentLabeling {
    /// Label at `(x, y)`; 0 for background or out-of-range coordinates.
    pub fn label_at(&self, x: u32, y: u32) -> u32 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.labels[y as usize * self.width as usize + x as usize]
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn component(&self, label: u32) -> Option<&ConnectedComponent> {
        if label == 0 {
            return None;
        }
        self.components.get(label as usize - 1)
    }

    /// Mask holding only the pixels of the given component.
    pub fn component_mask(&self, label: u32) -> BinaryMask {
        BinaryMask::from_fn(self.width, self.height, |x, y| {
            label != 0 && self.label_at(x, y) == label
        })
    }

    /// Builds a mask from every component accepted by `keep`.
    pub fn select(&self, keep: impl Fn(&ConnectedComponent) -> bool) -> BinaryMask {
        let kept: Vec<bool> = std::iter::once(false)
            .chain(self.components.iter().map(|c| keep(c)))
            .collect();
        BinaryMask::from_fn(self.width, self.height, |x, y| {
            kept[self.label_at(x, y) as usize]
        })
    }
}

/// Union-find table over provisional labels
struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new() -> Self {
        // Slot 0 is the background label
        Self {
            parent: vec![0],
            rank: vec![0],
        }
    }

    fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32;
        self.parent.push(label);
        self.rank.push(0);
        label
    }

    fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        // Path compression
        let mut current = x;
        while self.parent[current as usize] != root {
            let next = self.parent[current as usize];
            self.parent[current as usize] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, x: u32, y: u32) {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return;
        }
        match self.rank[root_x as usize].cmp(&self.rank[root_y as usize]) {
            std::cmp::Ordering::Less => self.parent[root_x as usize] = root_y,
            std::cmp::Ordering::Greater => self.parent[root_y as usize] = root_x,
            std::cmp::Ordering::Equal => {
                self.parent[root_y as usize] = root_x;
                self.rank[root_x as usize] += 1;
            }
        }
    }
}

/// Running statistics for one final label
struct ComponentStats {
    count: usize,
    sum_x: u64,
    sum_y: u64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl ComponentStats {
    fn new(x: u32, y: u32) -> Self {
        Self {
            count: 0,
            sum_x: 0,
            sum_y: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn add_pixel(&mut self, x: u32, y: u32) {
        self.count += 1;
        self.sum_x += x as u64;
        self.sum_y += y as u64;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    fn into_component(self, label: u32) -> ConnectedComponent {
        let n = self.count as f64;
        ConnectedComponent {
            label,
            area: self.count,
            centroid: (self.sum_x as f64 / n, self.sum_y as f64 / n),
            bbox: CropRegion::new(
                self.min_x,
                self.min_y,
                self.max_x - self.min_x + 1,
                self.max_y - self.min_y + 1,
            ),
        }
    }
}

/// Labels the foreground regions of `mask`.
///
/// # Examples
///
/// ```
/// use roll_inspector::components::{label_components, Connectivity};
/// use roll_inspector::mask::BinaryMask;
///
/// // Two pixels touching only at a corner
/// let mask = BinaryMask::from_fn(2, 2, |x, y| x == y);
/// assert_eq!(label_components(&mask, Connectivity::Eight).len(), 1);
/// assert_eq!(label_components(&mask, Connectivity::Four).len(), 2);
/// ```
pub fn label_components(mask: &BinaryMask, connectivity: Connectivity) -> ComponentLabeling {
    let (width, height) = mask.dimensions();
    let w = width as usize;
    let mut labels = vec![0u32; w * height as usize];
    let mut uf = UnionFind::new();

    // First pass: provisional labels and equivalences from already-visited neighbours
    for y in 0..height {
        for x in 0..width {
            if !mask.get(x, y) {
                continue;
            }
            let idx = y as usize * w + x as usize;

            let mut neighbours = [0u32; 4];
            let mut n = 0;
            let mut push = |label: u32| {
                if label != 0 {
                    neighbours[n] = label;
                    n += 1;
                }
            };
            if x > 0 {
                push(labels[idx - 1]);
            }
            if y > 0 {
                let above = idx - w;
                push(labels[above]);
                if connectivity == Connectivity::Eight {
                    if x > 0 {
                        push(labels[above - 1]);
                    }
                    if x + 1 < width {
                        push(labels[above + 1]);
                    }
                }
            }

            labels[idx] = match neighbours[..n].iter().min() {
                None => uf.make_set(),
                Some(&smallest) => {
                    for &other in &neighbours[..n] {
                        uf.union(smallest, other);
                    }
                    smallest
                }
            };
        }
    }

    // Second pass: resolve roots and renumber in raster order of first appearance
    let mut final_of_root = vec![0u32; uf.parent.len()];
    let mut stats: Vec<ComponentStats> = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let idx = y as usize * w + x as usize;
            if labels[idx] == 0 {
                continue;
            }
            let root = uf.find(labels[idx]) as usize;
            if final_of_root[root] == 0 {
                stats.push(ComponentStats::new(x, y));
                final_of_root[root] = stats.len() as u32;
            }
            let label = final_of_root[root];
            labels[idx] = label;
            stats[label as usize - 1].add_pixel(x, y);
        }
    }

    let components = stats
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.into_component(i as u32 + 1))
        .collect();

    ComponentLabeling {
        width,
        height,
        labels,
        components,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_rows(rows: &[&str]) -> BinaryMask {
        let height = rows.len() as u32;
        let width = rows.first().map(|r| r.len()).unwrap_or(0) as u32;
        BinaryMask::from_fn(width, height, |x, y| {
            rows[y as usize].as_bytes()[x as usize] == b'#'
        })
    }

    #[test]
    fn test_empty_mask_has_no_components() {
        let labeling = label_components(&BinaryMask::new(5, 5), Connectivity::Eight);
        assert!(labeling.is_empty());
        assert_eq!(labeling.label_at(2, 2), 0);
        assert!(labeling.component(0).is_none());
    }

    #[test]
    fn test_u_shape_merges_into_one_label() {
        // Both arms start with different provisional labels and meet at the bottom
        let mask = mask_from_rows(&[
            "#...#", //
            "#...#", //
            "#####",
        ]);
        let labeling = label_components(&mask, Connectivity::Four);
        assert_eq!(labeling.len(), 1);
        assert_eq!(labeling.components[0].area, 9);
        assert_eq!(labeling.label_at(4, 0), 1);
    }

    #[test]
    fn test_diagonal_connectivity() {
        let mask = mask_from_rows(&[
            "#..", //
            ".#.", //
            "..#",
        ]);
        assert_eq!(label_components(&mask, Connectivity::Eight).len(), 1);
        assert_eq!(label_components(&mask, Connectivity::Four).len(), 3);
    }

    #[test]
    fn test_anti_diagonal_uses_north_east_neighbour() {
        let mask = mask_from_rows(&[
            "..#", //
            ".#.", //
            "#..",
        ]);
        let labeling = label_components(&mask, Connectivity::Eight);
        assert_eq!(labeling.len(), 1);
        assert_eq!(labeling.components[0].area, 3);
    }

    #[test]
    fn test_labels_follow_raster_order_of_first_pixel() {
        let mask = mask_from_rows(&[
            "...##", //
            "#....", //
            "#..#.",
        ]);
        let labeling = label_components(&mask, Connectivity::Eight);
        assert_eq!(labeling.len(), 3);
        assert_eq!(labeling.label_at(3, 0), 1);
        assert_eq!(labeling.label_at(0, 1), 2);
        assert_eq!(labeling.label_at(3, 2), 3);
    }

    #[test]
    fn test_component_statistics() {
        let mask = mask_from_rows(&[
            ".....", //
            ".##..", //
            ".##..", //
            ".....",
        ]);
        let labeling = label_components(&mask, Connectivity::Eight);
        let component = labeling.component(1).expect("one component");
        assert_eq!(component.area, 4);
        assert_eq!(component.centroid, (1.5, 1.5));
        assert_eq!(component.bbox, CropRegion::new(1, 1, 2, 2));
    }

    #[test]
    fn test_component_mask_and_select() {
        let mask = mask_from_rows(&[
            "##..#", //
            "##...",
        ]);
        let labeling = label_components(&mask, Connectivity::Eight);
        assert_eq!(labeling.component_mask(2).count(), 1);
        assert!(labeling.component_mask(2).get(4, 0));

        let large = labeling.select(|c| c.area >= 2);
        assert_eq!(large.count(), 4);
        assert!(!large.get(4, 0));
    }

    #[test]
    fn test_zero_sized_mask() {
        let labeling = label_components(&BinaryMask::new(0, 7), Connectivity::Eight);
        assert!(labeling.is_empty());
    }
}
