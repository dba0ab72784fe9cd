use solvekit_scene::{Attribute, Marker, SceneQuery};

use crate::category::{categorise, AttrCategory};

/// A sub-problem: markers and the attributes that move them.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Category of the attributes in the block.
    pub category: AttrCategory,
    /// Node owning the attributes in the block.
    pub node: String,
    /// Markers affected by any of the block's attributes.
    pub markers: Vec<Marker>,
    /// Block attributes affecting at least one of the block's markers.
    pub attrs: Vec<Attribute>,
}

/// Attributes affecting at least one of the markers, in input order.
pub fn attrs_affecting(
    scene: &dyn SceneQuery,
    markers: &[Marker],
    attrs: &[Attribute],
) -> Vec<Attribute> {
    let matrix = scene.affects(markers, attrs);
    attrs
        .iter()
        .enumerate()
        .filter(|(j, _)| matrix.iter().any(|row| row.get(*j).copied().unwrap_or(false)))
        .map(|(_, attr)| attr.clone())
        .collect()
}

/// Split markers and attributes into one block per category and node.
///
/// Blocks are returned in category order, then node order. Blocks without
/// markers or attributes are skipped with a warning.
pub fn split_into_categories(
    scene: &dyn SceneQuery,
    markers: &[Marker],
    attrs: &[Attribute],
) -> Vec<Block> {
    let matrix = scene.affects(markers, attrs);
    let affects = |i: usize, j: usize| matrix.get(i).and_then(|r| r.get(j)).copied() == Some(true);

    let mut blocks = Vec::new();
    for (category, groups) in categorise(scene, attrs) {
        for (node, group) in groups {
            let columns: Vec<usize> = attrs
                .iter()
                .enumerate()
                .filter(|(_, attr)| group.contains(attr))
                .map(|(j, _)| j)
                .collect();

            let block_markers: Vec<Marker> = markers
                .iter()
                .enumerate()
                .filter(|(i, _)| columns.iter().any(|&j| affects(*i, j)))
                .map(|(_, m)| m.clone())
                .collect();
            let block_attrs: Vec<Attribute> = columns
                .iter()
                .filter(|&&j| (0..markers.len()).any(|i| affects(i, j)))
                .map(|&j| attrs[j].clone())
                .collect();

            if block_markers.is_empty() || block_attrs.is_empty() {
                log::warn!("No markers found affecting attributes; node={node}");
                continue;
            }
            blocks.push(Block {
                category,
                node,
                markers: block_markers,
                attrs: block_attrs,
            });
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use solvekit_scene::{Scene, SceneError};

    #[test]
    fn test_split_into_categories() -> Result<(), SceneError> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd1 = scene.add_bundle("bundle1")?;
        let bnd2 = scene.add_bundle("bundle2")?;
        scene.add_bundle("bundle3")?;
        let mkr1 = scene.add_marker("marker1", &cam, Some(&bnd1))?;
        let mkr2 = scene.add_marker("marker2", &cam, Some(&bnd2))?;
        let markers = vec![mkr1.clone(), mkr2.clone()];
        let attrs = vec![
            Attribute::new("bundle1", "translateX"),
            Attribute::new("bundle2", "translateX"),
            Attribute::new("bundle3", "translateX"),
            Attribute::new("camera1", "rotateY"),
        ];

        let blocks = split_into_categories(&scene, &markers, &attrs);
        // bundle3 moves no marker and is skipped
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].category, AttrCategory::BundleTransform);
        assert_eq!(blocks[0].markers, vec![mkr1]);
        assert_eq!(blocks[0].attrs, vec![attrs[0].clone()]);
        assert_eq!(blocks[1].markers, vec![mkr2]);
        assert_eq!(blocks[2].category, AttrCategory::CameraTransform);
        assert_eq!(blocks[2].markers, markers);

        let used = attrs_affecting(&scene, &markers, &attrs);
        assert_eq!(used.len(), 3);
        assert!(!used.contains(&attrs[2]));
        Ok(())
    }
}
