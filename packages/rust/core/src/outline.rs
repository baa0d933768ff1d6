//! Page layout and bookmark planning for the merged document.
//!
//! Walks the manifest in canonical order, keeps only positions with a usable
//! artifact, and assigns each kept resource its first page. Unit nodes point
//! at the first page of their first kept resource; units with nothing kept
//! are omitted.

use coursepack_shared::Manifest;
use serde::Serialize;
use tracing::{debug, instrument};

/// One bookmark. The merged document's outline is exactly two levels deep:
/// units at the top, resources beneath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutlineNode {
    pub title: String,
    /// 0-based target page.
    pub page: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn leaf(title: impl Into<String>, page: usize) -> Self {
        Self {
            title: title.into(),
            page,
            children: Vec::new(),
        }
    }
}

/// A resource's slot in the merged document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedPart {
    /// Canonical manifest position.
    pub position: usize,
    pub first_page: usize,
    pub page_count: usize,
}

/// Outline plus the merge order it was computed for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    pub outline: Vec<OutlineNode>,
    pub parts: Vec<PlacedPart>,
    pub total_pages: usize,
}

impl Layout {
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Compute the layout. `page_count(position)` returns the page count of the
/// usable artifact at that position, or `None` if it is to be skipped.
#[instrument(skip_all, fields(units = manifest.unit_count(), resources = manifest.resource_count()))]
pub fn plan_layout<F>(manifest: &Manifest, mut page_count: F) -> Layout
where
    F: FnMut(usize) -> Option<usize>,
{
    let mut layout = Layout::default();
    let mut page_offset = 0;

    for (unit, start) in manifest.unit_spans() {
        let mut unit_node: Option<OutlineNode> = None;

        for (i, resource) in unit.resources.iter().enumerate() {
            let position = start + i;
            let Some(pages) = page_count(position).filter(|&n| n > 0) else {
                continue;
            };

            let node = unit_node.get_or_insert_with(|| OutlineNode {
                title: unit.name.clone(),
                page: page_offset,
                children: Vec::new(),
            });
            node.children.push(OutlineNode::leaf(&resource.text, page_offset));

            layout.parts.push(PlacedPart {
                position,
                first_page: page_offset,
                page_count: pages,
            });
            page_offset += pages;
        }

        match unit_node {
            Some(node) => layout.outline.push(node),
            None => debug!(unit = %unit.name, "no usable artifacts; unit omitted from outline"),
        }
    }

    layout.total_pages = page_offset;
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursepack_shared::{Resource, ResourceType, Unit};

    fn manifest() -> Manifest {
        Manifest::from_units(
            "fisica",
            vec![
                Unit {
                    name: "U1".into(),
                    resources: vec![
                        Resource::new("U1", "r1", "https://e.org/1", ResourceType::Pdf),
                        Resource::new("U1", "r2", "https://e.org/2", ResourceType::ScormHtml),
                    ],
                },
                Unit {
                    name: "U2".into(),
                    resources: vec![
                        Resource::new("U2", "r1", "https://e.org/3", ResourceType::ScormZip),
                        Resource::new("U2", "r2", "https://e.org/4", ResourceType::AgregaHtml),
                    ],
                },
            ],
        )
    }

    #[test]
    fn targets_follow_cumulative_page_counts() {
        let counts = [3, 2, 4, 1];
        let layout = plan_layout(&manifest(), |p| Some(counts[p]));

        assert_eq!(layout.total_pages, 10);
        assert_eq!(
            layout.outline,
            vec![
                OutlineNode {
                    title: "U1".into(),
                    page: 0,
                    children: vec![OutlineNode::leaf("r1", 0), OutlineNode::leaf("r2", 3)],
                },
                OutlineNode {
                    title: "U2".into(),
                    page: 5,
                    children: vec![OutlineNode::leaf("r1", 5), OutlineNode::leaf("r2", 9)],
                },
            ]
        );
        let positions: Vec<usize> = layout.parts.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn skipped_position_shifts_later_targets() {
        let layout = plan_layout(&manifest(), |p| (p != 1).then_some(2));

        assert_eq!(layout.outline[0].children, vec![OutlineNode::leaf("r1", 0)]);
        assert_eq!(layout.outline[1].page, 2);
        assert_eq!(layout.outline[1].children[1].page, 4);
        assert_eq!(layout.total_pages, 6);
    }

    #[test]
    fn unit_without_artifacts_is_omitted() {
        let layout = plan_layout(&manifest(), |p| (p >= 2).then_some(1));

        assert_eq!(layout.outline.len(), 1);
        assert_eq!(layout.outline[0].title, "U2");
        assert_eq!(layout.outline[0].page, 0);
    }

    #[test]
    fn zero_page_artifacts_are_skipped() {
        let layout = plan_layout(&manifest(), |p| Some(if p == 0 { 0 } else { 1 }));
        assert_eq!(layout.parts.first().map(|p| p.position), Some(1));
        assert_eq!(layout.outline[0].page, 0);
    }

    #[test]
    fn nothing_usable_gives_empty_layout() {
        let layout = plan_layout(&manifest(), |_| None);
        assert!(layout.is_empty());
        assert!(layout.outline.is_empty());
        assert_eq!(layout.total_pages, 0);
    }
}
