// Scene-graph collaborator types
//
// Asset parsing lives outside the renderer; whatever produces it hands
// over this node tree. The renderer only flattens it into load order.

use bytemuck::{Pod, Zeroable};

/// One vertex as the scene collaborator delivers it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub colour: [f32; 3],
}

impl Vertex {
    pub fn new(position: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            uv,
            // White when the source has no per-vertex colour.
            colour: [1.0, 1.0, 1.0],
        }
    }
}

/// One renderable payload: triangulated geometry plus a material slot.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material_index: usize,
}

/// A node in the hierarchical scene: zero or more mesh payloads, zero or
/// more children.
#[derive(Debug, Clone, Default)]
pub struct SceneNode {
    pub meshes: Vec<MeshData>,
    pub children: Vec<SceneNode>,
}

/// Flatten the tree depth-first into load order: a node's own meshes
/// first, then each child subtree in declared order.
///
/// Uses an explicit work stack rather than recursion so the traversal
/// order is one tested contract instead of an accident of list
/// concatenation.
pub fn flatten(root: &SceneNode) -> Vec<&MeshData> {
    let mut ordered = Vec::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        ordered.extend(node.meshes.iter());
        // Children pushed in reverse so the first child is popped first.
        stack.extend(node.children.iter().rev());
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(material_index: usize) -> MeshData {
        MeshData {
            material_index,
            ..Default::default()
        }
    }

    #[test]
    fn parent_meshes_come_before_child_subtrees() {
        let root = SceneNode {
            meshes: vec![mesh(0), mesh(1)],
            children: vec![SceneNode {
                meshes: vec![mesh(2)],
                children: Vec::new(),
            }],
        };

        let order: Vec<usize> = flatten(&root).iter().map(|m| m.material_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn children_flatten_in_declared_order() {
        let root = SceneNode {
            meshes: vec![mesh(0)],
            children: vec![
                SceneNode {
                    meshes: vec![mesh(1)],
                    children: vec![SceneNode {
                        meshes: vec![mesh(2)],
                        children: Vec::new(),
                    }],
                },
                SceneNode {
                    meshes: vec![mesh(3)],
                    children: Vec::new(),
                },
            ],
        };

        let order: Vec<usize> = flatten(&root).iter().map(|m| m.material_index).collect();
        // Full left subtree before the right sibling.
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn empty_tree_flattens_to_nothing() {
        let root = SceneNode::default();
        assert!(flatten(&root).is_empty());
    }

    #[test]
    fn node_without_own_meshes_still_visits_children() {
        let root = SceneNode {
            meshes: Vec::new(),
            children: vec![SceneNode {
                meshes: vec![mesh(7)],
                children: Vec::new(),
            }],
        };
        let order: Vec<usize> = flatten(&root).iter().map(|m| m.material_index).collect();
        assert_eq!(order, vec![7]);
    }
}
