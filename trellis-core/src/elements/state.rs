use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serializable snapshot of an element subtree.
///
/// The shape mirrors the element tree; restoring a snapshot onto a tree of a
/// different shape fails with [`FormError::State`](crate::FormError::State).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementState {
    /// Labels carry no state.
    Static,
    Primitive {
        value: Value,
        hidden: bool,
    },
    Group {
        children: Vec<ElementState>,
    },
    Container {
        collapsed: bool,
        children: Vec<ElementState>,
    },
    Multi {
        collapsed: bool,
        children: Vec<ElementState>,
    },
}

impl ElementState {
    /// Number of states in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children().iter().map(ElementState::count).sum::<usize>()
    }

    /// Whether `other` could be restored onto the tree this state came from.
    /// Multis rebuild their generated children, so any two multi states fit.
    pub fn same_shape(&self, other: &ElementState) -> bool {
        match (self, other) {
            (ElementState::Static, ElementState::Static)
            | (ElementState::Primitive { .. }, ElementState::Primitive { .. })
            | (ElementState::Multi { .. }, ElementState::Multi { .. }) => true,
            (ElementState::Group { children: a }, ElementState::Group { children: b })
            | (ElementState::Container { children: a, .. }, ElementState::Container { children: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same_shape(b))
            }
            _ => false,
        }
    }

    pub fn children(&self) -> &[ElementState] {
        match self {
            ElementState::Group { children }
            | ElementState::Container { children, .. }
            | ElementState::Multi { children, .. } => children,
            _ => &[],
        }
    }
}
