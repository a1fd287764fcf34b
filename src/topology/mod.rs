//! Element-tree model: ids, shapes, the forest, and coarse-grid seeding.

pub mod builder;
pub mod element;
pub mod forest;
pub mod id;

pub use builder::CoarseGridBuilder;
pub use element::{Element, ElementClass, ElementMark, ElementTag, MAX_SIDES};
pub use forest::{ElementForest, Vertex};
pub use id::{ClusterId, ElementId, Rank, VertexId};
