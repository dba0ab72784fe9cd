#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Attribute (solvable parameter) references.
pub mod attribute;

/// Error types for scene queries and persistence.
pub mod error;

/// Frame values and tags.
pub mod frame;

/// In-memory scene implementing [`SceneQuery`].
pub mod memory;

/// Marker, camera and bundle references.
pub mod node;

/// Camera pose evaluation and pinhole projection.
pub mod projection;

/// The host-state query interface.
pub mod query;

pub use attribute::Attribute;
pub use error::SceneError;
pub use frame::Frame;
pub use memory::{AttrData, Keyframe, Scene, TangentType};
pub use node::{Bundle, Camera, Marker};
pub use projection::CameraPose;
pub use query::{AttrKind, AttrState, ObjectType, SceneQuery};
