#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use solvekit_scene as scene;

#[doc(inline)]
pub use solvekit_compile as compile;

#[doc(inline)]
pub use solvekit_exec as exec;
