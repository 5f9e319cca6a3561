pub mod synthetic;

#[cfg(feature = "backend-tract")]
pub mod tract;

#[cfg(any(feature = "backend-tract", test))]
pub(crate) mod yolo;

pub use synthetic::SyntheticEngine;

#[cfg(feature = "backend-tract")]
pub use tract::TractEngine;
