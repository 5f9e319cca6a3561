mod backend;
pub mod backends;
mod factory;
mod filter;
mod result;

pub use backend::DetectionEngine;
pub use backends::SyntheticEngine;
pub use factory::{build_engine, resolve_model, ModelChoice};
pub use filter::{Filtered, WeaponFilter};
pub use result::{Detection, InvalidDetection};
