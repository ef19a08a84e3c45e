pub mod analyzer;
pub mod landmark;
pub mod rotation;

pub use analyzer::PoseAnalyzer;
pub use landmark::{Landmark, LandmarkType};
pub use rotation::{remap_landmarks, sensor_to_upright, upright_to_sensor};
