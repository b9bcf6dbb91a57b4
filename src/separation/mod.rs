//! Voice separation: long-audio segmentation, container dispatch and
//! streaming progress.

mod engine;
pub mod progress;

pub use engine::{ContainerSeparationProvider, SeparationEngine, SeparationOptions};
pub use progress::{overall_percent, Phase, TtyProgressParser};
