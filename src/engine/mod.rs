//! Core engine: round modeling and exit waterfalls over a parsed cap table.

pub mod batch;
pub mod round;
pub mod summary;
pub mod waterfall;

pub use round::{RoundInput, RoundModel, RoundModeler};
pub use waterfall::{ExitScenario, WaterfallEngine};
