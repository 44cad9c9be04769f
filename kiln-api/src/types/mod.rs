mod definitions;
pub use definitions::*;

mod misc;
pub use misc::*;
