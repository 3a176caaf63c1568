//! Process launch, termination detection and signal delivery.

mod descriptor;
mod handle;
mod signal;
mod termination;

pub use descriptor::*;
pub use handle::*;
pub use signal::*;
pub use termination::*;
