//! Render hardware interface used by kiln. Each object type is an enum over the compiled in
//! backends. The `null` backend is always available. It keeps buffer contents in memory and
//! validates usage, which makes it suitable for tests and headless tools.

pub use backends::null;

pub use buffer::*;
pub use command_buffer::*;
pub use device_context::*;
pub use error::*;
pub use pipeline::*;
pub use resource_group::*;
pub use root_signature::*;
pub use shader::*;
pub use texture::*;
pub use types::*;

mod backends;
mod buffer;
mod command_buffer;
mod device_context;
mod error;
mod pipeline;
mod resource_group;
mod root_signature;
mod shader;
mod texture;
mod types;
