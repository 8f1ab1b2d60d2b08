pub mod call;
pub mod error;
pub mod resources;
pub mod sector;
pub mod task;

pub use call::*;
pub use error::*;
pub use resources::*;
pub use sector::*;
pub use task::*;
