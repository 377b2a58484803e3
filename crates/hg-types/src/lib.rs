pub mod artifact;
pub mod errors;
pub mod grid;
pub mod keys;
pub mod params;

pub use artifact::*;
pub use errors::*;
pub use grid::*;
pub use keys::*;
pub use params::*;
