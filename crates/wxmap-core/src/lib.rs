pub mod animation;
pub mod category;
pub mod config;
pub mod error;
pub mod extract;
pub mod led;
pub mod metar;
pub mod mode;
pub mod mos;
pub mod observation;
pub mod registry;
pub mod render;
pub mod schedule;
pub mod strip;
pub mod taf;

pub use error::{Error, Result};
