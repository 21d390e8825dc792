pub mod board;
pub mod db;
pub mod error;
pub mod icons;
pub mod ordering;
pub mod settings;

pub use error::{Error, Result};
