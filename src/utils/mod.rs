pub mod error;

pub use error::TravelError;

pub type Result<T> = std::result::Result<T, TravelError>;
