pub mod api;
pub mod auth;
pub mod error;
pub mod merge;
mod toggler;
pub mod transport;

pub use api::{CommandQueue, ReadingSource};
pub use auth::Credentials;
pub use error::ApiError;
pub use merge::merge_value;
pub use toggler::{
    ControlToggler, ToggleObserver, DEFAULT_PENDING_REFRESH_INTERVAL, DEFAULT_REFRESH_INTERVAL,
    DEFAULT_START_DELAY,
};
pub use transport::HttpApi;
