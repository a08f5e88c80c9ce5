pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetch;
pub mod layout {
    pub mod column;
    pub mod viewport;
    pub mod visibility;
}
pub mod render {
    pub mod job;
    pub mod queue;
    pub mod session;
    pub mod surface;
}
pub mod tasks {
    pub mod controller;
    pub mod thumbnails;
    pub mod viewer;
}
pub mod testkit;

pub use error::{Error, Result};
