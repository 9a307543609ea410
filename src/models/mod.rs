pub mod entity;
pub mod token;

pub use entity::{Entity, Identity};
pub use token::{AccessToken, NewAccessToken};
