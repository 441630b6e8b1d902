//! Domain and wire types shared by the client core, storage and the desktop app.

pub mod domain;
pub mod error;
pub mod protocol;
pub mod route;
