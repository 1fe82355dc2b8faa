pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod pagination;
pub mod path_codec;
pub mod permissions;
pub mod server;
pub mod store;

pub use server::build_router;
