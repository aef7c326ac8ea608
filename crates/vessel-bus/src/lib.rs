//! Vessel Command Bus
//!
//! All traffic between the core and a view is message passing:
//! - A view sends a [`Command`] tagged with a fresh nonce
//! - The core resolves it against the [`HandlerRegistry`] and answers with a
//!   [`CommandResult`] carrying the same nonce
//! - Views are named actors in a [`ViewTable`], each owning the resources
//!   bound to it for as long as it is open

mod client;
mod command;
mod error;
mod registry;
mod server;
mod subscription;
mod views;
pub mod vocabulary;

pub use client::BusClient;
pub use command::{Command, CommandResult};
pub use error::BusError;
pub use registry::{handler_fn, Handler, HandlerFuture, HandlerRegistry};
pub use server::CommandServer;
pub use subscription::Subscription;
pub use views::{ViewHost, ViewId, ViewOpen, ViewSpec, ViewTable};

pub type Result<T> = std::result::Result<T, BusError>;
