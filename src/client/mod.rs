//! Backend connection layer

pub mod backend;
pub mod raw_connection;

pub use backend::{BackendConnection, BackendFactory, Connection, ConnectionFactory};
pub use raw_connection::RawConnection;
