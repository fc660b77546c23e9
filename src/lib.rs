//! # ledgerd
//!
//! A raw-TCP RPC server backed by a durable per-account ledger.
//!
//! ## Core Components
//!
//! - [`protocol`]: incremental request parser and fixed response encoder
//! - [`registry`]: path-to-handler table and dispatch
//! - [`connection`] / [`server`]: one request per connection over tokio
//! - [`ledger`]: accounts, transfers and the transaction journal
//! - [`services`]: the built-in `/api/...` endpoints
//!
//! ## Example
//!
//! ```
//! use ledgerd::protocol::{parse, Response};
//! use ledgerd::registry::ServiceRegistry;
//!
//! let registry = ServiceRegistry::builder()
//!     .text("/api/hello", "Greets the caller", |name| {
//!         Ok(Some(format!("hello {}", name.trim())))
//!     })
//!     .build()
//!     .unwrap();
//!
//! let request = parse(b"POST /API/Hello HTTP/1.1\r\n\r\nworld", 1024).unwrap();
//! assert_eq!(registry.dispatch(&request), Response::Ok("hello world".into()));
//! ```

pub mod config;
pub mod connection;
pub mod ledger;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod services;
