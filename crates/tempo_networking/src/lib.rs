//! # TEMPO Networking
//!
//! Everything between a socket and the [`tempo_core`] engine.
//!
//! ## Architecture
//!
//! - **Protocol**: big-endian binary messages, entity diffs as bitfields,
//!   terrain blocks compressed around their most frequent point type.
//! - **Requests**: bounded per-producer queues into the simulation thread,
//!   each request answered through a one-shot completion.
//! - **Server**: fixed-rate simulation loop, per-connection sessions, a
//!   broadcast hub and an authenticator seam.
//!
//! ## Authority
//!
//! ```text
//! CLIENT                              SERVER
//!   |                                    |
//!   |--- action(wire tick, diff) ------->|
//!   |                                    | <- rewound, applied, replayed
//!   |<-- entities_update ----------------|
//!   |                                    |
//! ```
//!
//! Clients only ever propose changes to their own entity. The simulation
//! thread is the single mutator of world state.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tempo_networking::{MemoryAuthenticator, ServerConfig, SimulationServer};
//!
//! let config = ServerConfig::from_toml_str("tick_rate = 60").unwrap();
//! let mut server = SimulationServer::new(config, Arc::new(MemoryAuthenticator::default())).unwrap();
//! let report = server.run_tick().unwrap();
//! assert_eq!(report.tick, 1);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod request;
pub mod server;

pub use config::ServerConfig;
pub use error::{ConfigError, ProtocolError, ProtocolResult, RequestError, ServerError};
pub use protocol::{EntityUpdate, ExitCode, LoginResponseCode, Message, MessageType, RegisterResponseCode};
pub use request::{pipeline, Backend, Frontend, FrontendRegistry, Pending, TargetTick};
pub use server::{Authenticator, Context, Hub, MemoryAuthenticator, Session, SimulationServer, TickLoop, TickReport};
