//! Library to backup a fleet of [PostgreSQL][pg] servers.
//!
//! Every configured server is backed up in turn: the first answering port
//! is determined by the [`resolver`], each database is dumped with
//! [`pg_dump`][pg_dump] into a dated directory below the data root and old
//! dumps are pruned by the [`util::retention`]. The [`orchestrator`] ties
//! these steps together.
//!
//! [pg]: https://www.postgresql.org/
//! [pg_dump]: https://www.postgresql.org/docs/current/app-pgdump.html

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod postgres;
pub mod resolver;
pub mod util;
