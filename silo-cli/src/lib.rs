//! # silo-cli
//!
//! The `silo` binary's migration subcommands, plus the [`migrate`] library
//! module a host application embeds to generate migrations against its own
//! entity registry (see [`migrate::generate`] for why that can't live
//! entirely inside the generic binary).

pub mod migrate;
