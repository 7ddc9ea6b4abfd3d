//! SDR stage of the sealing pipeline.
//!
//! Given the pieces declared for a sector, the stage computes the sector's
//! data commitment (CommD), draws the sealing ticket from the chain, runs the
//! replica encoding and durably records the results. It is driven by a task
//! scheduler through [`task::TaskInterface`].

pub mod chain;
pub mod config;
pub mod db;
pub mod encoder;
pub mod layout;
pub mod poller;
pub mod sdr;
pub mod task;
pub mod ticket;
pub mod types;
