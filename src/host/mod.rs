//! Host side: per-extension clients and the controller that owns them

pub mod client;
pub mod controller;

pub use client::{Client, ClientState};
pub use controller::{
    ClientEntry, Controller, InProcessTransportFactory, ProcessTransportFactory, TransportFactory,
};
