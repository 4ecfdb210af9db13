//! End-to-end session flows against a mock SupplyChainX API.

mod common;
mod gate;
mod interception;
mod lifecycle;
