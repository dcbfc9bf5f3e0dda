//! Control groups provide a way of controlling groups of processes.
//! The runtime core only needs to know which hierarchy the host runs, since
//! rootless resource limits are enforceable on a unified (v2) host alone.
pub mod common;
