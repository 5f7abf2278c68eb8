//! Core functionality: sessions, the driver loop, tools, and device I/O.

pub mod roku;
pub mod search;
pub mod session;
pub mod tools;
