//! Library side of `radioctl`; the binary parses arguments and dispatches
//! here.

pub mod commands;
