//! Protocol drivers (C4/C5). `ubx` is the reference driver; additional
//! drivers register into the same [`crate::driver::DriverRegistry`].

pub mod ubx;
