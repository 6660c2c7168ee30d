pub mod booklet;
pub mod entry;
pub mod enums;
pub mod lab;
pub mod medication;

pub use booklet::*;
pub use entry::*;
pub use lab::*;
pub use medication::*;
