pub mod inverter;
pub mod registers;

pub use inverter::Session;
pub use registers::RegisterDecoder;
