pub mod modbus;
pub mod packet;

pub use modbus::ModbusCodec;
pub use packet::{Parser, TcpFrameFactory, TunnelCodec};
