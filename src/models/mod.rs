pub mod dtos;
pub mod firmware;
pub mod gateway;
pub mod types;

pub use firmware::GatewayFirmware;
pub use gateway::{DeviceClass, Gateway, GatewayAttributes, Liveness, NewGateway};
pub use types::{Eui64, HexParseError, Md5Sum};
