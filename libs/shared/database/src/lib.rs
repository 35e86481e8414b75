pub mod bitrix;

pub use bitrix::{BatchEnvelope, BitrixClient};
