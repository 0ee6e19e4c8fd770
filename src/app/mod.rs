pub mod ports;
pub mod produce_use_case;
