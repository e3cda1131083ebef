//! Architectural CPU state model primitives.

/// Architectural register file types and storage model.
pub mod registers;

pub use registers::{
    GeneralRegister, IntrGate, Registers, StatusFlags, EXTENDED_REGISTER_COUNT,
    GENERAL_REGISTER_COUNT,
};
