//! dr-engine: external converter integration.
//!
//! - [`ToolCommand`] runs an executable under a hard timeout and kills it
//!   when the budget runs out.
//! - [`ToolRegistry`] locates converter executables.
//! - [`ConversionEngine`] is the capability every converter implements;
//!   [`LibreOfficeEngine`] and [`Docx2PdfEngine`] are the shipped variants.
//! - [`EngineChain`] tries available engines in priority order.

pub mod chain;
pub mod command;
pub mod engine;
pub mod tools;

pub use chain::{ChainError, Converted, EngineChain};
pub use command::{ToolCommand, ToolOutput};
pub use dr_core::config::EngineKind;
pub use engine::{
    build_engines, ConversionEngine, ConvertOutcome, Docx2PdfEngine, LibreOfficeEngine,
    SharedEngine,
};
pub use tools::{ToolInfo, ToolRegistry};
