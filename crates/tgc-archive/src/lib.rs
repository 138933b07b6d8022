//! Export-backed adapters: a read-only provider over a Telegram Desktop
//! chat export and an audit of Instagram data exports.

pub mod export;
pub mod instagram;
pub mod source;

pub use export::ExportProvider;
pub use instagram::{Finding, InstagramAudit, Section};
pub use source::{ExportSource, ReadLimits};
