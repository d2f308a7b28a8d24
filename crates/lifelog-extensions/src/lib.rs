//! Built-in domain extensions for Lifelog.
//!
//! Each extension handles one domain of personal records through the core's
//! capability contract: `add` turns natural language into stored records via
//! AI field extraction, `query` turns it into a read statement executed
//! through the query safety gate.

mod factories;
mod finance;
mod format;
mod work;

pub use factories::{register_builtins, write_default_manifests, FinanceFactory, WorkFactory};
pub use finance::FinanceExtension;
pub use work::WorkExtension;
