//! Core domain types for the tradeguard control core.

pub mod bar;
pub mod indicator;
pub mod ml;
pub mod order;
pub mod pnl;
pub mod position;
pub mod regime;
pub mod risk;
pub mod signal;

pub use bar::*;
pub use indicator::*;
pub use ml::*;
pub use order::*;
pub use pnl::*;
pub use position::*;
pub use regime::*;
pub use risk::*;
pub use signal::*;
