pub mod cruise;

pub use cruise::{cruise_cortex_extraction, CruiseParams};
