//! External collaborators the controller depends on but does not implement
//! in full: the price-provider adapter and the inverter adapter (spec.md
//! §1, "specified only by the contracts they must satisfy"). Both are
//! `async_trait` traits in the teacher's `Battery` idiom, with a simulated
//! implementation used by default, by the planner, and by tests.

pub mod inverter;
pub mod price_provider;

pub use inverter::{EnergyFlow, InverterAdapter, InverterError, SimulatedInverter};
pub use price_provider::{PriceProvider, PriceProviderError, SimulatedPriceProvider};

#[cfg(feature = "live-price")]
pub mod live_price;
