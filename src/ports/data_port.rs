//! Data access port trait.

use crate::domain::bar::Bar;
use crate::domain::error::ForecastError;

pub trait DataPort {
    /// Raw feature-annotated bars for one symbol, in source order.
    fn fetch_bars(&self, symbol: &str) -> Result<Vec<Bar>, ForecastError>;

    fn list_symbols(&self) -> Result<Vec<String>, ForecastError>;
}
