pub mod memory;
pub mod provider;
pub mod sources;
pub mod usage;

pub use memory::StaticSource;
pub use provider::{normalize_bars, MarketDataProvider, ProviderConfig, UnavailableError};
pub use sources::{
    build_source, AlphaVantageSource, FinnhubSource, IexSource, PolygonSource, QuandlSource,
    SourceKeys, YahooSource,
};
pub use usage::FetchUsage;
