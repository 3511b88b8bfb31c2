pub mod download;
pub mod industry;
pub mod ingest;
pub mod provider;
pub mod store;
pub mod throttle;
pub mod tushare;

pub use download::{fetch_range, FetchSummary};
pub use industry::{IndustryOverrides, IndustryTable};
pub use ingest::{merge_day, MergedDay};
pub use provider::{
    CalendarSource, DataError, FetchProgress, IndustryLookup, MarketFeed, MemoryStore, QuoteRepository,
    SilentProgress, StdoutProgress,
};
pub use store::{DayMeta, ParquetStore, StoreStatus, StoredCalendar};
pub use throttle::RequestThrottle;
pub use tushare::{CalendarRow, LimitRow, QuoteRow, TushareClient, TushareSettings};
