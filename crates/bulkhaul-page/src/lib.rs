//! Binary record pages for moving batches between pipeline stages.
//!
//! A [`Page`] packs records of a fixed [`Schema`](bulkhaul_types::Schema)
//! back to back: a `u32` length prefix, a null bitmap, then one fixed-width
//! slot per column. Strings and JSON values live in per-page reference tables
//! and the slot holds their index. [`PageBuilder`] writes pages and hands full
//! ones to a [`PageOutput`]; [`PageReader`] walks them record by record.
//! [`PageChannel`] connects the producing and consuming side of a partition.

pub mod allocator;
pub mod builder;
pub mod channel;
pub mod error;
pub mod output;
pub mod page;
pub mod reader;

pub use allocator::{AllocatorStats, PageAllocator, PooledPageAllocator};
pub use builder::PageBuilder;
pub use channel::{PageChannel, PageConsumer, PageProducer};
pub use error::ChannelError;
pub use output::PageOutput;
pub use page::Page;
pub use reader::PageReader;

/// Default page capacity in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 32 * 1024;
