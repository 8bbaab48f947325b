/*!
# Shield DevKit - in-memory backend and helpers for tests

Lets the live collections run without a broker or a backend:
- `MemorySource`: seedable tables, injectable failures, held queries, emitted change events
- `RowBuilder` / `ShieldRows`: raw rows shaped like the backend tables
- `TestHarness`: starts the feeds and waits for them to settle
*/

pub mod memory_source;
pub mod rows;
pub mod test_utils;

pub use memory_source::MemorySource;
pub use rows::{RowBuilder, ShieldRows};
pub use test_utils::TestHarness;
