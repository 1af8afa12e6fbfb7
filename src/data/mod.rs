/// Data layer: schema and filter files, loading, filtering, and writing.
///
/// Architecture:
/// ```text
///  dtypes.txt / columns.txt      <column>.txt
///        │                            │
///        ▼                            ▼
///   ┌──────────┐               ┌─────────────┐
///   │  schema   │               │ filter_spec  │
///   └──────────┘               └─────────────┘
///        │                            │
///  .csv / .xlsx / .parquet            │
///        │                            │
///        ▼                            │
///   ┌──────────┐  encoding, dates     │
///   │  loader   │  parse file → Table  │
///   └──────────┘                      │
///        │                            │
///        ▼                            ▼
///   ┌──────────┐
///   │  filter   │  per-column predicates → narrowed Table
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  writer   │  .xlsx / .csv / .parquet
///   └──────────┘
/// ```
pub mod dates;
pub mod encoding;
pub mod filter;
pub mod filter_spec;
pub mod loader;
pub mod model;
pub mod schema;
pub mod writer;
