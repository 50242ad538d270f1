//! Database repository tests
//!
//! The cleanup repository depends on Postgres-only features (advisory locks,
//! `FOR UPDATE SKIP LOCKED`, `ctid`), so these tests run against a real server
//! started with testcontainers and are marked `#[ignore]`.
//!
//! # Running tests
//!
//! ```bash
//! cargo test                       # Skips the Postgres tests
//! cargo test -- --ignored          # Run PostgreSQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```

mod cleanup;
