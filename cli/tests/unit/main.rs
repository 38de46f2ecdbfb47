//! Unit tests for the idve CLI library
//!
//! These tests run against an in-memory host and finish without touching
//! real processes or disks.

mod lifecycle;
mod property_tests;
