//! Integration tests driving the real HTTP stack against wiremock servers

mod common;
mod crawl_tests;
mod gateway_tests;
mod processor_tests;
