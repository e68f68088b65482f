//! Integration tests: parse → round → waterfall through the public API.

mod fixtures;
mod pipeline;
