//! Integration tests for relay

mod helpers;
mod test_cli;
mod test_release;
