pub mod account_tests;
pub mod checkpoint_tests;
pub mod common;
pub mod content_tests;
