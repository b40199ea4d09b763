mod common;
mod switch_tests;
