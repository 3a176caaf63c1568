//! Stream module tests.

mod fanout_test;
mod lines_test;
