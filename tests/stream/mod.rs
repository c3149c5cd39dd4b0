//! Stream module tests.

mod demux_test;
