//! Behavioural suites exercising several modules together.

mod support;
