// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod auth;
pub mod collector;
pub mod config;
pub mod http;
pub mod machine_id;
pub mod sigcache;
pub mod testcase;

pub use crate::collector::{Collector, CollectorError};
pub use crate::config::CollectorConfig;
pub use crate::testcase::{read_testcase, TestCase};
