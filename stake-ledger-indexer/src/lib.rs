// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod metrics;
pub mod pg_store;
pub mod service;
