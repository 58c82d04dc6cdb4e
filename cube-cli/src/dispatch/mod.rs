// Copyright 2026 the Cube authors. MIT license.
//
// The three dispatchers of §4.F, each binding one external stimulus to
// `VMPool.acquire -> worker.run -> release`.

pub mod cron;
pub mod daemon;
pub mod http;
