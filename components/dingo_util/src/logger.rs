// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Global logger bootstrap. Every crate logs through the `slog-global`
//! macros; call [`init`] once near process start (tests that want output may
//! call it too, repeat calls are harmless).

use std::sync::Once;

use slog::{o, Drain, Level, LevelFilter, Logger};

static INIT: Once = Once::new();

/// Installs a terminal drain behind an async channel as the global logger.
pub fn init(level: Level) {
    INIT.call_once(|| {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain)
            .chan_size(4096)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build()
            .fuse();
        let drain = LevelFilter::new(drain, level).fuse();
        let logger = Logger::root(drain, o!());
        slog_global::set_global(logger);
    });
}

/// Discards everything; useful for quiet test runs.
pub fn init_for_test() {
    INIT.call_once(|| {
        let drain = slog::Discard;
        let logger = Logger::root(drain, o!());
        slog_global::set_global(logger);
    });
}
