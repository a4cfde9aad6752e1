// Integration test for a runtime that exits on its own
//
// Kept in its own binary: the exit ends the runtime for the process.

mod common;

use common::{CALCULATOR_WITH_VALUE, Calculator};
use jace::error::Error;
use jace_log::{Level, MemorySink};
use std::sync::Arc;

#[test]
fn test_runtime_exit_signals_the_bridge() {
    let sandbox = common::setup();
    assert_eq!(sandbox.shutdown_hooks(), 1);
    let log = Arc::new(MemorySink::new());
    jace_log::set_sink(Arc::clone(&log) as Arc<dyn jace_log::Sink>);
    jace_log::set_level(Level::Info);

    let calc: Calculator = {
        let ctx = common::attach();
        CALCULATOR_WITH_VALUE.construct(&ctx, &[&7]).unwrap()
    };
    assert!(!jace::has_shutdown());

    // System.exit inside the runtime runs jace.util.ShutdownHook.
    sandbox.exit(0);
    assert!(jace::has_shutdown());
    assert!(sandbox.is_destroyed());
    assert_eq!(sandbox.shutdown_hooks(), 0);
    assert!(log.contains(Level::Info, "signalled shutdown"));

    drop(calc);
    assert_eq!(sandbox.calls_after_destroy(), 0);

    match jace::attach() {
        Err(Error::RuntimeInit { message }) => assert!(message.contains("shutdown"), "{message}"),
        other => panic!("expected RuntimeInit, got {other:?}"),
    }

    // The runtime is gone; shutting the bridge down must not reach it.
    jace::shutdown();
    assert_eq!(sandbox.calls_after_destroy(), 0);
}
