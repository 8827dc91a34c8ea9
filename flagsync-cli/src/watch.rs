use std::process;
use std::sync::Arc;
use std::time::Duration;

use flagsync::{Config, DataKind, DataStore, InMemoryStore, ProcessorState, StreamProcessor};

pub async fn run_watch(config: Config, ready_timeout: u64) {
    let store = Arc::new(InMemoryStore::new());
    let processor = StreamProcessor::new(config, store.clone());

    let ready = processor.start();
    if !ready.wait_timeout(Duration::from_secs(ready_timeout)).await {
        tracing::warn!(
            timeout_secs = ready_timeout,
            "no data received yet, continuing in the background"
        );
    } else if processor.initialized() {
        print_counts(store.as_ref());
    } else {
        eprintln!("Stream processor stopped before receiving data");
        processor.shutdown().await;
        process::exit(1);
    }

    let mut states = processor.subscribe_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                tracing::info!(?state, "stream state changed");
                match state {
                    ProcessorState::Live => print_counts(store.as_ref()),
                    ProcessorState::PermanentlyFailed => {
                        eprintln!("Stream processor stopped: unrecoverable error");
                        processor.shutdown().await;
                        process::exit(1);
                    }
                    _ => {}
                }
            }
        }
    }

    processor.shutdown().await;
}

fn print_counts(store: &dyn DataStore) {
    println!(
        "{} flags, {} segments",
        store.all(DataKind::Flags).len(),
        store.all(DataKind::Segments).len()
    );
}
