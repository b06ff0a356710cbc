#![no_main]
use libfuzzer_sys::fuzz_target;

use ledger_sync::storage::StoreSnapshot;
use ledger_sync::sync::SyncConfig;

fuzz_target!(|data: &[u8]| {
    // Corrupt persisted state must be rejected, never panic
    if let Ok(snapshot) = StoreSnapshot::from_bytes(data) {
        let store = snapshot.restore(SyncConfig::default());
        let _ = store.all();
        let _ = store.current();
    }
});
