#![no_main]
use libfuzzer_sys::fuzz_target;

use ledger_sync::sync::{ClientGroupStore, Group, Member, ServerUpdate};

fuzz_target!(|data: &[u8]| {
    let json = match std::str::from_utf8(data) {
        Ok(s) => s,
        Err(_) => return,
    };

    // Decoding arbitrary input must not panic
    let update = match ServerUpdate::from_json(json) {
        Ok(u) => u,
        Err(_) => return,
    };

    let mut store = ClientGroupStore::default();
    store.add(Group::new("g1", "fuzz")).unwrap();
    let _ = store.add_member(None, Member::new("local-1", "A"));

    store.on_server_update(update.clone());
    let pending = store.pending_hashes("g1");
    let group = store.by_id("g1");

    // Replaying the same update is a no-op
    store.on_server_update(update);
    assert_eq!(store.pending_hashes("g1"), pending);
    assert_eq!(store.by_id("g1"), group);

    let _ = store.all();
    let _ = store.current_share_link();
});
