//! End-to-end tests driving the public core API the way the external
//! transport layer would, over one or more in-process nodes.

use tempfile::TempDir;

mod handoff;

/// A fresh on-disk database every node of one test cluster shares, like the
/// database server a real deployment points every node at.
fn temp_db() -> (TempDir, String) {
    let dir = tempfile::tempdir().expect("no temp dir");
    let url = format!("sqlite:{}", dir.path().join("hexarena.db").display());

    (dir, url)
}
