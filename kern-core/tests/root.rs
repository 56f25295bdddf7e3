//! `Root` is a process-wide singleton, so its construction and
//! duplicate-rejection behavior gets its own test binary rather than
//! sharing a process with other integration tests.

use kern_core::config::RootConfigOverrides;
use kern_core::{Lifetime, Phase, Root, ServiceId};
use std::sync::Arc;

#[tokio::test]
async fn init_wires_everything_and_rejects_a_second_call() {
    let dir = tempfile::tempdir().unwrap();
    let overrides = RootConfigOverrides {
        root: Some(dir.path().to_path_buf()),
        ..Default::default()
    };

    let root = Root::init(overrides.clone()).await.unwrap();
    assert_eq!(root.lifecycle().phase(), Phase::Bootstrap);
    assert!(Arc::ptr_eq(&root, &Root::current().unwrap()));

    let err = Root::init(overrides).await.unwrap_err();
    assert!(matches!(err, kern_core::RootError::DuplicateRoot));
}

#[tokio::test]
async fn registered_singleton_resolves_through_root() {
    let dir = tempfile::tempdir().unwrap();
    // This binary already consumed the process-global `Root` in the test
    // above if the harness runs tests in the same process; fetch whichever
    // instance exists rather than assuming a fresh one.
    let root = match Root::current() {
        Some(root) => root,
        None => Root::init(RootConfigOverrides {
            root: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
        .await
        .unwrap(),
    };

    if !root.has(&ServiceId::from("greeting")) {
        root.register("greeting", Lifetime::Singleton, Box::new(|_| Ok(Arc::new("hello".to_string()))))
            .unwrap();
    }
    let value = root.get("greeting").unwrap();
    assert_eq!(&**value.downcast::<String>().unwrap(), "hello");
}
