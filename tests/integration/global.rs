use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tickflow::runtime::global;
use tickflow::{Cancelled, Co, Group, RuntimeError};

// The default group is process-wide, so this is the only test that installs it.
#[test]
fn test_global_group_lifecycle() {
    assert!(matches!(global::get(), Err(RuntimeError::NoGlobalGroup)));
    assert!(matches!(global::tick(), Err(RuntimeError::NoGlobalGroup)));
    assert!(matches!(global::post("early"), Err(RuntimeError::NoGlobalGroup)));

    let (group, _clock) = Group::with_mock_clock();
    global::install(group.clone()).unwrap();
    assert!(matches!(
        global::install(Group::new()),
        Err(RuntimeError::GlobalAlreadyInstalled)
    ));

    let total = Arc::new(AtomicI64::new(0));
    let total2 = total.clone();
    global::spawn(move |co: &Co| -> Result<(), Cancelled> {
        loop {
            let event = co.wait_for(["add"])?;
            total2.fetch_add(*event.payload::<i64>().unwrap_or(&0), Ordering::SeqCst);
        }
    })
    .unwrap();
    assert_eq!(global::get().unwrap().running(), 1);

    global::post_with("add", 2i64).unwrap();
    global::post_with("add", 3i64).unwrap();
    global::post("add").unwrap();
    global::tick().unwrap();
    assert_eq!(total.load(Ordering::SeqCst), 5);

    global::stop().unwrap();
    assert_eq!(group.running(), 0);
}
