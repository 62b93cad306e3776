//! Ordering properties of the event pass.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use tickflow::{Cancelled, Co, Group};

const KEYS: [&str; 3] = ["a", "b", "c"];

/// Posts `keys` (indices into `KEYS`) and returns what a single listener on
/// all of them saw after one tick.
fn replay(keys: &[u8]) -> Vec<String> {
    let (group, _clock) = Group::with_mock_clock();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen2 = seen.clone();
    group
        .spawn(move |co: &Co| -> Result<(), Cancelled> {
            loop {
                let event = co.wait_for(KEYS)?;
                seen2.lock().push(event.key().to_string());
            }
        })
        .unwrap();

    for &k in keys {
        group.post(KEYS[k as usize % KEYS.len()]);
    }
    group.tick();
    group.stop();
    let result = seen.lock().clone();
    result
}

#[cfg(test)]
mod quickcheck_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    /// Events reach a listener in the order they were posted.
    #[quickcheck]
    fn quickcheck_events_fifo(keys: Vec<u8>) -> bool {
        let keys: Vec<u8> = keys.into_iter().take(32).collect();
        let expected: Vec<String> = keys
            .iter()
            .map(|&k| KEYS[k as usize % KEYS.len()].to_string())
            .collect();
        replay(&keys) == expected
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Every waiter on a key is resumed exactly once per post of that key,
    /// in slot order.
    #[test]
    fn prop_waiters_resume_in_slot_order(
        interests in prop::collection::vec(0usize..3, 1..6),
        posts in prop::collection::vec(0usize..3, 0..12),
    ) {
        let (group, _clock) = Group::with_mock_clock();
        let resumed = Arc::new(Mutex::new(Vec::new()));

        for (slot, &key) in interests.iter().enumerate() {
            let resumed = resumed.clone();
            group
                .spawn(move |co: &Co| -> Result<(), Cancelled> {
                    loop {
                        co.wait_for([KEYS[key]])?;
                        resumed.lock().push(slot);
                    }
                })
                .unwrap();
        }

        for &key in &posts {
            group.post(KEYS[key]);
        }
        group.tick();

        let mut expected = Vec::new();
        for &key in &posts {
            for (slot, &interest) in interests.iter().enumerate() {
                if interest == key {
                    expected.push(slot);
                }
            }
        }
        let got = resumed.lock().clone();
        prop_assert_eq!(got, expected);
        group.stop();
        prop_assert_eq!(group.running(), 0);
    }
}
