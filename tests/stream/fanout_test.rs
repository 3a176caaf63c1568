//! Tests for fan-out delivery.

use std::sync::Arc;

use futures_util::StreamExt;

use execstream::stream::{ByteChunk, Fanout};

#[tokio::test]
async fn subscribers_see_only_later_items() {
    let fanout = Arc::new(Fanout::new());
    let early = fanout.subscribe();
    fanout.publish(ByteChunk::new(0, b"first".to_vec()));
    let late = fanout.subscribe();
    fanout.publish(ByteChunk::new(1, b"second".to_vec()));
    fanout.close();

    let early: Vec<u64> = early.map(|c| c.unwrap().seq()).collect().await;
    let late: Vec<u64> = late.map(|c| c.unwrap().seq()).collect().await;
    assert_eq!(early, vec![0, 1]);
    assert_eq!(late, vec![1]);
}

#[tokio::test]
async fn publishing_from_threads_keeps_per_thread_order() {
    let fanout = Arc::new(Fanout::<(u8, u32)>::new());
    let sub = fanout.subscribe();

    let threads: Vec<_> = (0..4u8)
        .map(|id| {
            let fanout = Arc::clone(&fanout);
            std::thread::spawn(move || {
                for n in 0..100 {
                    fanout.publish((id, n));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    fanout.close();

    let items: Vec<(u8, u32)> = sub.map(Result::unwrap).collect().await;
    assert_eq!(items.len(), 400);
    for id in 0..4u8 {
        let seen: Vec<u32> = items.iter().filter(|(i, _)| *i == id).map(|(_, n)| *n).collect();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }
}
