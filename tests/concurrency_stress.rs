//! Concurrent queue and stream stress tests

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracebin::{BoundedQueue, ByteStream, TracebinError, VirtualStream};

#[test]
fn test_queue_bounded_and_fifo_under_load() {
    const CAPACITY: usize = 8;
    const ITEMS: u64 = 20_000;

    let queue = Arc::new(BoundedQueue::new(CAPACITY));
    let overflow_seen = Arc::new(AtomicBool::new(false));

    crossbeam::thread::scope(|scope| {
        let producer_queue = queue.clone();
        scope.spawn(move |_| {
            let mut rng = StdRng::seed_from_u64(1);
            for i in 0..ITEMS {
                producer_queue.write((i, rng.gen::<u32>())).unwrap();
            }
            producer_queue.set_logical_total(ITEMS);
        });

        let observer_queue = queue.clone();
        let observer_flag = overflow_seen.clone();
        scope.spawn(move |_| {
            while !observer_queue.is_finished() && !observer_queue.is_aborted() {
                if observer_queue.len() > CAPACITY {
                    observer_flag.store(true, Ordering::Relaxed);
                    return;
                }
                std::thread::yield_now();
            }
        });

        let consumer_queue = queue.clone();
        scope.spawn(move |_| {
            let mut expected = 0u64;
            while let Some((seq, _)) = consumer_queue.read().unwrap() {
                assert_eq!(seq, expected, "items delivered out of order");
                assert!(consumer_queue.len() <= CAPACITY);
                expected += 1;
            }
            assert_eq!(expected, ITEMS);
        });
    })
    .unwrap();

    assert!(!overflow_seen.load(Ordering::Relaxed), "capacity exceeded");
    assert_eq!(queue.produced(), ITEMS);
    assert_eq!(queue.consumed(), ITEMS);
}

#[test]
fn test_queue_multiple_producers_consume_everything() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 2_000;

    let queue = Arc::new(BoundedQueue::new(16));

    crossbeam::thread::scope(|scope| {
        for producer in 0..PRODUCERS {
            let queue = queue.clone();
            scope.spawn(move |_| {
                for i in 0..PER_PRODUCER {
                    queue.write((producer, i)).unwrap();
                }
            });
        }

        let consumer = queue.clone();
        scope.spawn(move |_| {
            let mut next_expected = [0u64; PRODUCERS as usize];
            let mut total = 0u64;
            loop {
                match consumer.read() {
                    Ok(Some((producer, i))) => {
                        // FIFO per producer even when writers interleave.
                        assert_eq!(i, next_expected[producer as usize]);
                        next_expected[producer as usize] = i + 1;
                        total += 1;
                        if total == PRODUCERS * PER_PRODUCER {
                            consumer.set_logical_total(total);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => panic!("consumer failed: {e}"),
                }
            }
            assert_eq!(total, PRODUCERS * PER_PRODUCER);
        });
    })
    .unwrap();
}

#[test]
fn test_virtual_stream_pipeline_pair() {
    // Sequential writer and reader on separate threads with a tight
    // resident bound: data must arrive intact and the window must stay
    // bounded by the drop cadence.
    const TOTAL: usize = 1 << 20;
    let stream = Arc::new(VirtualStream::new(4096, Some(64 * 1024)));

    crossbeam::thread::scope(|scope| {
        let writer_stream = stream.clone();
        scope.spawn(move |_| {
            let mut rng = StdRng::seed_from_u64(99);
            let mut written = 0usize;
            while written < TOTAL {
                let n = rng.gen_range(1..8192).min(TOTAL - written);
                let block: Vec<u8> = (written..written + n).map(|i| (i % 251) as u8).collect();
                writer_stream.write(&block).unwrap();
                written += n;
            }
            writer_stream.set_logical_end(TOTAL as u64);
        });

        let reader_stream = stream.clone();
        scope.spawn(move |_| {
            let mut rng = StdRng::seed_from_u64(100);
            let mut read = 0usize;
            while read < TOTAL {
                let want = rng.gen_range(1..8192).min(TOTAL - read);
                let mut buf = vec![0u8; want];
                let n = reader_stream.read(&mut buf).unwrap();
                assert!(n > 0, "premature end of stream at {}", read);
                for (i, &byte) in buf[..n].iter().enumerate() {
                    assert_eq!(byte, ((read + i) % 251) as u8, "corrupt byte at {}", read + i);
                }
                read += n;
                reader_stream.drop_old_data();
            }
            assert_eq!(reader_stream.read(&mut [0u8; 16]).unwrap(), 0);
        });
    })
    .unwrap();

    // Everything behind both cursors was released along the way.
    assert!(stream.resident_bytes() <= 128 * 1024);
}

#[test]
fn test_abort_storm_never_hangs() {
    // Many threads blocked on both structures; one abort must free all
    // of them, and repeated aborts stay harmless.
    let queue = Arc::new(BoundedQueue::<u64>::new(1));
    let stream = Arc::new(VirtualStream::new(64, Some(64)));
    queue.write(0).unwrap();
    stream.write(&[0u8; 128]).unwrap();

    crossbeam::thread::scope(|scope| {
        for _ in 0..4 {
            let queue = queue.clone();
            scope.spawn(move |_| {
                assert!(matches!(queue.write(1), Err(TracebinError::Cancelled)));
            });
            let stream = stream.clone();
            scope.spawn(move |_| {
                assert!(matches!(
                    stream.write(&[1u8; 32]),
                    Err(TracebinError::Cancelled)
                ));
            });
        }
        let stream_reader = stream.clone();
        scope.spawn(move |_| {
            let mut buf = [0u8; 256];
            stream_reader.seek_read(128).unwrap();
            assert!(matches!(
                stream_reader.read(&mut buf),
                Err(TracebinError::Cancelled)
            ));
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        for _ in 0..3 {
            queue.abort();
            stream.abort();
        }
    })
    .unwrap();

    assert!(queue.is_aborted());
    assert!(stream.is_aborted());
}
