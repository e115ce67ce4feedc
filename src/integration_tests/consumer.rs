use super::*;
use crate::{Error, ErrorKind, ExchangeDeclareOptions, ExchangeType, QueueDeclareOptions, StopToken};
use crossbeam_channel::unbounded;
use std::sync::Arc;
use std::thread;

fn exclusive() -> QueueDeclareOptions {
    QueueDeclareOptions {
        exclusive: true,
        ..QueueDeclareOptions::default()
    }
}

#[test]
fn listen_collects_messages_in_order() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        assert_eq!(channel.number(), 1);
        let queue = channel.declare_queue(unique("listen"), exclusive()).unwrap();
        let exchange = channel
            .declare_exchange(
                unique("ex_listen"),
                ExchangeType::Direct,
                ExchangeDeclareOptions {
                    auto_delete: true,
                    ..ExchangeDeclareOptions::default()
                },
            )
            .unwrap();
        queue.bind_to_exchange(&exchange, "listen").unwrap();

        let consumer = queue.consume().unwrap();
        let stop = StopToken::new();
        let (tx, rx) = unbounded();
        let listener = {
            let stop = stop.clone();
            thread::spawn(move || {
                consumer.listen(&stop, |delivery| {
                    tx.send(delivery.into_content()).unwrap();
                })
            })
        };

        for message in &["0", "1", "2"] {
            exchange.publish(*message, "listen").unwrap();
        }
        let received: Vec<_> = (0..3)
            .map(|_| String::from_utf8(rx.recv_timeout(WAIT).unwrap()).unwrap())
            .collect();
        assert_eq!(received, vec!["0", "1", "2"]);

        stop.stop();
        listener.join().unwrap().unwrap();
    })
}

#[test]
fn pop_blocks_until_a_message_arrives() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let queue = channel.declare_queue("", exclusive()).unwrap();
        let consumer = queue.consume().unwrap();

        let waiter = thread::spawn(move || consumer.pop().map(Delivery::into_content));
        thread::sleep(Duration::from_millis(50));
        channel.publish("wake up", "", queue.name()).unwrap();

        assert_eq!(waiter.join().unwrap().unwrap(), b"wake up");
    })
}

#[test]
fn pop_timeout_on_empty_queue() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let queue = channel.declare_queue("", exclusive()).unwrap();
        let consumer = queue.consume().unwrap();
        assert_eq!(consumer.pop_timeout(Duration::from_millis(150)).unwrap(), None);
        assert!(session.last_operation_succeeded());
    })
}

#[test]
fn deliveries_end_when_stopped() {
    on_each_broker(|session| {
        let channel = session.open_channel().unwrap();
        let queue = channel.declare_queue("", exclusive()).unwrap();
        let consumer = queue.consume().unwrap();
        for i in 0..3 {
            channel.publish(format!("m{}", i), "", queue.name()).unwrap();
        }

        let stop = StopToken::new();
        let mut deliveries = consumer.deliveries(&stop);
        let first: Vec<_> = deliveries
            .by_ref()
            .take(2)
            .map(|d| d.unwrap().into_content())
            .collect();
        assert_eq!(first, vec![b"m0".to_vec(), b"m1".to_vec()]);

        stop.stop();
        assert!(deliveries.next().is_none());
        // The third message is still there for the next reader.
        assert_eq!(expect_message(&consumer).content(), b"m2");
    })
}

#[test]
fn closing_channel_interrupts_consumer() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let channel = session.open_channel().unwrap();
    channel.declare_queue("work", QueueDeclareOptions::default()).unwrap();
    let consumer = channel.consumer("work").unwrap();

    channel.close().unwrap();

    match consumer.pop().unwrap_err() {
        Error::DeliveryInterrupted { channel_id, source } => {
            assert_eq!(channel_id, 1);
            assert_eq!(source.kind(), ErrorKind::ChannelClosed);
        }
        err => panic!("unexpected error {}", err),
    }
}

#[test]
fn closing_session_stops_listener() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let channel = session.open_channel().unwrap();
    channel.declare_queue("work", QueueDeclareOptions::default()).unwrap();
    let consumer = channel.consumer("work").unwrap();

    let stop = StopToken::new();
    let listener = thread::spawn(move || consumer.listen(&stop, |_| ()));
    thread::sleep(Duration::from_millis(50));
    drop(channel);
    session.close().unwrap();

    let err = listener.join().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeliveryInterrupted);
}

#[test]
fn cancelled_consumer_leaves_messages_queued() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let channel = session.open_channel().unwrap();
    channel.declare_queue("backlog", QueueDeclareOptions::default()).unwrap();
    let consumer = channel.consumer("backlog").unwrap();
    consumer.cancel().unwrap();

    channel.publish("later", "", "backlog").unwrap();
    assert_eq!(broker.queue_len("backlog"), Some(1));

    let consumer = channel.consumer("backlog").unwrap();
    assert_eq!(expect_message(&consumer).content(), b"later");
    assert_eq!(broker.queue_len("backlog"), Some(0));
}

#[test]
fn auto_delete_queue_goes_with_last_consumer() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let channel = session.open_channel().unwrap();
    let options = QueueDeclareOptions {
        auto_delete: true,
        ..QueueDeclareOptions::default()
    };
    channel.declare_queue("ephemeral", options).unwrap();
    let consumer = channel.consumer("ephemeral").unwrap();
    assert_eq!(broker.queue_len("ephemeral"), Some(0));
    drop(consumer);
    assert_eq!(broker.queue_len("ephemeral"), None);
}

#[test]
fn consumers_of_one_queue_take_turns() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = memory_session(&broker);
    let channel = session.open_channel().unwrap();
    channel.declare_queue("jobs", QueueDeclareOptions::default()).unwrap();
    let a = channel.consumer("jobs").unwrap();
    let b = channel.consumer("jobs").unwrap();

    for i in 0..4 {
        channel.publish(format!("job {}", i), "", "jobs").unwrap();
    }

    let take = |consumer: &Consumer| -> Vec<String> {
        (0..2)
            .map(|_| String::from_utf8(expect_message(consumer).into_content()).unwrap())
            .collect()
    };
    assert_eq!(take(&a), vec!["job 0", "job 2"]);
    assert_eq!(take(&b), vec!["job 1", "job 3"]);
    expect_nothing(&a);
}

#[test]
fn threads_share_one_session() {
    init_logging();
    let broker = MemoryBroker::new();
    let session = Arc::new(memory_session(&broker));
    let channel = session.open_channel().unwrap();
    channel.declare_queue("tally", QueueDeclareOptions::default()).unwrap();
    let consumer = channel.consumer("tally").unwrap();

    let publishers: Vec<_> = (0..4)
        .map(|worker| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let channel = session.open_channel().unwrap();
                for i in 0..25 {
                    channel
                        .publish(format!("{}-{}", worker, i), "", "tally")
                        .unwrap();
                }
                channel.number()
            })
        })
        .collect();

    let mut received = Vec::new();
    while received.len() < 100 {
        received.push(expect_message(&consumer).into_content());
    }
    let mut numbers: Vec<_> = publishers.into_iter().map(|p| p.join().unwrap()).collect();
    numbers.sort();
    assert_eq!(numbers, vec![2, 3, 4, 5]);

    // Each publisher's messages arrive in the order it sent them.
    for worker in 0..4 {
        let prefix = format!("{}-", worker);
        let sequence: Vec<usize> = received
            .iter()
            .map(|m| String::from_utf8_lossy(m).into_owned())
            .filter_map(|m| m.strip_prefix(&prefix).map(|i| i.parse().unwrap()))
            .collect();
        assert_eq!(sequence, (0..25).collect::<Vec<_>>());
    }
    expect_nothing(&consumer);
}
